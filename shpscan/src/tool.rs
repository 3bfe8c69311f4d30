//! Outil externe d'inspection et de chargement (ogrinfo / ogr2ogr)
//!
//! Le crate ne réimplémente pas la lecture des shapefiles : tout passe par
//! les utilitaires GDAL, lancés en sous-processus. Seuls la sortie standard,
//! la sortie d'erreur et le code de retour sont observés.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::load::{LoadRequest, WriteMode};
use crate::ShpscanError;

/// Informations extraites d'un fichier par l'outil d'inspection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inspection {
    /// Nom du dataset (premier layer)
    pub layer_name: Option<String>,
    /// Type de géométrie déclaré ("Polygon", "3D Point"...)
    pub geometry_type: Option<String>,
    /// WKT de la projection, si l'outil en rapporte une
    pub projection_wkt: Option<String>,
}

/// Résultat d'un chargement : succès ou non, et sortie capturée
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub ok: bool,
    pub output: String,
}

/// Connexion PostgreSQL cible, telle que passée à ogr2ogr
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PgTarget {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: String,
    pub user: String,
    /// Transmis via PGPASSWORD, jamais sur la ligne de commande
    pub password: Option<String>,
}

impl PgTarget {
    /// Datasource OGR (`PG:dbname=... user=...`)
    pub fn datasource(&self) -> String {
        let mut ds = format!("PG:dbname={} user={}", self.dbname, self.user);
        if let Some(host) = &self.host {
            ds.push_str(&format!(" host={}", host));
        }
        if let Some(port) = self.port {
            ds.push_str(&format!(" port={}", port));
        }
        ds
    }
}

/// Abstraction de l'outil externe
pub trait VectorTool {
    /// Inspecte un fichier (type de géométrie, projection, nom du dataset)
    fn inspect(&self, path: &Path) -> Result<Inspection, ShpscanError>;

    /// Charge un fichier dans la base.
    ///
    /// `Err` uniquement si l'outil ne peut pas être lancé ; un échec du
    /// chargement lui-même est rapporté par `LoadOutcome::ok`.
    fn load(&self, target: &PgTarget, request: &LoadRequest) -> Result<LoadOutcome, ShpscanError>;
}

/// Utilitaires GDAL en ligne de commande
#[derive(Debug, Clone)]
pub struct Ogr {
    pub ogrinfo: PathBuf,
    pub ogr2ogr: PathBuf,
}

impl Default for Ogr {
    fn default() -> Self {
        Self {
            ogrinfo: PathBuf::from("ogrinfo"),
            ogr2ogr: PathBuf::from("ogr2ogr"),
        }
    }
}

impl VectorTool for Ogr {
    fn inspect(&self, path: &Path) -> Result<Inspection, ShpscanError> {
        let tool = self.ogrinfo.display().to_string();
        debug!(path = %path.display(), "ogrinfo");

        let output = Command::new(&self.ogrinfo)
            .args(["-ro", "-so", "-al"])
            .arg(path)
            .output()
            .map_err(|source| ShpscanError::ToolInvocation {
                tool: tool.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ShpscanError::ToolFailed {
                tool,
                path: path.to_path_buf(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(parse_ogrinfo(&String::from_utf8_lossy(&output.stdout)))
    }

    fn load(&self, target: &PgTarget, request: &LoadRequest) -> Result<LoadOutcome, ShpscanError> {
        let args = ogr2ogr_args(target, request);
        debug!(
            path = %request.source.display(),
            table = %request.table,
            mode = ?request.mode,
            "ogr2ogr"
        );
        trace!(?args, "ogr2ogr arguments");

        let mut cmd = Command::new(&self.ogr2ogr);
        cmd.args(&args);
        if let Some(password) = &target.password {
            cmd.env("PGPASSWORD", password);
        }
        // Les DBF sont rarement en UTF-8
        if std::env::var_os("PGCLIENTENCODING").is_none() {
            cmd.env("PGCLIENTENCODING", "LATIN1");
        }

        let output = cmd.output().map_err(|source| ShpscanError::ToolInvocation {
            tool: self.ogr2ogr.display().to_string(),
            source,
        })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(LoadOutcome {
            ok: output.status.success(),
            output: text.trim().to_string(),
        })
    }
}

/// Construit les arguments d'ogr2ogr pour un chargement
pub fn ogr2ogr_args(target: &PgTarget, request: &LoadRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-f".into(),
        "PostgreSQL".into(),
        "-s_srs".into(),
        request.source_crs.clone().into(),
        "-t_srs".into(),
        request.target_crs.clone().into(),
        target.datasource().into(),
        request.source.clone().into_os_string(),
        "-nln".into(),
        request.table.clone().into(),
        "-nlt".into(),
        request.geometry_type.clone().into(),
    ];

    match request.mode {
        WriteMode::Overwrite => {
            // Les DBF annoncent des précisions qu'ils ne respectent pas
            for lco in ["PRECISION=NO", "GEOMETRY_NAME=wkb_geometry", "FID=ogc_fid"] {
                args.push("-lco".into());
                args.push(lco.into());
            }
            args.push("-overwrite".into());
        }
        WriteMode::Append => args.push("-append".into()),
    }

    if request.skip_failures {
        args.push("-skipfailures".into());
    }

    args
}

/// Parse la sortie de `ogrinfo -so -al`
pub fn parse_ogrinfo(output: &str) -> Inspection {
    let mut inspection = Inspection::default();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(name) = line.strip_prefix("Layer name:") {
            if inspection.layer_name.is_none() {
                inspection.layer_name = Some(name.trim().to_string());
            }
        } else if let Some(geometry) = line.strip_prefix("Geometry:") {
            if inspection.geometry_type.is_none() {
                inspection.geometry_type = Some(geometry.trim().to_string());
            }
        } else if line.starts_with("Layer SRS WKT:") && inspection.projection_wkt.is_none() {
            // Le WKT commence à la ligne suivante ; les continuations sont indentées
            let Some(first) = lines.next() else { break };
            if first.trim() == "(unknown)" || first.trim().is_empty() {
                continue;
            }
            let mut wkt = first.trim_end().to_string();
            while let Some(next) = lines.peek() {
                if !next.starts_with(char::is_whitespace) || next.trim().is_empty() {
                    break;
                }
                wkt.push('\n');
                wkt.push_str(next.trim_end());
                lines.next();
            }
            inspection.projection_wkt = Some(wkt);
        }
    }

    inspection
}

/// Convertit le type de géométrie d'ogrinfo vers le vocabulaire `-nlt` d'ogr2ogr.
///
/// Les types simples sont promus en multi pour accepter les shapefiles mixtes.
pub fn destination_geometry_type(source: Option<&str>) -> &'static str {
    match source.map(str::trim) {
        Some("Polygon") | Some("Multi Polygon") => "MULTIPOLYGON",
        Some("Point") => "POINT",
        Some("Multi Point") => "MULTIPOINT",
        Some("Line String") | Some("Multi Line String") => "MULTILINESTRING",
        Some("3D Point") => "POINT25D",
        Some("3D Multi Point") => "MULTIPOINT25D",
        Some("3D Polygon") | Some("3D Multi Polygon") => "MULTIPOLYGON25D",
        Some("3D Line String") | Some("3D Multi Line String") => "MULTILINESTRING25D",
        _ => "GEOMETRY",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OGRINFO_GDAL3: &str = "INFO: Open of `parcels.shp'
      using driver `ESRI Shapefile' successful.

Layer name: parcels
Metadata:
  DBF_DATE_LAST_UPDATE=2009-07-28
Geometry: Polygon
Feature Count: 1204
Extent: (982030.250000, 190350.125000) - (991290.500000, 201400.750000)
Layer SRS WKT:
PROJCRS[\"NAD83 / New York Long Island (ftUS)\",
    BASEGEOGCRS[\"NAD83\",
        DATUM[\"North American Datum 1983\"]],
    ID[\"EPSG\",2263]]
Data axis to CRS axis mapping: 1,2
owner: String (80.0)
landuse: Integer (4.0)
";

    const OGRINFO_NO_SRS: &str = "Layer name: trees
Geometry: 3D Point
Feature Count: 12
Layer SRS WKT:
(unknown)
species: String (40.0)
";

    #[test]
    fn test_parse_ogrinfo() {
        let inspection = parse_ogrinfo(OGRINFO_GDAL3);
        assert_eq!(inspection.layer_name.as_deref(), Some("parcels"));
        assert_eq!(inspection.geometry_type.as_deref(), Some("Polygon"));

        let wkt = inspection.projection_wkt.unwrap();
        assert!(wkt.starts_with("PROJCRS[\"NAD83 / New York Long Island (ftUS)\","));
        assert!(wkt.ends_with("ID[\"EPSG\",2263]]"));
        assert!(!wkt.contains("Data axis"));
        assert_eq!(wkt.lines().count(), 4);
    }

    #[test]
    fn test_parse_ogrinfo_unknown_srs() {
        let inspection = parse_ogrinfo(OGRINFO_NO_SRS);
        assert_eq!(inspection.layer_name.as_deref(), Some("trees"));
        assert_eq!(inspection.geometry_type.as_deref(), Some("3D Point"));
        assert_eq!(inspection.projection_wkt, None);
    }

    #[test]
    fn test_destination_geometry_type() {
        assert_eq!(destination_geometry_type(Some("Polygon")), "MULTIPOLYGON");
        assert_eq!(destination_geometry_type(Some("Point")), "POINT");
        assert_eq!(destination_geometry_type(Some("Line String")), "MULTILINESTRING");
        assert_eq!(destination_geometry_type(Some("3D Multi Point")), "MULTIPOINT25D");
        assert_eq!(destination_geometry_type(Some("3D Polygon")), "MULTIPOLYGON25D");
        assert_eq!(destination_geometry_type(Some("3D Line String")), "MULTILINESTRING25D");
        assert_eq!(destination_geometry_type(Some("Curve Polygon")), "GEOMETRY");
        assert_eq!(destination_geometry_type(None), "GEOMETRY");
    }

    #[test]
    fn test_ogr2ogr_args_overwrite_then_append() {
        let target = PgTarget {
            host: Some("db.local".into()),
            port: None,
            dbname: "spatial".into(),
            user: "gis".into(),
            password: Some("secret".into()),
        };
        let mut request = LoadRequest {
            source: PathBuf::from("/data/roads.shp"),
            source_crs: "EPSG:2263".into(),
            target_crs: "EPSG:3785".into(),
            table: "roads".into(),
            geometry_type: "MULTILINESTRING".into(),
            mode: WriteMode::Overwrite,
            skip_failures: false,
        };

        let args: Vec<String> = ogr2ogr_args(&target, &request)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-overwrite".to_string()));
        assert!(args.contains(&"PRECISION=NO".to_string()));
        assert!(args.contains(&"PG:dbname=spatial user=gis host=db.local".to_string()));
        assert!(!args.iter().any(|a| a.contains("secret")));
        assert!(!args.contains(&"-skipfailures".to_string()));

        request.mode = WriteMode::Append;
        request.skip_failures = true;
        let args: Vec<String> = ogr2ogr_args(&target, &request)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"-append".to_string()));
        assert!(!args.contains(&"-overwrite".to_string()));
        assert!(!args.contains(&"PRECISION=NO".to_string()));
        assert!(args.contains(&"-skipfailures".to_string()));
    }
}
