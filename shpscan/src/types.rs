//! Types de données pour le crate shpscan

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Index d'une projection dans la liste dédupliquée d'un scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionId(pub usize);

/// Système de coordonnées détecté sur un ou plusieurs fichiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Description WKT brute, telle que lue (comparée à l'identique)
    pub wkt: String,

    /// Code EPSG, renseigné une fois la projection résolue par l'opérateur
    #[serde(default)]
    pub epsg: Option<u32>,
}

impl Projection {
    pub fn new(wkt: impl Into<String>) -> Self {
        Self {
            wkt: wkt.into(),
            epsg: None,
        }
    }

    /// Attache le code EPSG résolu
    pub fn set_epsg(&mut self, code: u32) {
        self.epsg = Some(code);
    }

    /// Référence utilisable par ogr2ogr (`EPSG:xxxx`), si résolue
    pub fn srs(&self) -> Option<String> {
        self.epsg.map(|code| format!("EPSG:{}", code))
    }

    /// Code EPSG déclaré au niveau racine du WKT (`AUTHORITY["EPSG","..."]` ou `ID["EPSG",...]`).
    ///
    /// Les autorités imbriquées (datum, ellipsoïde, unité) sont ignorées.
    pub fn authority_code(&self) -> Option<u32> {
        static AUTHORITY: OnceLock<Regex> = OnceLock::new();
        let re = AUTHORITY.get_or_init(|| {
            Regex::new(r#"(?:AUTHORITY|ID)\[\s*"EPSG"\s*,\s*"?(\d+)"?\s*\]"#)
                .expect("valid authority regex")
        });

        re.captures_iter(&self.wkt)
            .filter_map(|caps| {
                let start = caps.get(0)?.start();
                (bracket_depth(&self.wkt[..start]) == 1).then(|| caps[1].parse().ok())?
            })
            .next()
    }
}

fn bracket_depth(prefix: &str) -> i32 {
    prefix.bytes().fold(0, |depth, b| match b {
        b'[' | b'(' => depth + 1,
        b']' | b')' => depth - 1,
        _ => depth,
    })
}

/// Un shapefile découvert pendant le scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Chemin absolu du .shp
    pub path: PathBuf,

    /// Nom de couche détecté (nom du dataset pour ogrinfo)
    pub name: String,

    /// Type de géométrie déclaré par ogrinfo ("Polygon", "3D Point"...)
    #[serde(default)]
    pub geometry_type: Option<String>,

    /// Projection référencée (None = inconnue)
    #[serde(default)]
    pub projection: Option<ProjectionId>,

    /// Table de destination dans PostGIS
    #[serde(default)]
    pub table: Option<String>,

    /// Couche destinée à porter les sites
    #[serde(default)]
    pub site: bool,

    /// Couche de points d'altitude (terrain)
    #[serde(default)]
    pub terrain: bool,

    /// Couche de bâtiments
    #[serde(default)]
    pub building: bool,

    /// Attribut portant l'altitude, pour le terrain
    #[serde(default)]
    pub elevation_field: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            geometry_type: None,
            projection: None,
            table: None,
            site: false,
            terrain: false,
            building: false,
            elevation_field: None,
        }
    }
}

/// Fichier dont l'inspection a échoué
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Résultat d'un scan de répertoire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanResult {
    /// Projections uniques, indexées par `ProjectionId`
    pub projections: Vec<Projection>,

    /// Fichiers dont la projection est connue
    pub files: Vec<SourceFile>,

    /// Fichiers sans description de projection
    pub unresolved: Vec<SourceFile>,

    /// Fichiers que l'outil d'inspection n'a pas pu lire
    pub failures: Vec<ScanFailure>,
}

impl ScanResult {
    /// Projection référencée par un fichier
    pub fn projection_of(&self, file: &SourceFile) -> Option<&Projection> {
        file.projection.and_then(|id| self.projections.get(id.0))
    }

    /// Fichiers partageant une projection donnée
    pub fn files_with(&self, id: ProjectionId) -> impl Iterator<Item = &SourceFile> {
        self.files
            .iter()
            .filter(move |f| f.projection == Some(id))
    }
}
