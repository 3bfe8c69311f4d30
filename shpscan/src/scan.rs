//! Scan de répertoires : détection des shapefiles et de leurs projections
//!
//! Les projections sont dédupliquées par comparaison exacte du texte WKT.
//! Deux descriptions équivalentes mais formatées différemment (espaces,
//! ordre des paramètres) donnent deux projections distinctes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::tool::VectorTool;
use crate::types::{Projection, ProjectionId, ScanFailure, ScanResult, SourceFile};
use crate::ShpscanError;

/// Projections uniques, indexées par texte exact
#[derive(Debug, Default)]
pub struct ProjectionRegistry {
    projections: Vec<Projection>,
    by_text: HashMap<String, ProjectionId>,
}

impl ProjectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retourne l'identifiant de la projection, en la créant si le texte est nouveau
    pub fn intern(&mut self, wkt: &str) -> ProjectionId {
        if let Some(id) = self.by_text.get(wkt) {
            return *id;
        }
        let id = ProjectionId(self.projections.len());
        self.projections.push(Projection::new(wkt));
        self.by_text.insert(wkt.to_string(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.projections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn into_projections(self) -> Vec<Projection> {
        self.projections
    }
}

/// Collecte récursivement les shapefiles d'un répertoire, triés par chemin.
///
/// Une entrée illisible (lien cassé, boucle de liens) est rapportée dans la
/// liste d'échecs sans interrompre le parcours ; seul un répertoire racine
/// inaccessible est une erreur.
pub fn collect_shapefiles(folder: &Path) -> Result<(Vec<PathBuf>, Vec<ScanFailure>), ShpscanError> {
    let mut files = Vec::new();
    let mut failures = Vec::new();

    for entry in WalkDir::new(folder).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ShpscanError::Io(
                    e.into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop")),
                ));
            }
            Err(e) => {
                let path = e.path().unwrap_or(folder).to_path_buf();
                warn!(path = %path.display(), error = %e, "Cannot walk entry");
                failures.push(ScanFailure {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if entry.file_type().is_file() && is_shapefile(entry.path()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok((files, failures))
}

fn is_shapefile(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"))
}

/// Lit le fichier .prj associé à un shapefile, s'il existe.
///
/// Les .prj produits par ArcGIS sont parfois en Windows-1252.
pub fn read_sidecar_projection(shp: &Path) -> Result<Option<String>, ShpscanError> {
    for ext in ["prj", "PRJ"] {
        let prj = shp.with_extension(ext);
        let bytes = match std::fs::read(&prj) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let text = match simdutf8::basic::from_utf8(&bytes) {
            Ok(s) => s.to_string(),
            Err(_) => {
                let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
                decoded.into_owned()
            }
        };
        let text = text.trim_end_matches(['\r', '\n']).to_string();
        if text.trim().is_empty() {
            return Ok(None);
        }
        return Ok(Some(text));
    }
    Ok(None)
}

/// Scanne un répertoire (récursivement)
pub fn scan_directory<T: VectorTool>(tool: &T, folder: &Path) -> Result<ScanResult, ShpscanError> {
    let (files, walk_failures) = collect_shapefiles(folder)?;
    info!(folder = %folder.display(), shapefiles = files.len(), "Scanning folder");

    let mut result = scan_files(tool, &files);
    result.failures.extend(walk_failures);
    result.failures.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(result)
}

/// Scanne une liste explicite de fichiers.
///
/// Un fichier illisible est enregistré dans `failures` sans interrompre le scan.
pub fn scan_files<T: VectorTool, P: AsRef<Path>>(tool: &T, paths: &[P]) -> ScanResult {
    let mut registry = ProjectionRegistry::new();
    let mut result = ScanResult::default();

    for path in paths {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let inspection = match tool.inspect(&path) {
            Ok(i) => i,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Inspection failed");
                result.failures.push(ScanFailure {
                    path,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let sidecar = match read_sidecar_projection(&path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read .prj");
                result.failures.push(ScanFailure {
                    path,
                    message: format!("cannot read .prj: {}", e),
                });
                continue;
            }
        };

        let name = inspection
            .layer_name
            .clone()
            .or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "unknown".to_string());

        let mut file = SourceFile::new(path.clone(), name);
        file.geometry_type = inspection.geometry_type;

        match sidecar.or(inspection.projection_wkt) {
            Some(wkt) => {
                let id = registry.intern(&wkt);
                debug!(path = %path.display(), projection = id.0, "Projection detected");
                file.projection = Some(id);
                result.files.push(file);
            }
            None => {
                debug!(path = %path.display(), "No projection information");
                result.unresolved.push(file);
            }
        }
    }

    result.projections = registry.into_projections();

    info!(
        files = result.files.len(),
        projections = result.projections.len(),
        unresolved = result.unresolved.len(),
        failures = result.failures.len(),
        "Scan complete"
    );

    result
}
