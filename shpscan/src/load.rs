//! Orchestration du chargement des fichiers dans PostGIS
//!
//! Politique d'écriture : le premier fichier chargé dans une table donnée
//! la recrée (`-overwrite`), les suivants y sont ajoutés (`-append`).

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::plan::LoadPlan;
use crate::tool::{destination_geometry_type, PgTarget, VectorTool};

/// Projection de destination par défaut (Web Mercator)
pub const DEFAULT_TARGET_CRS: &str = "EPSG:3785";

/// Mode d'écriture dans la table de destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Crée (ou recrée) la table
    Overwrite,
    /// Ajoute à la table existante
    Append,
}

/// Un chargement à effectuer
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub source: PathBuf,
    pub source_crs: String,
    pub target_crs: String,
    pub table: String,
    pub geometry_type: String,
    pub mode: WriteMode,
    pub skip_failures: bool,
}

/// Options d'un chargement par lot
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub target_crs: String,
    /// Continue après les features en erreur plutôt que d'abandonner le fichier
    pub skip_failures: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            target_crs: DEFAULT_TARGET_CRS.to_string(),
            skip_failures: false,
        }
    }
}

/// Issue du chargement d'un fichier
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileLoadStatus {
    Loaded { output: String },
    Failed { message: String, output: String },
    Skipped { reason: String },
}

/// Résultat par fichier d'un chargement par lot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileLoadResult {
    pub path: PathBuf,
    pub table: Option<String>,
    pub mode: Option<WriteMode>,
    #[serde(flatten)]
    pub status: FileLoadStatus,
}

impl FileLoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, FileLoadStatus::Loaded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileLoadStatus::Failed { .. })
    }
}

/// Attribue un mode d'écriture à chaque table, dans l'ordre de chargement
pub fn plan_write_modes<'a, I>(tables: I) -> Vec<WriteMode>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    tables
        .into_iter()
        .map(|table| {
            if seen.insert(table) {
                WriteMode::Overwrite
            } else {
                WriteMode::Append
            }
        })
        .collect()
}

/// Construit les requêtes de chargement du plan.
///
/// Les fichiers sans table de destination sont ignorés ; ceux dont la
/// projection n'a pas de code EPSG échouent sans appeler l'outil.
pub fn build_requests(
    plan: &LoadPlan,
    options: &LoadOptions,
) -> Vec<Result<LoadRequest, FileLoadResult>> {
    let mut pending = Vec::with_capacity(plan.files.len());

    for file in &plan.files {
        let Some(table) = file.table.clone() else {
            pending.push(Err(FileLoadResult {
                path: file.path.clone(),
                table: None,
                mode: None,
                status: FileLoadStatus::Skipped {
                    reason: "no destination table".to_string(),
                },
            }));
            continue;
        };

        let source_crs = file
            .projection
            .and_then(|id| plan.projections.get(id.0))
            .and_then(|p| p.srs());
        let Some(source_crs) = source_crs else {
            pending.push(Err(FileLoadResult {
                path: file.path.clone(),
                table: Some(table),
                mode: None,
                status: FileLoadStatus::Failed {
                    message: "unresolved projection (no EPSG code)".to_string(),
                    output: String::new(),
                },
            }));
            continue;
        };

        pending.push(Ok(LoadRequest {
            source: file.path.clone(),
            source_crs,
            target_crs: options.target_crs.clone(),
            table,
            geometry_type: destination_geometry_type(file.geometry_type.as_deref()).to_string(),
            mode: WriteMode::Overwrite,
            skip_failures: options.skip_failures,
        }));
    }

    // Les modes ne portent que sur les fichiers réellement chargés
    let tables: Vec<String> = pending
        .iter()
        .filter_map(|p| p.as_ref().ok().map(|r| r.table.clone()))
        .collect();
    let mut modes = plan_write_modes(tables.iter().map(String::as_str)).into_iter();
    for request in pending.iter_mut().filter_map(|p| p.as_mut().ok()) {
        if let Some(mode) = modes.next() {
            request.mode = mode;
        }
    }

    pending
}

/// Charge tous les fichiers du plan ; un échec n'interrompt pas le lot
pub fn load_batch<T: VectorTool>(
    tool: &T,
    target: &PgTarget,
    plan: &LoadPlan,
    options: &LoadOptions,
) -> Vec<FileLoadResult> {
    let mut results = Vec::with_capacity(plan.files.len());

    for pending in build_requests(plan, options) {
        let request = match pending {
            Ok(r) => r,
            Err(result) => {
                warn!(path = %result.path.display(), status = ?result.status, "File not loaded");
                results.push(result);
                continue;
            }
        };

        info!(
            path = %request.source.display(),
            table = %request.table,
            mode = ?request.mode,
            "Loading"
        );

        let status = match tool.load(target, &request) {
            Ok(outcome) if outcome.ok => FileLoadStatus::Loaded {
                output: outcome.output,
            },
            Ok(outcome) => {
                warn!(path = %request.source.display(), "ogr2ogr reported an error");
                FileLoadStatus::Failed {
                    message: "load failed".to_string(),
                    output: outcome.output,
                }
            }
            Err(e) => {
                warn!(path = %request.source.display(), error = %e, "Cannot run loader");
                FileLoadStatus::Failed {
                    message: e.to_string(),
                    output: String::new(),
                }
            }
        };

        results.push(FileLoadResult {
            path: request.source,
            table: Some(request.table),
            mode: Some(request.mode),
            status,
        });
    }

    results
}
