//! Plan de chargement : résultat de scan éditable par l'opérateur
//!
//! Le plan est écrit en JSON après le scan. L'opérateur y renseigne les
//! codes EPSG des projections, les tables de destination et les rôles
//! (site, terrain, bâtiments), puis le relit pour lancer le chargement.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{Projection, ScanFailure, ScanResult, SourceFile};
use crate::ShpscanError;

/// Plan de chargement sérialisable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadPlan {
    #[serde(default)]
    pub projections: Vec<Projection>,
    #[serde(default)]
    pub files: Vec<SourceFile>,
    #[serde(default)]
    pub unresolved: Vec<SourceFile>,
    #[serde(default)]
    pub failures: Vec<ScanFailure>,
}

/// Rôles d'une table issue du plan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedTable {
    pub table: String,
    pub site: bool,
    pub terrain: bool,
    pub building: bool,
    pub elevation_field: Option<String>,
}

impl From<ScanResult> for LoadPlan {
    /// Pré-remplit les codes EPSG déclarés dans les WKT et nomme les tables d'après les fichiers
    fn from(scan: ScanResult) -> Self {
        let projections = scan
            .projections
            .into_iter()
            .map(|mut p| {
                if let Some(code) = p.authority_code() {
                    p.set_epsg(code);
                }
                p
            })
            .collect();

        let files = scan
            .files
            .into_iter()
            .map(|mut f| {
                f.table.get_or_insert_with(|| default_table_name(&f.path));
                f
            })
            .collect();

        Self {
            projections,
            files,
            unresolved: scan.unresolved,
            failures: scan.failures,
        }
    }
}

impl LoadPlan {
    /// Charge un plan depuis un fichier JSON
    pub fn load(path: &Path) -> Result<Self, ShpscanError> {
        let content = std::fs::read_to_string(path)?;
        let plan: Self = serde_json::from_str(&content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Écrit le plan en JSON
    pub fn save(&self, path: &Path) -> Result<(), ShpscanError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Vérifie la cohérence des références et des rôles
    pub fn validate(&self) -> Result<(), ShpscanError> {
        for file in &self.files {
            if let Some(id) = file.projection {
                if id.0 >= self.projections.len() {
                    return Err(ShpscanError::invalid_plan(format!(
                        "{} references projection {} (only {} known)",
                        file.path.display(),
                        id.0,
                        self.projections.len()
                    )));
                }
            }
            if let Some(table) = &file.table {
                if !is_valid_table_name(table) {
                    return Err(ShpscanError::invalid_plan(format!(
                        "invalid table name '{}' for {}",
                        table,
                        file.path.display()
                    )));
                }
            }
        }

        let tables = self.tables();
        for (role, count) in [
            ("site", tables.iter().filter(|t| t.site).count()),
            ("terrain", tables.iter().filter(|t| t.terrain).count()),
            ("building", tables.iter().filter(|t| t.building).count()),
        ] {
            if count > 1 {
                return Err(ShpscanError::invalid_plan(format!(
                    "{} tables are marked as {} layer",
                    count, role
                )));
            }
        }

        Ok(())
    }

    /// Tables de destination, avec les rôles cumulés des fichiers qui les alimentent
    pub fn tables(&self) -> Vec<PlannedTable> {
        let mut tables: BTreeMap<&str, PlannedTable> = BTreeMap::new();

        for file in &self.files {
            let Some(name) = file.table.as_deref() else {
                continue;
            };
            let entry = tables.entry(name).or_insert_with(|| PlannedTable {
                table: name.to_string(),
                ..Default::default()
            });
            entry.site |= file.site;
            entry.terrain |= file.terrain;
            entry.building |= file.building;
            if entry.elevation_field.is_none() {
                entry.elevation_field = file.elevation_field.clone();
            }
        }

        tables.into_values().collect()
    }

    /// Fichiers chargeables (table renseignée)
    pub fn loadable(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter().filter(|f| f.table.is_some())
    }
}

/// Nom de table par défaut : nom du fichier en minuscules, caractères non alphanumériques remplacés
pub fn default_table_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("layer")
        .to_lowercase();

    let mut name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
