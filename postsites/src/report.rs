//! Rapport de chargement
//!
//! Collecte les résultats par fichier d'un chargement par lot et les
//! résume par table.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use shpscan::{FileLoadResult, FileLoadStatus};

/// Statut global du chargement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStatus {
    /// Fichiers chargés sans échec (les fichiers ignorés ne comptent pas)
    Success,
    /// Certains fichiers ont échoué
    PartialSuccess,
    /// Aucun fichier chargé, même sans échec (lot vide ou entièrement ignoré)
    Failed,
}

/// Statistiques par table de destination
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableStats {
    pub loaded: usize,
    pub failed: usize,
}

/// Rapport complet d'un chargement
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub target_crs: String,
    pub duration_secs: f64,
    pub status: LoadStatus,

    pub files_loaded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,

    pub by_table: BTreeMap<String, TableStats>,
    pub files: Vec<FileLoadResult>,
}

impl LoadReport {
    pub fn new(target_crs: &str) -> Self {
        Self {
            target_crs: target_crs.to_string(),
            duration_secs: 0.0,
            status: LoadStatus::Success,
            files_loaded: 0,
            files_failed: 0,
            files_skipped: 0,
            by_table: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    /// Enregistre le résultat d'un fichier
    pub fn record(&mut self, result: FileLoadResult) {
        match &result.status {
            FileLoadStatus::Loaded { .. } => self.files_loaded += 1,
            FileLoadStatus::Failed { .. } => self.files_failed += 1,
            FileLoadStatus::Skipped { .. } => self.files_skipped += 1,
        }
        if let Some(table) = &result.table {
            let stats = self.by_table.entry(table.clone()).or_default();
            if result.is_loaded() {
                stats.loaded += 1;
            } else if result.is_failed() {
                stats.failed += 1;
            }
        }
        self.files.push(result);
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = if self.files_loaded == 0 {
            LoadStatus::Failed
        } else if self.files_failed > 0 {
            LoadStatus::PartialSuccess
        } else {
            LoadStatus::Success
        };
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("LOAD REPORT - {}", self.target_crs);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Files: {} loaded, {} failed, {} skipped",
            self.files_loaded, self.files_failed, self.files_skipped
        );

        if !self.by_table.is_empty() {
            println!("\n--- BY TABLE ---");
            for (table, stats) in &self.by_table {
                println!("  {}: {} loaded, {} failed", table, stats.loaded, stats.failed);
            }
        }

        let failures: Vec<_> = self
            .files
            .iter()
            .filter_map(|f| match &f.status {
                FileLoadStatus::Failed { message, .. } => Some((&f.path, message)),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            println!("\n--- ERRORS ({}) ---", failures.len());
            for (path, message) in failures.iter().take(20) {
                println!("  [{}] {}", path.display(), message);
            }
            if failures.len() > 20 {
                println!("  ... and {} more", failures.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .context(format!("Failed to write report: {}", path.display()))?;
        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{} loaded, {} failed, {} skipped into {} tables",
            self.files_loaded,
            self.files_failed,
            self.files_skipped,
            self.by_table.len()
        )
    }
}

impl FromIterator<FileLoadResult> for LoadReport {
    fn from_iter<I: IntoIterator<Item = FileLoadResult>>(iter: I) -> Self {
        let mut report = Self::new(shpscan::DEFAULT_TARGET_CRS);
        for result in iter {
            report.record(result);
        }
        report
    }
}
