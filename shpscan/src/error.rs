//! Types d'erreurs pour le crate shpscan

use std::path::PathBuf;

use thiserror::Error;

/// Erreurs pouvant survenir lors du scan ou du chargement de shapefiles
#[derive(Debug, Error)]
pub enum ShpscanError {
    /// Erreur d'I/O (lecture d'un répertoire, d'un .prj, du plan)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// L'outil externe n'a pas pu être lancé (absent du PATH, droits...)
    #[error("Cannot run {tool}: {source}")]
    ToolInvocation {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// L'outil externe a terminé en erreur
    #[error("{tool} failed on {path} (exit code {code:?}): {stderr}")]
    ToolFailed {
        tool: String,
        path: PathBuf,
        code: Option<i32>,
        stderr: String,
    },

    /// Plan de chargement illisible ou incohérent
    #[error("Invalid load plan: {0}")]
    InvalidPlan(String),

    /// Projection sans code EPSG résolu
    #[error("Unresolved projection for {0}")]
    UnresolvedProjection(PathBuf),
}

impl ShpscanError {
    /// Crée une erreur de plan invalide
    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan(reason.into())
    }
}

impl From<serde_json::Error> for ShpscanError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPlan(e.to_string())
    }
}
