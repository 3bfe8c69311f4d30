//! Erreurs de l'extraction de sites

use thiserror::Error;

/// Configuration invalide, détectée avant toute requête
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("No site layer designated")]
    NoSiteLayer,

    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    #[error("Duplicate layer name: {0}")]
    DuplicateLayer(String),

    #[error("Invalid identifier '{0}' (expected [A-Za-z_][A-Za-z0-9_]*)")]
    InvalidIdentifier(String),

    #[error("Elevation column '{column}' is not among the columns of layer {layer}")]
    UnknownElevationColumn { layer: String, column: String },

    #[error("Terrain layer cannot also be the site layer: {0}")]
    TerrainIsSite(String),

    #[error("Invalid search radius: {0}")]
    InvalidRadius(f64),
}

/// Erreurs d'une extraction.
///
/// `Connection` et `Config` sont fatales ; les autres, hors couche site,
/// n'écartent que la couche concernée.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Base injoignable ou connexion perdue
    #[error("Database connection failed: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Query failed for layer {layer}: {message}")]
    Query { layer: String, message: String },

    /// Ligne renvoyée illisible (GeoJSON ou attributs)
    #[error("Malformed row in layer {layer}: {reason}")]
    Decode { layer: String, reason: String },

    #[error("Site {id} not found in {table}")]
    SiteNotFound { table: String, id: i64 },

    #[error("Site {id} matches {count} rows in {table}")]
    AmbiguousSite { table: String, id: i64, count: usize },

    #[error("Site {id} has an empty geometry")]
    EmptySite { id: i64 },

    /// Délai dépassé (catégorie "autre")
    #[error("Query timed out after {secs}s for layer {layer}")]
    Timeout { layer: String, secs: u64 },
}

impl ExtractError {
    /// Convertit une erreur PostgreSQL ; une connexion fermée est une erreur de connectivité
    pub fn from_pg(layer: &str, e: tokio_postgres::Error) -> Self {
        if e.is_closed() {
            Self::Connection(e.to_string())
        } else {
            Self::Query {
                layer: layer.to_string(),
                message: e.to_string(),
            }
        }
    }

    pub fn decode(layer: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            layer: layer.to_string(),
            reason: reason.into(),
        }
    }

    /// Interrompt l'extraction entière, quelle que soit la couche
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Config(_))
    }
}
