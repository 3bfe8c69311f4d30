//! Accès à PostGIS : pool de connexions, requêtes de couches, catalogue

pub mod catalog;
pub mod pool;
pub mod query;

pub use pool::{create_pool, test_connection, DatabaseConfig, SslMode};
pub use query::{
    statement_timeout_sql, FeatureRow, FeatureSource, LayerQuery, PgFeatureSource, QueryKind,
};
