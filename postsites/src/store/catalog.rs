//! Catalogue des tables de la base, pour amorcer une configuration de couches

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use tracing::debug;

use crate::config::{LayerConfig, LayerEntry};

/// Tables techniques exclues du catalogue
const EXCLUDED_TABLES: &str = "^pg_|^sql_|spatial_ref_sys|geometry_columns";

/// Une table utilisateur et ses colonnes attributaires
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<String>,
}

/// Liste les tables visibles (search_path), sans la colonne géométrique
pub async fn list_tables(pool: &Pool, geometry_column: &str) -> Result<Vec<TableInfo>> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;

    let rows = client
        .query(
            "SELECT tablename::text FROM pg_tables \
             WHERE schemaname = ANY(current_schemas(false)) AND tablename !~ $1 \
             ORDER BY tablename",
            &[&EXCLUDED_TABLES],
        )
        .await
        .context("Failed to list tables")?;

    let columns_stmt = client
        .prepare(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_name = $1 AND table_schema = ANY(current_schemas(false)) \
             AND column_name <> $2 ORDER BY ordinal_position",
        )
        .await
        .context("Failed to prepare column listing")?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.get(0);
        let columns = client
            .query(&columns_stmt, &[&name, &geometry_column])
            .await
            .with_context(|| format!("Failed to list columns of {}", name))?
            .iter()
            .map(|r| r.get::<_, String>(0))
            .collect();
        debug!(table = %name, "Catalogued");
        tables.push(TableInfo { name, columns });
    }

    Ok(tables)
}

impl LayerConfig {
    /// Squelette de configuration : une couche par table, nommée comme elle
    pub fn from_tables(tables: &[TableInfo]) -> Self {
        let tables = tables
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    LayerEntry {
                        name: t.name.clone(),
                        cols: t.columns.clone(),
                        color: None,
                        z_column: None,
                        role: None,
                    },
                )
            })
            .collect();

        Self { tables }
    }
}
