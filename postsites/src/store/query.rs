//! Requêtes de couches autour d'un site
//!
//! Les requêtes sélectionnent et filtrent (`ST_DWithin`) ; le recentrage des
//! géométries sur le centroïde du site est fait côté Rust, sur le GeoJSON
//! renvoyé (voir `extract::geojson`).
//!
//! Identifiant du site et rayon sont passés en paramètres (`$1`, `$2`).
//! Les noms de tables et de colonnes, qui ne peuvent pas l'être, sont
//! validés par `Configuration::validate` puis quotés ici.

use std::time::Duration;

use serde_json::Value;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::Client;
use tracing::{debug, trace};

use crate::config::{validate_identifier, validate_storage_name, Configuration, Layer};
use crate::error::{ConfigError, ExtractError};

/// Nature d'une requête
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Le site lui-même
    Site,
    /// Les autres sites de la même couche dans le rayon
    OtherSites,
    /// Les entités d'une autre couche dans le rayon
    NearSite,
}

/// Une requête de couche, prête à être exécutée
#[derive(Debug, Clone, PartialEq)]
pub struct LayerQuery {
    pub kind: QueryKind,
    /// Nom affiché de la couche (messages d'erreur, logs)
    pub layer: String,
    pub site_table: String,
    pub table: String,
    pub columns: Vec<String>,
    pub id_column: String,
    pub geometry_column: String,
    pub site_id: i64,
    pub radius: f64,
}

impl LayerQuery {
    fn build(kind: QueryKind, config: &Configuration, site: &Layer, layer: &Layer, site_id: i64) -> Self {
        Self {
            kind,
            layer: layer.name.clone(),
            site_table: site.storage_name.clone(),
            table: layer.storage_name.clone(),
            columns: layer.columns.clone(),
            id_column: config.id_column.clone(),
            geometry_column: config.geometry_column.clone(),
            site_id,
            radius: config.site_radius,
        }
    }

    pub fn site(config: &Configuration, site: &Layer, site_id: i64) -> Self {
        Self::build(QueryKind::Site, config, site, site, site_id)
    }

    pub fn other_sites(config: &Configuration, site: &Layer, site_id: i64) -> Self {
        Self::build(QueryKind::OtherSites, config, site, site, site_id)
    }

    pub fn near_site(config: &Configuration, site: &Layer, layer: &Layer, site_id: i64) -> Self {
        Self::build(QueryKind::NearSite, config, site, layer, site_id)
    }

    /// Texte SQL de la requête
    pub fn to_sql(&self) -> Result<String, ConfigError> {
        let table = quote_table(&self.table)?;
        let site_table = quote_table(&self.site_table)?;
        let id = quote_ident(&self.id_column)?;
        let geom = quote_ident(&self.geometry_column)?;
        let columns = self
            .columns
            .iter()
            .map(|c| quote_ident(c).map(|q| format!("t.{}", q)))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");

        let select = format!(
            "SELECT ST_AsGeoJSON(t.{geom})::text AS geometry, json_build_array({columns})::text AS attributes"
        );
        let site_geom =
            format!("(SELECT s.{geom} AS geom FROM {site_table} AS s WHERE s.{id} = $1::bigint) AS site");

        let sql = match self.kind {
            QueryKind::Site => format!("{select} FROM {table} AS t WHERE t.{id} = $1::bigint"),
            QueryKind::OtherSites => format!(
                "{select} FROM {table} AS t, {site_geom} \
                 WHERE ST_DWithin(t.{geom}, site.geom, $2::float8) AND t.{id} <> $1::bigint \
                 ORDER BY t.{id}"
            ),
            QueryKind::NearSite => format!(
                "{select} FROM {table} AS t, {site_geom} \
                 WHERE ST_DWithin(t.{geom}, site.geom, $2::float8)"
            ),
        };

        Ok(sql)
    }

    /// Paramètres positionnels correspondant à `to_sql`
    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        match self.kind {
            QueryKind::Site => vec![&self.site_id],
            QueryKind::OtherSites | QueryKind::NearSite => vec![&self.site_id, &self.radius],
        }
    }
}

/// Identifiant quoté, après validation
pub fn quote_ident(name: &str) -> Result<String, ConfigError> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Table quotée, `schema.table` compris
pub fn quote_table(name: &str) -> Result<String, ConfigError> {
    validate_storage_name(name)?;
    Ok(name
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Une ligne renvoyée : géométrie GeoJSON et attributs dans l'ordre des colonnes
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub geometry: geojson::Geometry,
    pub attributes: Vec<Value>,
}

/// Source d'entités pour l'assemblage d'un extrait
#[allow(async_fn_in_trait)]
pub trait FeatureSource {
    async fn fetch(&self, query: &LayerQuery) -> Result<Vec<FeatureRow>, ExtractError>;
}

/// Délai laissé au serveur pour annuler une requête trop longue avant
/// l'abandon côté client
const CLIENT_GRACE: Duration = Duration::from_secs(1);

/// Borne la durée des requêtes côté serveur (`0` désactiverait la limite)
pub fn statement_timeout_sql(timeout: Duration) -> String {
    format!("SET statement_timeout = {}", timeout.as_millis().max(1))
}

/// Source PostGIS sur une connexion empruntée pour la durée d'un extrait.
///
/// La connexion doit porter un `statement_timeout` égal à `timeout` : une
/// requête abandonnée côté client seulement continuerait sur le serveur et
/// retarderait les suivantes.
pub struct PgFeatureSource<'a> {
    client: &'a Client,
    timeout: Duration,
}

impl<'a> PgFeatureSource<'a> {
    pub fn new(client: &'a Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn query_error(&self, layer: &str, e: tokio_postgres::Error) -> ExtractError {
        if e.code() == Some(&SqlState::QUERY_CANCELED) {
            self.timeout_error(layer)
        } else {
            ExtractError::from_pg(layer, e)
        }
    }

    fn timeout_error(&self, layer: &str) -> ExtractError {
        ExtractError::Timeout {
            layer: layer.to_string(),
            secs: self.timeout.as_secs(),
        }
    }
}

impl FeatureSource for PgFeatureSource<'_> {
    async fn fetch(&self, query: &LayerQuery) -> Result<Vec<FeatureRow>, ExtractError> {
        let sql = query.to_sql()?;
        trace!(layer = %query.layer, sql = %sql, "Query");

        let params = query.params();
        let rows = tokio::time::timeout(
            self.timeout + CLIENT_GRACE,
            self.client.query(sql.as_str(), &params),
        )
        .await
        .map_err(|_| self.timeout_error(&query.layer))?
        .map_err(|e| self.query_error(&query.layer, e))?;

        debug!(layer = %query.layer, kind = ?query.kind, rows = rows.len(), "Query done");

        let mut features = Vec::with_capacity(rows.len());
        for row in &rows {
            let geometry: Option<String> = row
                .try_get(0)
                .map_err(|e| ExtractError::decode(&query.layer, e.to_string()))?;
            let attributes: Option<String> = row
                .try_get(1)
                .map_err(|e| ExtractError::decode(&query.layer, e.to_string()))?;
            if let Some(feature) = decode_row(
                &query.layer,
                query.kind,
                geometry.as_deref(),
                attributes.as_deref(),
            )? {
                features.push(feature);
            }
        }

        Ok(features)
    }
}

/// Décode une ligne.
///
/// Une géométrie NULL est ignorée, sauf pour le site lui-même : elle devient
/// une collection vide, sans centroïde, pour que l'extraction signale un site
/// vide plutôt qu'introuvable.
pub fn decode_row(
    layer: &str,
    kind: QueryKind,
    geometry: Option<&str>,
    attributes: Option<&str>,
) -> Result<Option<FeatureRow>, ExtractError> {
    let geometry = match (geometry, kind) {
        (Some(text), _) => serde_json::from_str(text)
            .map_err(|e| ExtractError::decode(layer, format!("geometry: {}", e)))?,
        (None, QueryKind::Site) => geojson::Geometry::new(geojson::Value::GeometryCollection(vec![])),
        (None, _) => {
            debug!(layer, "Skipping row with NULL geometry");
            return Ok(None);
        }
    };

    let attributes = match attributes {
        Some(text) => serde_json::from_str::<Vec<Value>>(text)
            .map_err(|e| ExtractError::decode(layer, format!("attributes: {}", e)))?,
        None => Vec::new(),
    };

    Ok(Some(FeatureRow {
        geometry,
        attributes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Configuration {
        let mut cfg = Configuration::new(vec![
            Layer::new("parcels", "nyc.parcels").with_columns(["owner"]),
            Layer::new("roads", "roads").with_columns(["name", "lanes"]),
        ]);
        cfg.set_site_layer("parcels").unwrap();
        cfg
    }

    #[test]
    fn test_site_query_sql() {
        let cfg = config();
        let site = cfg.site().unwrap();
        let query = LayerQuery::site(&cfg, site, 42);
        let sql = query.to_sql().unwrap();

        assert!(sql.contains("ST_AsGeoJSON(t.\"wkb_geometry\")"));
        assert!(sql.contains("json_build_array(t.\"owner\")"));
        assert!(sql.contains("FROM \"nyc\".\"parcels\" AS t"));
        assert!(sql.contains("t.\"ogc_fid\" = $1::bigint"));
        assert!(!sql.contains("42"));
        assert!(!sql.contains("$2"));
        assert_eq!(query.params().len(), 1);
    }

    #[test]
    fn test_other_sites_excludes_target() {
        let cfg = config();
        let site = cfg.site().unwrap();
        let query = LayerQuery::other_sites(&cfg, site, 42);
        let sql = query.to_sql().unwrap();

        assert!(sql.contains("ST_DWithin(t.\"wkb_geometry\", site.geom, $2::float8)"));
        assert!(sql.contains("t.\"ogc_fid\" <> $1::bigint"));
        assert_eq!(query.params().len(), 2);
        assert_eq!(query.radius, 100.0);
    }

    #[test]
    fn test_near_site_query_uses_site_table_for_anchor() {
        let cfg = config();
        let site = cfg.site().unwrap();
        let roads = cfg.layer_by_name("roads").unwrap();
        let query = LayerQuery::near_site(&cfg, site, roads, 7);
        let sql = query.to_sql().unwrap();

        assert!(sql.contains("FROM \"roads\" AS t"));
        assert!(sql.contains("FROM \"nyc\".\"parcels\" AS s WHERE s.\"ogc_fid\" = $1::bigint"));
        assert!(sql.contains("json_build_array(t.\"name\", t.\"lanes\")"));
        assert_eq!(query.layer, "roads");
    }

    #[test]
    fn test_query_rejects_unvalidated_identifier() {
        let cfg = config();
        let site = cfg.site().unwrap();
        let mut query = LayerQuery::site(&cfg, site, 1);
        query.columns.push("x\"; DROP TABLE roads; --".into());
        assert!(query.to_sql().is_err());
    }

    #[test]
    fn test_decode_row() {
        let row = decode_row(
            "roads",
            QueryKind::NearSite,
            Some(r#"{"type":"LineString","coordinates":[[0,0],[10,0]]}"#),
            Some(r#"["Broadway", 4]"#),
        )
        .unwrap()
        .unwrap();
        assert_eq!(row.attributes, vec![Value::from("Broadway"), Value::from(4)]);
        assert!(matches!(row.geometry.value, geojson::Value::LineString(_)));

        assert!(decode_row("roads", QueryKind::NearSite, None, Some("[]"))
            .unwrap()
            .is_none());
        assert!(decode_row("roads", QueryKind::NearSite, Some("not json"), None).is_err());
    }

    #[test]
    fn test_decode_null_site_geometry_keeps_row() {
        let row = decode_row("parcels", QueryKind::Site, None, Some(r#"["Martin"]"#))
            .unwrap()
            .unwrap();
        assert_eq!(row.geometry.value, geojson::Value::GeometryCollection(vec![]));
        assert_eq!(row.attributes, vec![Value::from("Martin")]);
        assert_eq!(crate::extract::centroid_of(&row.geometry), None);
    }

    #[test]
    fn test_statement_timeout_sql() {
        assert_eq!(
            statement_timeout_sql(Duration::from_secs(30)),
            "SET statement_timeout = 30000"
        );
        assert_eq!(
            statement_timeout_sql(Duration::ZERO),
            "SET statement_timeout = 1"
        );
    }
}
