//! Assemblage de l'extrait d'un site
//!
//! Une extraction emprunte une seule connexion au pool, interroge la couche
//! site puis chaque couche configurée dans le rayon, et produit une
//! `LayerCollection` recentrée sur le centroïde du site.

pub mod geojson;
pub mod terrain;

use std::time::{Duration, Instant};

use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Configuration, Layer};
use crate::error::ExtractError;
use crate::store::{statement_timeout_sql, FeatureRow, FeatureSource, LayerQuery, PgFeatureSource};

pub use self::geojson::{
    centroid_of, feature_layer, recenter, LayerCollection, LayerContents, LayerResult,
    OTHER_SITES_LAYER, SITE_LAYER,
};
pub use self::terrain::{transpose_attributes, PointCloud, TerrainError, TerrainMesh};

/// Couche écartée pendant une extraction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerFailure {
    pub layer: String,
    pub message: String,
}

/// Résultat d'une extraction
#[derive(Debug, Clone)]
pub struct SiteExtract {
    pub site_id: i64,
    pub collection: LayerCollection,
    /// Couches en échec, absentes de `collection`
    pub failures: Vec<LayerFailure>,
}

impl SiteExtract {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Extrait un site avec une connexion du pool.
///
/// La connexion est rendue au pool à la sortie, en erreur comme en succès.
/// Chaque requête est bornée par `timeout` côté serveur (`statement_timeout`)
/// et côté client.
pub async fn extract_site_from_pool(
    pool: &Pool,
    config: &Configuration,
    site_id: i64,
    timeout: Duration,
) -> Result<SiteExtract, ExtractError> {
    config.validate()?;

    let client = pool
        .get()
        .await
        .map_err(|e| ExtractError::Connection(e.to_string()))?;

    client
        .batch_execute(&statement_timeout_sql(timeout))
        .await
        .map_err(|e| ExtractError::Connection(e.to_string()))?;

    let source = PgFeatureSource::new(&client, timeout);
    let result = extract_site(&source, config, site_id).await;

    // La connexion retourne au pool : pas de limite résiduelle
    if let Err(e) = client.batch_execute("RESET statement_timeout").await {
        warn!(error = %e, "Cannot reset statement_timeout");
    }

    result
}

/// Assemble l'extrait d'un site depuis une source d'entités.
///
/// La couche site doit renvoyer exactement une ligne. Les autres couches
/// sont au mieux : une couche en échec est consignée dans `failures`, sauf
/// erreur de connexion qui interrompt tout.
pub async fn extract_site<S: FeatureSource>(
    source: &S,
    config: &Configuration,
    site_id: i64,
) -> Result<SiteExtract, ExtractError> {
    config.validate()?;
    let start = Instant::now();

    let site = config.site()?;
    let mut site_rows = source.fetch(&LayerQuery::site(config, site, site_id)).await?;
    let site_row = match site_rows.len() {
        0 => {
            return Err(ExtractError::SiteNotFound {
                table: site.storage_name.clone(),
                id: site_id,
            })
        }
        1 => site_rows.remove(0),
        count => {
            return Err(ExtractError::AmbiguousSite {
                table: site.storage_name.clone(),
                id: site_id,
                count,
            })
        }
    };

    let origin = centroid_of(&site_row.geometry).ok_or(ExtractError::EmptySite { id: site_id })?;
    debug!(site_id, x = origin.0, y = origin.1, "Site centroid");

    let mut extract = SiteExtract {
        site_id,
        collection: LayerCollection::default(),
        failures: Vec::new(),
    };

    extract.collection.layers.push(feature_layer(
        SITE_LAYER,
        site.color.clone(),
        vec![site_row],
        &site.columns,
        origin,
        config.force_2d,
    ));

    if config.include_nearby_sites {
        let query = LayerQuery::other_sites(config, site, site_id);
        if let Some(rows) = record(&mut extract, OTHER_SITES_LAYER, source.fetch(&query).await)? {
            if !rows.is_empty() {
                extract.collection.layers.push(feature_layer(
                    OTHER_SITES_LAYER,
                    site.color.clone(),
                    rows,
                    &site.columns,
                    origin,
                    config.force_2d,
                ));
            }
        }
    }

    let terrain_name = config.terrain().map(|t| t.name.as_str());
    for layer in config.layers.iter().filter(|l| l.name != site.name) {
        if Some(layer.name.as_str()) == terrain_name && !cfg!(feature = "terrain") {
            warn!(layer = %layer.name, "Terrain support not compiled in, skipping layer");
            continue;
        }

        let query = LayerQuery::near_site(config, site, layer, site_id);
        let Some(rows) = record(&mut extract, &layer.name, source.fetch(&query).await)? else {
            continue;
        };
        if rows.is_empty() {
            debug!(layer = %layer.name, "No features in radius");
            continue;
        }

        if Some(layer.name.as_str()) == terrain_name {
            let mesh = terrain_result(layer, rows, origin);
            if let Some(result) = record(&mut extract, &layer.name, mesh)? {
                extract.collection.layers.push(result);
            }
        } else {
            extract.collection.layers.push(feature_layer(
                &layer.name,
                layer.color.clone(),
                rows,
                &layer.columns,
                origin,
                config.force_2d,
            ));
        }
    }

    info!(
        site_id,
        layers = extract.collection.layers.len(),
        failures = extract.failures.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Site extracted"
    );

    Ok(extract)
}

/// Consigne l'échec d'une couche ; les erreurs fatales sont propagées
fn record<T>(
    extract: &mut SiteExtract,
    layer: &str,
    result: Result<T, ExtractError>,
) -> Result<Option<T>, ExtractError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(layer, error = %e, "Layer skipped");
            extract.failures.push(LayerFailure {
                layer: layer.to_string(),
                message: e.to_string(),
            });
            Ok(None)
        }
    }
}

#[cfg(feature = "terrain")]
fn terrain_result(
    layer: &Layer,
    mut rows: Vec<FeatureRow>,
    origin: (f64, f64),
) -> Result<LayerResult, ExtractError> {
    for row in &mut rows {
        recenter(&mut row.geometry, origin, false);
    }
    let cloud = PointCloud::from_rows(rows, layer);
    let mesh = terrain::build_mesh(cloud, &layer.columns)
        .map_err(|e| ExtractError::decode(&layer.name, e.to_string()))?;
    debug!(
        layer = %layer.name,
        points = mesh.coordinates.len(),
        faces = mesh.faces.len(),
        "Terrain mesh built"
    );

    Ok(LayerResult {
        name: layer.name.clone(),
        contents: LayerContents::Mesh(mesh),
        color: layer.color.clone(),
    })
}

#[cfg(not(feature = "terrain"))]
fn terrain_result(
    layer: &Layer,
    _rows: Vec<FeatureRow>,
    _origin: (f64, f64),
) -> Result<LayerResult, ExtractError> {
    Err(ExtractError::decode(&layer.name, "terrain support not compiled in"))
}
