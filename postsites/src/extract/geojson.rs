//! Document de sortie (LayerCollection) et recentrage des géométries
//!
//! Toutes les géométries d'un extrait sont translatées de l'opposé du
//! centroïde du site : le site est à l'origine locale.

use std::path::Path;

use anyhow::{Context, Result};
use geo::Centroid;
use geojson::{Feature, FeatureCollection, JsonObject, Position};
use serde::Serialize;
use serde_json::Value;

use super::terrain::TerrainMesh;
use crate::store::FeatureRow;

/// Nom de la couche du site
pub const SITE_LAYER: &str = "site";
/// Nom de la couche des sites voisins
pub const OTHER_SITES_LAYER: &str = "othersites";

/// Document complet d'un extrait
#[derive(Debug, Clone, Default, Serialize)]
#[serde(tag = "type", rename = "LayerCollection")]
pub struct LayerCollection {
    pub layers: Vec<LayerResult>,
}

impl LayerCollection {
    pub fn layer(&self, name: &str) -> Option<&LayerResult> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize extract")
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .context(format!("Failed to write extract: {}", path.display()))
    }
}

/// Une couche de l'extrait
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "Layer")]
pub struct LayerResult {
    pub name: String,
    pub contents: LayerContents,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Contenu d'une couche : entités, ou maillage pour le terrain
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LayerContents {
    Features(FeatureCollection),
    Mesh(TerrainMesh),
}

impl LayerResult {
    pub fn features(&self) -> Option<&FeatureCollection> {
        match &self.contents {
            LayerContents::Features(fc) => Some(fc),
            LayerContents::Mesh(_) => None,
        }
    }

    pub fn mesh(&self) -> Option<&TerrainMesh> {
        match &self.contents {
            LayerContents::Mesh(mesh) => Some(mesh),
            LayerContents::Features(_) => None,
        }
    }
}

/// Centroïde planimétrique d'une géométrie GeoJSON
pub fn centroid_of(geometry: &geojson::Geometry) -> Option<(f64, f64)> {
    let geometry = geo::Geometry::<f64>::try_from(geometry.value.clone()).ok()?;
    geometry.centroid().map(|p| (p.x(), p.y()))
}

/// Translate toutes les positions pour placer `origin` à (0, 0).
///
/// Les Z sont conservés, sauf avec `force_2d`.
pub fn recenter(geometry: &mut geojson::Geometry, origin: (f64, f64), force_2d: bool) {
    geometry.bbox = None;
    recenter_value(&mut geometry.value, origin, force_2d);
}

fn recenter_value(value: &mut geojson::Value, origin: (f64, f64), force_2d: bool) {
    use geojson::Value::*;

    match value {
        Point(p) => shift(p, origin, force_2d),
        MultiPoint(ps) | LineString(ps) => ps.iter_mut().for_each(|p| shift(p, origin, force_2d)),
        MultiLineString(lines) | Polygon(lines) => lines
            .iter_mut()
            .flatten()
            .for_each(|p| shift(p, origin, force_2d)),
        MultiPolygon(polygons) => polygons
            .iter_mut()
            .flatten()
            .flatten()
            .for_each(|p| shift(p, origin, force_2d)),
        GeometryCollection(geometries) => geometries
            .iter_mut()
            .for_each(|g| recenter(g, origin, force_2d)),
    }
}

fn shift(position: &mut Position, (x0, y0): (f64, f64), force_2d: bool) {
    if position.len() >= 2 {
        position[0] -= x0;
        position[1] -= y0;
    }
    if force_2d {
        position.truncate(2);
    }
}

/// Propriétés d'une entité : colonnes configurées -> valeurs, dans l'ordre
pub fn properties(columns: &[String], attributes: Vec<Value>) -> JsonObject {
    columns.iter().cloned().zip(attributes).collect()
}

/// Couche d'entités recentrées
pub fn feature_layer(
    name: &str,
    color: Option<String>,
    rows: Vec<FeatureRow>,
    columns: &[String],
    origin: (f64, f64),
    force_2d: bool,
) -> LayerResult {
    let features = rows
        .into_iter()
        .map(|mut row| {
            recenter(&mut row.geometry, origin, force_2d);
            Feature {
                bbox: None,
                geometry: Some(row.geometry),
                id: None,
                properties: Some(properties(columns, row.attributes)),
                foreign_members: None,
            }
        })
        .collect();

    LayerResult {
        name: name.to_string(),
        contents: LayerContents::Features(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }),
        color,
    }
}
