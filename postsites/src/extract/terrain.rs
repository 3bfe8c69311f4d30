//! Conversion d'un semis de points d'altitude en maillage triangulé
//!
//! La triangulation de Delaunay (feature `terrain`, crate `spade`) porte sur
//! les coordonnées planimétriques ; l'altitude vient du Z du point, sinon de
//! la colonne d'altitude configurée, sinon 0.

use geojson::JsonObject;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::Layer;
use crate::store::FeatureRow;

/// Maillage d'une couche terrain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "Mesh")]
pub struct TerrainMesh {
    /// Points 3D, dans l'ordre des lignes renvoyées
    pub coordinates: Vec<[f64; 3]>,
    /// Triangles, en indices dans `coordinates`
    pub faces: Vec<[usize; 3]>,
    /// Attributs regroupés par colonne : `{colonne: [valeur du point 0, ...]}`
    pub properties: JsonObject,
}

#[derive(Debug, Error)]
pub enum TerrainError {
    #[error("Point {index} cannot be triangulated: {reason}")]
    InvalidPoint { index: usize, reason: String },
}

/// Semis de points extrait des lignes d'une couche terrain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<[f64; 3]>,
    pub attributes: Vec<Vec<Value>>,
}

impl PointCloud {
    /// Points (et multipoints) des lignes ; les autres géométries sont ignorées
    pub fn from_rows(rows: Vec<FeatureRow>, layer: &Layer) -> Self {
        let elevation_index = layer
            .elevation_column
            .as_ref()
            .and_then(|c| layer.columns.iter().position(|col| col == c));

        let mut cloud = Self::default();
        let mut skipped = 0usize;

        for row in rows {
            let positions = match row.geometry.value {
                geojson::Value::Point(p) => vec![p],
                geojson::Value::MultiPoint(ps) => ps,
                _ => {
                    skipped += 1;
                    continue;
                }
            };
            for position in positions {
                if position.len() < 2 {
                    skipped += 1;
                    continue;
                }
                let z = elevation(&position, &row.attributes, elevation_index);
                cloud.points.push([position[0], position[1], z]);
                cloud.attributes.push(row.attributes.clone());
            }
        }

        if skipped > 0 {
            warn!(layer = %layer.name, skipped, "Non-point terrain features ignored");
        }

        cloud
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Altitude d'un point : Z, sinon colonne d'altitude, sinon 0
pub fn elevation(position: &[f64], attributes: &[Value], elevation_index: Option<usize>) -> f64 {
    if let Some(z) = position.get(2) {
        return *z;
    }

    match elevation_index.and_then(|i| attributes.get(i)) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => fast_float::parse::<f64, _>(s.trim()).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Transpose les attributs : une liste de valeurs par colonne
pub fn transpose_attributes(columns: &[String], rows: &[Vec<Value>]) -> JsonObject {
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let values = rows
                .iter()
                .map(|row| row.get(i).cloned().unwrap_or(Value::Null))
                .collect();
            (column.clone(), Value::Array(values))
        })
        .collect()
}

/// Triangulation de Delaunay des points (x, y).
///
/// Les points confondus partagent le sommet du premier inséré. Moins de
/// trois points, ou des points alignés, ne donnent aucun triangle.
#[cfg(feature = "terrain")]
pub fn triangulate(points: &[[f64; 3]]) -> Result<Vec<[usize; 3]>, TerrainError> {
    use spade::{DelaunayTriangulation, Point2, Triangulation};

    let mut triangulation: DelaunayTriangulation<Point2<f64>> = DelaunayTriangulation::new();
    // index de sommet spade -> index du point d'origine
    let mut vertex_to_point: Vec<usize> = Vec::with_capacity(points.len());

    for (index, p) in points.iter().enumerate() {
        let handle = triangulation
            .insert(Point2::new(p[0], p[1]))
            .map_err(|e| TerrainError::InvalidPoint {
                index,
                reason: format!("{:?}", e),
            })?;
        if handle.index() == vertex_to_point.len() {
            vertex_to_point.push(index);
        }
    }

    Ok(triangulation
        .inner_faces()
        .map(|face| {
            let [a, b, c] = face.vertices();
            [
                vertex_to_point[a.fix().index()],
                vertex_to_point[b.fix().index()],
                vertex_to_point[c.fix().index()],
            ]
        })
        .collect())
}

/// Maillage complet d'un semis de points
#[cfg(feature = "terrain")]
pub fn build_mesh(cloud: PointCloud, columns: &[String]) -> Result<TerrainMesh, TerrainError> {
    let faces = triangulate(&cloud.points)?;
    Ok(TerrainMesh {
        properties: transpose_attributes(columns, &cloud.attributes),
        coordinates: cloud.points,
        faces,
    })
}
