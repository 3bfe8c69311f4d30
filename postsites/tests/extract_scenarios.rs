//! Scénarios d'extraction sur une source d'entités en mémoire
//!
//! Le filtre de distance (`ST_DWithin`) est approché par la distance entre
//! rectangles englobants, exacte pour les géométries utilisées ici.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use geo::BoundingRect;
use geojson::{Geometry, Value as GeoValue};
use serde_json::{json, Value};

use postsites::store::{FeatureRow, FeatureSource, LayerQuery, QueryKind};
use postsites::{extract_site, ConfigError, Configuration, ExtractError, Layer};

struct Record {
    id: i64,
    geometry: Geometry,
    properties: HashMap<String, Value>,
}

#[derive(Default)]
struct MemorySource {
    tables: RefCell<HashMap<String, Vec<Record>>>,
    failing: HashSet<String>,
    disconnected: HashSet<String>,
    failing_other_sites: bool,
    queries: Cell<usize>,
    queried_tables: RefCell<Vec<String>>,
}

impl MemorySource {
    fn insert(&self, table: &str, id: i64, geometry: GeoValue, properties: Value) {
        let properties = properties
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        self.tables
            .borrow_mut()
            .entry(table.to_string())
            .or_default()
            .push(Record {
                id,
                geometry: Geometry::new(geometry),
                properties,
            });
    }

    fn row(record: &Record, columns: &[String]) -> FeatureRow {
        FeatureRow {
            geometry: record.geometry.clone(),
            attributes: columns
                .iter()
                .map(|c| record.properties.get(c).cloned().unwrap_or(Value::Null))
                .collect(),
        }
    }
}

fn rect_distance(a: &Geometry, b: &Geometry) -> f64 {
    let a = geo::Geometry::<f64>::try_from(a.value.clone())
        .unwrap()
        .bounding_rect()
        .unwrap();
    let b = geo::Geometry::<f64>::try_from(b.value.clone())
        .unwrap()
        .bounding_rect()
        .unwrap();
    let dx = (a.min().x - b.max().x).max(b.min().x - a.max().x).max(0.0);
    let dy = (a.min().y - b.max().y).max(b.min().y - a.max().y).max(0.0);
    dx.hypot(dy)
}

impl FeatureSource for MemorySource {
    async fn fetch(&self, query: &LayerQuery) -> Result<Vec<FeatureRow>, ExtractError> {
        self.queries.set(self.queries.get() + 1);
        self.queried_tables.borrow_mut().push(query.table.clone());
        // Les identifiants sont validés comme par la source PostGIS
        query.to_sql()?;

        if self.disconnected.contains(&query.table) {
            return Err(ExtractError::Connection("connection closed".into()));
        }
        if self.failing.contains(&query.table)
            || (self.failing_other_sites && query.kind == QueryKind::OtherSites)
        {
            return Err(ExtractError::Query {
                layer: query.layer.clone(),
                message: "relation does not exist".into(),
            });
        }

        let tables = self.tables.borrow();
        let records = tables.get(&query.table).map(Vec::as_slice).unwrap_or(&[]);

        if query.kind == QueryKind::Site {
            return Ok(records
                .iter()
                .filter(|r| r.id == query.site_id)
                .map(|r| Self::row(r, &query.columns))
                .collect());
        }

        let Some(site) = tables
            .get(&query.site_table)
            .and_then(|t| t.iter().find(|r| r.id == query.site_id))
        else {
            return Ok(Vec::new());
        };

        Ok(records
            .iter()
            .filter(|r| query.kind != QueryKind::OtherSites || r.id != query.site_id)
            .filter(|r| rect_distance(&r.geometry, &site.geometry) <= query.radius)
            .map(|r| Self::row(r, &query.columns))
            .collect())
    }
}

fn square(x: f64, y: f64, size: f64) -> GeoValue {
    GeoValue::Polygon(vec![vec![
        vec![x, y],
        vec![x + size, y],
        vec![x + size, y + size],
        vec![x, y + size],
        vec![x, y],
    ]])
}

fn line(from: (f64, f64), to: (f64, f64)) -> GeoValue {
    GeoValue::LineString(vec![vec![from.0, from.1], vec![to.0, to.1]])
}

/// Parcelles et routes autour du site 42 (carré de 10 m en (1000, 1000))
fn neighborhood() -> MemorySource {
    let source = MemorySource::default();
    source.insert("parcels", 42, square(1000.0, 1000.0, 10.0), json!({"owner": "Martin"}));
    source.insert("parcels", 43, square(1050.0, 1000.0, 10.0), json!({"owner": "Leroy"}));
    source.insert("parcels", 44, square(3000.0, 3000.0, 10.0), json!({"owner": "Petit"}));

    source.insert("roads", 1, line((990.0, 990.0), (1020.0, 990.0)), json!({"kind": "primary"}));
    source.insert("roads", 2, line((1100.0, 1005.0), (1150.0, 1005.0)), json!({"kind": "service"}));
    source.insert("roads", 3, line((1500.0, 1500.0), (1600.0, 1500.0)), json!({"kind": "primary"}));
    source
}

fn configuration() -> Configuration {
    let mut config = Configuration::new(vec![
        Layer::new("parcels", "parcels").with_columns(["owner"]),
        Layer::new("roads", "roads").with_columns(["kind"]),
    ]);
    config.set_site_layer("parcels").unwrap();
    config
}

fn feature_count(extract: &postsites::SiteExtract, layer: &str) -> usize {
    extract
        .collection
        .layer(layer)
        .and_then(|l| l.features())
        .map(|fc| fc.features.len())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_site_with_roads_in_radius() {
    let source = neighborhood();
    let mut config = configuration();
    config.include_nearby_sites = false;

    let extract = extract_site(&source, &config, 42).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site", "roads"]);
    assert_eq!(feature_count(&extract, "site"), 1);
    assert_eq!(feature_count(&extract, "roads"), 2);
    assert!(extract.is_complete());
}

#[tokio::test]
async fn test_site_is_centered_on_origin() {
    let source = neighborhood();
    let extract = extract_site(&source, &configuration(), 42).await.unwrap();

    let site = &extract.collection.layer("site").unwrap().features().unwrap().features[0];
    let centroid = postsites::extract::centroid_of(site.geometry.as_ref().unwrap()).unwrap();
    assert!(centroid.0.abs() < 1e-9);
    assert!(centroid.1.abs() < 1e-9);

    let road = &extract.collection.layer("roads").unwrap().features().unwrap().features[0];
    assert_eq!(
        road.geometry.as_ref().unwrap().value,
        line((-15.0, -15.0), (15.0, -15.0))
    );
    assert_eq!(road.properties.as_ref().unwrap()["kind"], "primary");
}

#[tokio::test]
async fn test_other_sites_exclude_the_site() {
    let source = neighborhood();
    let extract = extract_site(&source, &configuration(), 42).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site", "othersites", "roads"]);
    let others = extract.collection.layer("othersites").unwrap().features().unwrap();
    assert_eq!(others.features.len(), 1);
    assert_eq!(others.features[0].properties.as_ref().unwrap()["owner"], "Leroy");
}

#[tokio::test]
async fn test_isolated_site_has_no_other_sites_layer() {
    let source = neighborhood();
    let extract = extract_site(&source, &configuration(), 44).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site"]);
}

#[tokio::test]
async fn test_missing_site() {
    let source = neighborhood();
    let err = extract_site(&source, &configuration(), 7).await.unwrap_err();

    assert!(matches!(err, ExtractError::SiteNotFound { id: 7, .. }));
}

#[tokio::test]
async fn test_duplicate_site_id() {
    let source = neighborhood();
    source.insert("parcels", 42, square(0.0, 0.0, 1.0), json!({}));

    let err = extract_site(&source, &configuration(), 42).await.unwrap_err();
    assert!(matches!(err, ExtractError::AmbiguousSite { count: 2, .. }));
}

#[tokio::test]
async fn test_failing_layer_is_recorded() {
    let mut source = neighborhood();
    source.failing.insert("roads".into());

    let extract = extract_site(&source, &configuration(), 42).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site", "othersites"]);
    assert_eq!(extract.failures.len(), 1);
    assert_eq!(extract.failures[0].layer, "roads");
}

#[tokio::test]
async fn test_failing_other_sites_is_recorded_under_its_own_name() {
    let mut source = neighborhood();
    source.failing_other_sites = true;

    let extract = extract_site(&source, &configuration(), 42).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site", "roads"]);
    assert_eq!(extract.failures.len(), 1);
    assert_eq!(extract.failures[0].layer, "othersites");
}

#[tokio::test]
async fn test_site_without_geometry_is_empty_not_missing() {
    let source = neighborhood();
    source.insert("parcels", 50, GeoValue::GeometryCollection(vec![]), json!({}));

    let err = extract_site(&source, &configuration(), 50).await.unwrap_err();
    assert!(matches!(err, ExtractError::EmptySite { id: 50 }));
}

#[tokio::test]
async fn test_connection_loss_is_fatal() {
    let mut source = neighborhood();
    source.disconnected.insert("roads".into());

    let err = extract_site(&source, &configuration(), 42).await.unwrap_err();
    assert!(matches!(err, ExtractError::Connection(_)));
}

#[tokio::test]
async fn test_invalid_configuration_runs_no_query() {
    let source = neighborhood();
    let config = Configuration::new(vec![Layer::new("parcels", "parcels")]);

    let err = extract_site(&source, &config, 42).await.unwrap_err();
    assert!(matches!(err, ExtractError::Config(ConfigError::NoSiteLayer)));
    assert_eq!(source.queries.get(), 0);
}

#[tokio::test]
async fn test_force_2d_drops_z() {
    let source = MemorySource::default();
    source.insert("parcels", 1, GeoValue::Point(vec![10.0, 20.0, 300.0]), json!({}));
    source.insert("roads", 1, line((0.0, 20.0), (20.0, 20.0)), json!({}));

    let mut config = configuration();
    config.force_2d = true;
    let extract = extract_site(&source, &config, 1).await.unwrap();

    let site = &extract.collection.layer("site").unwrap().features().unwrap().features[0];
    assert_eq!(site.geometry.as_ref().unwrap().value, GeoValue::Point(vec![0.0, 0.0]));
}

#[cfg(feature = "terrain")]
#[tokio::test]
async fn test_terrain_mesh() {
    let source = neighborhood();
    for (i, (x, y, z)) in [
        (990.0, 990.0, 12.0),
        (1020.0, 990.0, 13.0),
        (1020.0, 1020.0, 15.0),
        (990.0, 1020.0, 14.0),
    ]
    .into_iter()
    .enumerate()
    {
        source.insert(
            "elevation",
            i as i64 + 1,
            GeoValue::Point(vec![x, y, z]),
            json!({"source": "survey"}),
        );
    }

    let mut config = configuration();
    config.include_nearby_sites = false;
    config
        .layers
        .push(Layer::new("terrain", "elevation").with_columns(["source"]));
    config.set_terrain_layer("terrain").unwrap();

    let extract = extract_site(&source, &config, 42).await.unwrap();
    assert_eq!(extract.collection.names(), vec!["site", "roads", "terrain"]);

    let mesh = extract.collection.layer("terrain").unwrap().mesh().unwrap();
    assert_eq!(mesh.coordinates.len(), 4);
    assert_eq!(mesh.coordinates[0], [-15.0, -15.0, 12.0]);
    assert_eq!(mesh.faces.len(), 2);
    assert!(mesh.faces.iter().flatten().all(|&i| i < 4));
    assert_eq!(mesh.properties["source"], json!(["survey", "survey", "survey", "survey"]));

    let json = serde_json::to_value(&extract.collection).unwrap();
    assert_eq!(json["type"], "LayerCollection");
    assert_eq!(json["layers"][2]["contents"]["type"], "Mesh");
}

#[cfg(not(feature = "terrain"))]
#[tokio::test]
async fn test_terrain_skipped_without_feature() {
    let source = neighborhood();
    source.insert(
        "elevation",
        1,
        GeoValue::Point(vec![1000.0, 1000.0, 12.0]),
        json!({}),
    );

    let mut config = configuration();
    config.include_nearby_sites = false;
    config.layers.push(Layer::new("terrain", "elevation"));
    config.set_terrain_layer("terrain").unwrap();

    let extract = extract_site(&source, &config, 42).await.unwrap();

    assert_eq!(extract.collection.names(), vec!["site", "roads"]);
    assert!(extract.failures.is_empty());
    assert!(!source.queried_tables.borrow().contains(&"elevation".to_string()));
    assert_eq!(source.queries.get(), 2);
}
