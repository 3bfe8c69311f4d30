//! Configuration des couches et des paramètres d'extraction
//!
//! Format d'entrée (JSON), indexé par nom de table :
//!
//! ```json
//! {
//!   "newyork_parcels": { "name": "parcels", "cols": ["owner"], "role": "site" },
//!   "doitt_building_01_28jul2009": { "name": "buildings", "cols": ["bin"], "color": "#aa3300" },
//!   "terrain_points": { "name": "terrain", "cols": ["elev"], "z_column": "elev", "role": "terrain" }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Rayon de recherche par défaut, dans l'unité de la projection de la base
pub const DEFAULT_SITE_RADIUS: f64 = 100.0;

/// Colonnes créées par ogr2ogr
pub const DEFAULT_ID_COLUMN: &str = "ogc_fid";
pub const DEFAULT_GEOMETRY_COLUMN: &str = "wkb_geometry";

/// Rôle d'une couche dans l'extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerRole {
    Site,
    Terrain,
    Building,
}

/// Entrée du fichier de configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerEntry {
    /// Nom affiché de la couche
    pub name: String,

    /// Colonnes attributaires à extraire, dans l'ordre
    #[serde(default)]
    pub cols: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Colonne d'altitude (couche terrain)
    #[serde(default, alias = "zColumn", skip_serializing_if = "Option::is_none")]
    pub z_column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<LayerRole>,
}

/// Fichier de configuration des couches
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LayerConfig {
    #[serde(flatten)]
    pub tables: BTreeMap<String, LayerEntry>,
}

impl LayerConfig {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read layer config: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse layer config JSON")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .context(format!("Failed to write layer config: {}", path.display()))
    }

    /// Configuration issue d'un plan de chargement (une couche par table)
    pub fn from_plan(plan: &shpscan::LoadPlan) -> Self {
        let tables = plan
            .tables()
            .into_iter()
            .map(|t| {
                let role = if t.site {
                    Some(LayerRole::Site)
                } else if t.terrain {
                    Some(LayerRole::Terrain)
                } else if t.building {
                    Some(LayerRole::Building)
                } else {
                    None
                };
                let entry = LayerEntry {
                    name: t.table.clone(),
                    cols: t.elevation_field.iter().cloned().collect(),
                    color: None,
                    z_column: t.elevation_field,
                    role,
                };
                (t.table, entry)
            })
            .collect();

        Self { tables }
    }

    /// Couches typées, dans l'ordre des noms de table
    pub fn layers(&self) -> Vec<Layer> {
        self.tables
            .iter()
            .map(|(storage_name, entry)| Layer {
                name: entry.name.clone(),
                storage_name: storage_name.clone(),
                columns: entry.cols.clone(),
                color: entry.color.clone(),
                elevation_column: entry.z_column.clone(),
            })
            .collect()
    }

    /// Nom affiché de la couche portant un rôle
    pub fn layer_with_role(&self, role: LayerRole) -> Option<&str> {
        self.tables
            .values()
            .find(|e| e.role == Some(role))
            .map(|e| e.name.as_str())
    }
}

/// Une couche interrogeable
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Nom affiché (unique dans une configuration)
    pub name: String,
    /// Table PostGIS, éventuellement qualifiée par le schéma
    pub storage_name: String,
    pub columns: Vec<String>,
    pub color: Option<String>,
    pub elevation_column: Option<String>,
}

impl Layer {
    pub fn new(name: impl Into<String>, storage_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_name: storage_name.into(),
            columns: Vec::new(),
            color: None,
            elevation_column: None,
        }
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Paramètres d'une extraction
#[derive(Debug, Clone)]
pub struct Configuration {
    pub layers: Vec<Layer>,
    pub site_layer: Option<String>,
    pub terrain_layer: Option<String>,
    pub building_layer: Option<String>,
    pub site_radius: f64,
    /// Supprime les Z (hors terrain)
    pub force_2d: bool,
    pub include_nearby_sites: bool,
    pub id_column: String,
    pub geometry_column: String,
}

impl Configuration {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            layers,
            site_layer: None,
            terrain_layer: None,
            building_layer: None,
            site_radius: DEFAULT_SITE_RADIUS,
            force_2d: false,
            include_nearby_sites: true,
            id_column: DEFAULT_ID_COLUMN.to_string(),
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
        }
    }

    /// Configuration issue d'un fichier de couches, rôles compris
    pub fn from_layer_config(config: &LayerConfig) -> Self {
        let mut cfg = Self::new(config.layers());
        cfg.site_layer = config.layer_with_role(LayerRole::Site).map(str::to_string);
        cfg.terrain_layer = config
            .layer_with_role(LayerRole::Terrain)
            .map(str::to_string);
        cfg.building_layer = config
            .layer_with_role(LayerRole::Building)
            .map(str::to_string);
        cfg
    }

    pub fn layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn set_site_layer(&mut self, name: &str) -> Result<&mut Self, ConfigError> {
        self.require(name)?;
        self.site_layer = Some(name.to_string());
        Ok(self)
    }

    pub fn set_terrain_layer(&mut self, name: &str) -> Result<&mut Self, ConfigError> {
        self.require(name)?;
        self.terrain_layer = Some(name.to_string());
        Ok(self)
    }

    pub fn set_building_layer(&mut self, name: &str) -> Result<&mut Self, ConfigError> {
        self.require(name)?;
        self.building_layer = Some(name.to_string());
        Ok(self)
    }

    fn require(&self, name: &str) -> Result<&Layer, ConfigError> {
        self.layer_by_name(name)
            .ok_or_else(|| ConfigError::UnknownLayer(name.to_string()))
    }

    /// Couche site (la configuration doit avoir été validée)
    pub fn site(&self) -> Result<&Layer, ConfigError> {
        let name = self.site_layer.as_deref().ok_or(ConfigError::NoSiteLayer)?;
        self.require(name)
    }

    pub fn terrain(&self) -> Option<&Layer> {
        self.terrain_layer
            .as_deref()
            .and_then(|name| self.layer_by_name(name))
    }

    /// Vérifie la configuration avant toute requête.
    ///
    /// Tous les identifiants SQL (tables, colonnes) sont contrôlés ici ;
    /// les requêtes ne contiennent ensuite que des noms validés.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for layer in &self.layers {
            if !names.insert(layer.name.as_str()) {
                return Err(ConfigError::DuplicateLayer(layer.name.clone()));
            }
            validate_storage_name(&layer.storage_name)?;
            for column in &layer.columns {
                validate_identifier(column)?;
            }
            if let Some(column) = &layer.elevation_column {
                if !layer.columns.contains(column) {
                    return Err(ConfigError::UnknownElevationColumn {
                        layer: layer.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        validate_identifier(&self.id_column)?;
        validate_identifier(&self.geometry_column)?;

        if !self.site_radius.is_finite() || self.site_radius < 0.0 {
            return Err(ConfigError::InvalidRadius(self.site_radius));
        }

        let site = self.site()?;
        if let Some(terrain) = &self.terrain_layer {
            self.require(terrain)?;
            if *terrain == site.name {
                return Err(ConfigError::TerrainIsSite(terrain.clone()));
            }
        }
        if let Some(building) = &self.building_layer {
            self.require(building)?;
        }

        Ok(())
    }
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"))
}

/// Identifiant SQL simple (colonne, table non qualifiée)
pub fn validate_identifier(name: &str) -> Result<(), ConfigError> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

/// Nom de table, éventuellement `schema.table`
pub fn validate_storage_name(name: &str) -> Result<(), ConfigError> {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 || parts.iter().any(|p| !identifier_regex().is_match(p)) {
        return Err(ConfigError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYERS_JSON: &str = r##"{
        "newyork_parcels": {"name": "parcels", "cols": ["owner", "landuse"], "role": "site"},
        "roads": {"name": "roads", "cols": ["name"], "color": "#333333"},
        "terrain_points": {"name": "terrain", "cols": ["elev"], "zColumn": "elev", "role": "terrain"}
    }"##;

    fn parsed() -> LayerConfig {
        serde_json::from_str(LAYERS_JSON).unwrap()
    }

    #[test]
    fn test_parse_layer_config() {
        let config = parsed();
        assert_eq!(config.tables.len(), 3);

        let layers = config.layers();
        let parcels = layers.iter().find(|l| l.name == "parcels").unwrap();
        assert_eq!(parcels.storage_name, "newyork_parcels");
        assert_eq!(parcels.columns, vec!["owner", "landuse"]);

        let terrain = layers.iter().find(|l| l.name == "terrain").unwrap();
        assert_eq!(terrain.elevation_column.as_deref(), Some("elev"));

        let roads = layers.iter().find(|l| l.name == "roads").unwrap();
        assert_eq!(roads.color.as_deref(), Some("#333333"));
    }

    #[test]
    fn test_roles_designate_layers() {
        let cfg = Configuration::from_layer_config(&parsed());
        assert_eq!(cfg.site_layer.as_deref(), Some("parcels"));
        assert_eq!(cfg.terrain_layer.as_deref(), Some("terrain"));
        assert_eq!(cfg.building_layer, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_set_building_layer() {
        let mut cfg = Configuration::from_layer_config(&parsed());
        cfg.set_building_layer("roads").unwrap();
        assert_eq!(cfg.building_layer.as_deref(), Some("roads"));
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.set_building_layer("buildings").map(|_| ()),
            Err(ConfigError::UnknownLayer("buildings".into()))
        );
    }

    #[test]
    fn test_validate_requires_site_layer() {
        let cfg = Configuration::new(vec![Layer::new("roads", "roads")]);
        assert_eq!(cfg.validate(), Err(ConfigError::NoSiteLayer));
    }

    #[test]
    fn test_set_unknown_layer() {
        let mut cfg = Configuration::new(vec![Layer::new("roads", "roads")]);
        assert_eq!(
            cfg.set_site_layer("parcels").map(|_| ()),
            Err(ConfigError::UnknownLayer("parcels".into()))
        );
    }

    #[test]
    fn test_validate_rejects_injection() {
        let mut cfg = Configuration::new(vec![
            Layer::new("parcels", "parcels"),
            Layer::new("roads", "roads; DROP TABLE parcels"),
        ]);
        cfg.set_site_layer("parcels").unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidIdentifier(_))
        ));

        let mut cfg = Configuration::new(vec![
            Layer::new("parcels", "parcels").with_columns(["owner\" OR 1=1 --"])
        ]);
        cfg.set_site_layer("parcels").unwrap();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_validate_duplicate_names() {
        let mut cfg = Configuration::new(vec![
            Layer::new("parcels", "parcels_2009"),
            Layer::new("parcels", "parcels_2010"),
        ]);
        cfg.site_layer = Some("parcels".into());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::DuplicateLayer("parcels".into()))
        );
    }

    #[test]
    fn test_validate_elevation_column_must_be_selected() {
        let mut terrain = Layer::new("terrain", "terrain_points");
        terrain.elevation_column = Some("elev".into());
        let mut cfg = Configuration::new(vec![Layer::new("parcels", "parcels"), terrain]);
        cfg.site_layer = Some("parcels".into());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnknownElevationColumn { .. })
        ));
    }

    #[test]
    fn test_validate_radius_and_terrain() {
        let mut cfg = Configuration::new(vec![Layer::new("parcels", "public.parcels")]);
        cfg.site_layer = Some("parcels".into());
        assert!(cfg.validate().is_ok());

        cfg.site_radius = -1.0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidRadius(-1.0)));

        cfg.site_radius = 50.0;
        cfg.terrain_layer = Some("parcels".into());
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TerrainIsSite("parcels".into()))
        );
    }

    #[test]
    fn test_validate_storage_name() {
        assert!(validate_storage_name("parcels").is_ok());
        assert!(validate_storage_name("nyc.parcels").is_ok());
        assert!(validate_storage_name("a.b.c").is_err());
        assert!(validate_storage_name("1parcels").is_err());
        assert!(validate_storage_name("").is_err());
    }
}
