//! # postsites
//!
//! Extraction de sites depuis une base PostGIS alimentée par des shapefiles.
//!
//! ## Features
//!
//! - Chargement d'un plan de shapefiles dans PostGIS (via `shpscan`)
//! - Catalogue des tables et squelette de configuration de couches
//! - Extrait d'un site : couches voisines dans un rayon, recentrées sur le
//!   centroïde du site, sites voisins, maillage du terrain
//!
//! ## Usage CLI
//!
//! ```bash
//! # Scan d'un répertoire de shapefiles
//! postsites scan ./gis_data --output plan.json
//!
//! # Chargement du plan édité
//! postsites load --plan plan.json --layers-out layers.json
//!
//! # Extrait du site 42 de la couche parcels
//! postsites extract --layers layers.json --site-layer parcels --id 42 --output site.json
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod report;
pub mod store;

pub use config::{Configuration, Layer, LayerConfig, LayerEntry, LayerRole};
pub use error::{ConfigError, ExtractError};
pub use extract::{extract_site, extract_site_from_pool, LayerCollection, LayerFailure, SiteExtract};
pub use report::{LoadReport, LoadStatus};
pub use store::{create_pool, DatabaseConfig};
