//! # shpscan
//!
//! Préparation du chargement de shapefiles dans PostGIS.
//!
//! ## Features
//!
//! - Détection récursive des shapefiles d'un répertoire
//! - Lecture des projections (.prj, sinon `ogrinfo`) et déduplication
//! - Plan de chargement JSON éditable (codes EPSG, tables, rôles)
//! - Chargement via `ogr2ogr` avec politique overwrite/append par table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shpscan::{scan_directory, LoadPlan, Ogr};
//! use std::path::Path;
//!
//! let scan = scan_directory(&Ogr::default(), Path::new("./gis_data"))?;
//! println!("{} projections uniques", scan.projections.len());
//!
//! let plan = LoadPlan::from(scan);
//! plan.save(Path::new("plan.json"))?;
//! ```

pub mod error;
pub mod load;
pub mod plan;
pub mod scan;
pub mod tool;
pub mod types;

pub use error::ShpscanError;
pub use load::{
    build_requests, load_batch, plan_write_modes, FileLoadResult, FileLoadStatus, LoadOptions,
    LoadRequest, WriteMode, DEFAULT_TARGET_CRS,
};
pub use plan::{LoadPlan, PlannedTable};
pub use scan::{collect_shapefiles, scan_directory, scan_files, ProjectionRegistry};
pub use tool::{Inspection, LoadOutcome, Ogr, PgTarget, VectorTool};
pub use types::{Projection, ProjectionId, ScanFailure, ScanResult, SourceFile};
