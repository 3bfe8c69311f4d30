//! Définition et implémentation des commandes CLI
//!
//! - `scan` : répertoire de shapefiles -> plan de chargement JSON
//! - `load` : plan -> PostGIS (ogr2ogr)
//! - `layers` : tables de la base -> configuration de couches
//! - `extract` : extrait GeoJSON d'un site

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use tracing::{info, warn};

use postsites::config::DEFAULT_SITE_RADIUS;
use postsites::store::catalog;
use postsites::store::test_connection;
use postsites::{
    create_pool, extract_site_from_pool, Configuration, DatabaseConfig, LayerConfig, LoadReport,
};
use shpscan::{load_batch, scan_directory, LoadOptions, LoadPlan, Ogr, DEFAULT_TARGET_CRS};

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a folder of shapefiles and write an editable load plan
    Scan {
        /// Folder searched recursively for .shp files
        folder: PathBuf,

        /// Output load plan (JSON)
        #[arg(short, long, default_value = "plan.json")]
        output: PathBuf,
    },

    /// Load the files of a plan into PostGIS with ogr2ogr
    Load {
        /// Load plan produced by `scan` and edited (EPSG codes, tables)
        #[arg(short, long)]
        plan: PathBuf,

        /// Target spatial reference
        #[arg(long, default_value = DEFAULT_TARGET_CRS)]
        srs: String,

        /// Skip features that fail to load instead of failing the file
        #[arg(long)]
        skip_failures: bool,

        /// Write the load report (JSON)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the layer configuration derived from the plan
        #[arg(long)]
        layers_out: Option<PathBuf>,

        #[command(flatten)]
        db: DbArgs,
    },

    /// List the tables of the database and write a layer configuration skeleton
    Layers {
        /// Output layer configuration (JSON)
        #[arg(short, long, default_value = "layers.json")]
        output: PathBuf,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Extract the layers around a site as a GeoJSON LayerCollection
    Extract {
        /// Layer configuration (JSON)
        #[arg(short, long)]
        layers: PathBuf,

        /// Site id (ogc_fid of the site layer)
        #[arg(long)]
        id: i64,

        /// Site layer name (overrides the role in the configuration)
        #[arg(long)]
        site_layer: Option<String>,

        /// Terrain layer name (overrides the role in the configuration)
        #[arg(long)]
        terrain_layer: Option<String>,

        /// Building layer name (overrides the role in the configuration)
        #[arg(long)]
        building_layer: Option<String>,

        /// Search radius, in units of the stored spatial reference
        #[arg(long, default_value_t = DEFAULT_SITE_RADIUS)]
        radius: f64,

        /// Do not include the other sites in the radius
        #[arg(long)]
        no_nearby: bool,

        /// Drop Z coordinates (terrain excepted)
        #[arg(long)]
        force_2d: bool,

        /// Per-query timeout, in seconds
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Output file (stdout if absent)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        db: DbArgs,
    },
}

/// Surcharges de la configuration de connexion
#[derive(Args, Debug, Default)]
pub struct DbArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / postsites)
    #[arg(long)]
    database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    ssl: Option<String>,
}

impl DbArgs {
    /// Configuration de l'environnement, surchargée par les options
    pub fn database_config(self) -> DatabaseConfig {
        let mut config = DatabaseConfig::from_env();
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(database) = self.database {
            config.dbname = database;
        }
        if let Some(user) = self.user {
            config.user = user;
        }
        if let Some(password) = self.password {
            config.password = Some(password);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ssl) = self.ssl {
            match ssl.parse() {
                Ok(mode) => config.ssl_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring --ssl"),
            }
        }
        config
    }
}

/// Exécute la commande scan
pub fn cmd_scan(folder: &Path, output: &Path) -> Result<()> {
    let scan = scan_directory(&Ogr::default(), folder)
        .with_context(|| format!("Failed to scan {}", folder.display()))?;

    println!("Shapefiles: {}", scan.files.len() + scan.unresolved.len());
    println!("Unique projections: {}", scan.projections.len());
    for (index, projection) in scan.projections.iter().enumerate() {
        let count = scan.files_with(shpscan::ProjectionId(index)).count();
        match projection.authority_code() {
            Some(code) => println!("  [{}] EPSG:{} ({} files)", index, code, count),
            None => println!("  [{}] unknown EPSG ({} files)", index, count),
        }
    }
    if !scan.unresolved.is_empty() {
        println!("Without projection: {}", scan.unresolved.len());
        for file in &scan.unresolved {
            println!("  {}", file.path.display());
        }
    }
    if !scan.failures.is_empty() {
        println!("Inspection failures: {}", scan.failures.len());
        for failure in &scan.failures {
            println!("  {}: {}", failure.path.display(), failure.message);
        }
    }

    let plan = LoadPlan::from(scan);
    let unresolved_epsg = plan.projections.iter().filter(|p| p.epsg.is_none()).count();
    if unresolved_epsg > 0 {
        println!(
            "{} projection(s) need an EPSG code: edit {}",
            unresolved_epsg,
            output.display()
        );
    }

    plan.save(output)
        .with_context(|| format!("Failed to write plan {}", output.display()))?;
    info!(output = %output.display(), "Load plan written");

    Ok(())
}

/// Exécute la commande load
pub async fn cmd_load(
    plan_path: &Path,
    srs: String,
    skip_failures: bool,
    report_path: Option<PathBuf>,
    layers_out: Option<PathBuf>,
    db: DbArgs,
) -> Result<()> {
    let plan = LoadPlan::load(plan_path)
        .with_context(|| format!("Failed to read plan {}", plan_path.display()))?;
    let db_config = db.database_config();

    println!("=== Load {} ===", plan_path.display());
    println!("Files: {}", plan.loadable().count());
    println!("Target SRS: {}", srs);
    println!(
        "Database: {}@{}:{}/{}",
        db_config.user, db_config.host, db_config.port, db_config.dbname
    );

    let start = Instant::now();
    let options = LoadOptions {
        target_crs: srs.clone(),
        skip_failures,
    };
    let target = db_config.ogr_target();

    // ogr2ogr est lancé en sous-processus bloquant
    let (plan, results) = tokio::task::spawn_blocking(move || {
        let results = load_batch(&Ogr::default(), &target, &plan, &options);
        (plan, results)
    })
    .await
    .context("Load task panicked")?;

    let mut report = LoadReport::new(&srs);
    for result in results {
        report.record(result);
    }
    report.set_duration(start.elapsed());
    report.finalize();
    report.display();

    if let Some(path) = report_path {
        report.save_to_file(&path)?;
        println!("Report written to {}", path.display());
    }

    if let Some(path) = layers_out {
        LayerConfig::from_plan(&plan).save(&path)?;
        println!("Layer configuration written to {}", path.display());
    }

    println!("{}", report.summary());
    Ok(())
}

/// Crée le pool et vérifie la connexion avant tout travail
async fn connect(db_config: DatabaseConfig) -> Result<deadpool_postgres::Pool> {
    info!(
        host = %db_config.host,
        port = db_config.port,
        dbname = %db_config.dbname,
        ssl = ?db_config.ssl_mode,
        "Connecting"
    );
    let pool = create_pool(&db_config).await?;
    test_connection(&pool).await.with_context(|| {
        format!(
            "Cannot reach {}@{}:{}/{}",
            db_config.user, db_config.host, db_config.port, db_config.dbname
        )
    })?;
    Ok(pool)
}

/// Exécute la commande layers
pub async fn cmd_layers(output: &Path, db: DbArgs) -> Result<()> {
    let pool = connect(db.database_config()).await?;

    let tables = catalog::list_tables(&pool, postsites::config::DEFAULT_GEOMETRY_COLUMN).await?;
    for table in &tables {
        println!("{}: {}", table.name, table.columns.join(", "));
    }

    LayerConfig::from_tables(&tables).save(output)?;
    println!("{} tables, configuration written to {}", tables.len(), output.display());

    Ok(())
}

/// Paramètres de la commande extract
pub struct ExtractArgs {
    pub layers: PathBuf,
    pub id: i64,
    pub site_layer: Option<String>,
    pub terrain_layer: Option<String>,
    pub building_layer: Option<String>,
    pub radius: f64,
    pub no_nearby: bool,
    pub force_2d: bool,
    pub timeout: u64,
    pub output: Option<PathBuf>,
}

/// Exécute la commande extract
pub async fn cmd_extract(args: ExtractArgs, db: DbArgs) -> Result<()> {
    let layer_config = LayerConfig::load(&args.layers)?;
    let mut config = Configuration::from_layer_config(&layer_config);
    if let Some(name) = &args.site_layer {
        config.set_site_layer(name)?;
    }
    if let Some(name) = &args.terrain_layer {
        config.set_terrain_layer(name)?;
    }
    if let Some(name) = &args.building_layer {
        config.set_building_layer(name)?;
    }
    config.site_radius = args.radius;
    config.include_nearby_sites = !args.no_nearby;
    config.force_2d = args.force_2d;
    config.validate()?;

    let pool = connect(db.database_config()).await?;
    let extract = extract_site_from_pool(&pool, &config, args.id, Duration::from_secs(args.timeout))
        .await
        .with_context(|| format!("Failed to extract site {}", args.id))?;

    for failure in &extract.failures {
        warn!(layer = %failure.layer, "Layer missing from extract: {}", failure.message);
    }

    match &args.output {
        Some(path) => {
            extract.collection.write_to(path)?;
            info!(
                site_id = args.id,
                layers = ?extract.collection.names(),
                output = %path.display(),
                "Extract written"
            );
        }
        None => println!("{}", extract.collection.to_json()?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_args_override() {
        let args = DbArgs {
            host: Some("db.example".into()),
            database: Some("sites".into()),
            port: Some(6543),
            ssl: Some("require".into()),
            ..Default::default()
        };
        let config = args.database_config();
        assert_eq!(config.host, "db.example");
        assert_eq!(config.dbname, "sites");
        assert_eq!(config.port, 6543);
        assert_eq!(config.ssl_mode, postsites::store::SslMode::Require);
    }
}
