//! Point d'entrée CLI pour postsites

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::{Commands, ExtractArgs};

/// Charger des shapefiles dans PostGIS et en extraire des sites
#[derive(Parser)]
#[command(name = "postsites")]
#[command(author, version)]
#[command(about = "Charger des shapefiles dans PostGIS et extraire les couches autour d'un site")]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Scan { folder, output } => {
            info!(folder = %folder.display(), "Scanning shapefiles");
            cli::cmd_scan(&folder, &output)?;
        }
        Commands::Load {
            plan,
            srs,
            skip_failures,
            report,
            layers_out,
            db,
        } => {
            info!(plan = %plan.display(), srs = %srs, "Loading into PostGIS");
            cli::cmd_load(&plan, srs, skip_failures, report, layers_out, db).await?;
        }
        Commands::Layers { output, db } => {
            cli::cmd_layers(&output, db).await?;
        }
        Commands::Extract {
            layers,
            id,
            site_layer,
            terrain_layer,
            building_layer,
            radius,
            no_nearby,
            force_2d,
            timeout,
            output,
            db,
        } => {
            info!(site_id = id, layers = %layers.display(), radius, "Extracting site");
            let args = ExtractArgs {
                layers,
                id,
                site_layer,
                terrain_layer,
                building_layer,
                radius,
                no_nearby,
                force_2d,
                timeout,
                output,
            };
            cli::cmd_extract(args, db).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
