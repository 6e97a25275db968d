use std::path::PathBuf;

use anyhow::{bail, Result};
use arbor_core::SENTINEL_NEIGHBORHOOD_ID;
use arbor_import::{ImportConfig, RepairOptions};
use arbor_sources::{SourceManifest, SourceSet};
use arbor_storage::PgCatalog;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "arbor-cli")]
#[command(about = "Arbor biodiversity catalog command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bulk-load the catalog from the municipal dataset.
    Import(ImportArgs),
    /// Reassign records parked in the "Unknown" neighborhood by location.
    FixNeighborhoods(RepairArgs),
    /// Apply database migrations.
    Migrate,
    /// Report orphaned references and locality mismatches.
    Integrity,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// Local dataset directory holding json/ and csv/ subdirectories.
    #[arg(long, conflicts_with = "manifest")]
    dir: Option<PathBuf>,
    /// YAML file mapping each source to a URL.
    #[arg(long)]
    manifest: Option<PathBuf>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    measurements_chunk_size: Option<usize>,
    #[arg(long)]
    climate_chunk_size: Option<usize>,
    /// Run every phase against an in-memory catalog and discard the result.
    #[arg(long)]
    validate_only: bool,
}

#[derive(Debug, Args)]
struct RepairArgs {
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = 500)]
    batch_size: usize,
    #[arg(long)]
    limit: Option<u64>,
    #[arg(long, default_value_t = SENTINEL_NEIGHBORHOOD_ID)]
    neighborhood_id: i64,
    /// Count the affected records and stop.
    #[arg(long)]
    stats_only: bool,
    /// Include records that already carry a system comment.
    #[arg(long)]
    all_records: bool,
}

impl ImportArgs {
    fn sources(&self) -> Result<SourceSet> {
        match (&self.dir, &self.manifest) {
            (Some(dir), None) => Ok(SourceSet::local(dir)),
            (None, Some(manifest)) => Ok(SourceSet::remote(&SourceManifest::load(manifest)?)),
            _ => bail!("pass either --dir or --manifest"),
        }
    }

    fn config(&self) -> ImportConfig {
        let mut config = ImportConfig::from_env();
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(size) = self.measurements_chunk_size {
            config.measurements_chunk_size = size;
        }
        if let Some(size) = self.climate_chunk_size {
            config.climate_chunk_size = size;
        }
        config
    }
}

impl From<&RepairArgs> for RepairOptions {
    fn from(args: &RepairArgs) -> Self {
        RepairOptions {
            target_neighborhood_id: args.neighborhood_id,
            batch_size: args.batch_size.max(1),
            limit: args.limit,
            dry_run: args.dry_run,
            stats_only: args.stats_only,
            all_records: args.all_records,
        }
    }
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| ImportConfig::default().database_url)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Import(args) => {
            let sources = args.sources()?;
            let config = args.config();
            tracing::info!(
                validate_only = args.validate_only,
                batch_size = config.batch_size,
                anchor = %config.anchor_municipality,
                "starting import"
            );
            let summary = if args.validate_only {
                arbor_import::validate_import(config, &sources).await?
            } else {
                arbor_import::run_import(config, &sources).await?
            };
            println!("{summary}");
            if args.validate_only {
                println!("VALIDATE ONLY: nothing was written to the database");
            }
        }
        Commands::FixNeighborhoods(args) => {
            let store = PgCatalog::connect(&database_url()).await?;
            let report = arbor_import::repair_neighborhoods(&store, &RepairOptions::from(&args))
                .await?;
            println!("{report}");
        }
        Commands::Migrate => {
            let store = PgCatalog::connect(&database_url()).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Integrity => {
            let store = PgCatalog::connect(&database_url()).await?;
            let report = arbor_import::check_store(&store).await?;
            println!("{report}");
        }
    }

    Ok(())
}
