//! Bulk import and neighborhood repair for the Arbor catalog.

pub mod config;
pub mod context;
pub mod error;
pub mod integrity;
pub mod pipeline;
pub mod reconcile;
pub mod repair;

pub use config::ImportConfig;
pub use context::ImportContext;
pub use error::ImportError;
pub use integrity::{check_store, IntegrityReport};
pub use pipeline::{ImportPipeline, ImportSummary, NoopRecordHook, RecordHook};
pub use reconcile::MatchCounts;
pub use repair::{repair_neighborhoods, RepairOptions, RepairReport};

use arbor_sources::SourceSet;
use arbor_storage::{MemoryCatalog, PgCatalog};

pub const CRATE_NAME: &str = "arbor-import";

/// Imports into the configured PostgreSQL database.
pub async fn run_import(config: ImportConfig, sources: &SourceSet) -> anyhow::Result<ImportSummary> {
    let store = PgCatalog::connect(&config.database_url).await?;
    let pipeline = ImportPipeline::new(&store, config)?;
    Ok(pipeline.run(sources).await?)
}

/// Runs the whole pipeline against an in-memory catalog seeded with the anchor
/// municipality, then discards it.
pub async fn validate_import(
    config: ImportConfig,
    sources: &SourceSet,
) -> Result<ImportSummary, ImportError> {
    let store = MemoryCatalog::with_municipality(&config.anchor_municipality);
    ImportPipeline::new(&store, config)?.run(sources).await
}

pub async fn run_import_from_env(sources: &SourceSet) -> anyhow::Result<ImportSummary> {
    run_import(ImportConfig::from_env(), sources).await
}
