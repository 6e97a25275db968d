//! Batch repair of records parked in the "Unknown" neighborhood.

use std::fmt;
use std::time::{Duration, Instant};

use arbor_core::spatial::{padded_extent, EXTENT_BUFFER_DEGREES};
use arbor_core::SENTINEL_NEIGHBORHOOD_ID;
use arbor_storage::{CatalogStore, CatalogTx, RecordAssignment, RecordSelection, StoreError};
use tracing::{info, info_span, Instrument};

use crate::reconcile::{
    locality_comment, neighborhood_comment, MatchCounts, Placeholders, RegionMatch, RegionMatcher,
};

#[derive(Debug, Clone)]
pub struct RepairOptions {
    pub target_neighborhood_id: i64,
    pub batch_size: usize,
    pub limit: Option<u64>,
    pub dry_run: bool,
    pub stats_only: bool,
    /// Also revisit records that already carry a system comment.
    pub all_records: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            target_neighborhood_id: SENTINEL_NEIGHBORHOOD_ID,
            batch_size: 500,
            limit: None,
            dry_run: false,
            stats_only: false,
            all_records: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepairReport {
    /// Records matching the selection before the limit applies.
    pub found: u64,
    pub limit: Option<u64>,
    pub processed: u64,
    pub matches: MatchCounts,
    pub elapsed: Duration,
    pub dry_run: bool,
    pub stats_only: bool,
}

impl RepairReport {
    pub fn records_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.processed as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Found {} biodiversity records with unknown neighborhood to process",
            self.found
        )?;
        if self.stats_only {
            return Ok(());
        }
        writeln!(f)?;
        if let Some(limit) = self.limit {
            writeln!(f, "Limiting to {limit} records")?;
        }
        writeln!(
            f,
            "Processing complete in {:.2} seconds:",
            self.elapsed.as_secs_f64()
        )?;
        writeln!(f, "  - Total processed: {}", self.processed)?;
        writeln!(f, "  - Matched at neighborhood level: {}", self.matches.neighborhood)?;
        writeln!(f, "  - Matched at locality level: {}", self.matches.locality)?;
        writeln!(
            f,
            "  - Placeholder neighborhoods created: {}",
            self.matches.placeholders_created
        )?;
        writeln!(f, "  - Unmatched: {}", self.matches.unmatched)?;
        write!(f, "  - Throughput: {:.1} records/sec", self.records_per_sec())?;
        if self.dry_run {
            write!(f, "\nDRY RUN: no changes were saved")?;
        }
        Ok(())
    }
}

/// Re-examines records assigned to the target neighborhood and moves them to the
/// neighborhood, or locality placeholder, that contains them.
///
/// Each batch commits on its own, so progress survives a later failure.
pub async fn repair_neighborhoods<S: CatalogStore>(
    store: &S,
    options: &RepairOptions,
) -> Result<RepairReport, StoreError> {
    let started = Instant::now();
    let span = info_span!(
        "repair_neighborhoods",
        target = options.target_neighborhood_id,
        dry_run = options.dry_run
    );

    async {
        let mut report = RepairReport {
            limit: options.limit,
            dry_run: options.dry_run,
            stats_only: options.stats_only,
            ..RepairReport::default()
        };

        let selection = RecordSelection {
            neighborhood_id: options.target_neighborhood_id,
            include_commented: options.all_records,
            limit: options.limit,
        };
        let mut tx = store.begin().await?;
        report.found = tx.count_selected(selection).await?;
        info!(
            "Found {} biodiversity records with unknown neighborhood to process",
            report.found
        );
        if options.stats_only || report.found == 0 {
            report.elapsed = started.elapsed();
            return Ok(report);
        }
        if let Some(limit) = options.limit {
            info!("Limiting to {limit} records");
        }

        let records = tx.select_records(selection).await?;

        let extent = padded_extent(records.iter().map(|r| &r.location), EXTENT_BUFFER_DEGREES);
        let matcher = RegionMatcher::new(
            tx.neighborhood_shapes(extent).await?,
            tx.locality_shapes(extent).await?,
            options.target_neighborhood_id,
        );
        drop(tx);
        let (hoods, localities) = matcher.candidate_counts();
        info!(neighborhoods = hoods, localities, "candidate boundaries loaded");

        let mut placeholders = Placeholders::new();
        let total = records.len();
        for batch in records.chunks(options.batch_size.max(1)) {
            let mut tx = store.begin().await?;
            let mut updates = Vec::with_capacity(batch.len());

            for record in batch {
                let assignment = match matcher.locate(&record.location) {
                    RegionMatch::Neighborhood(hood) => {
                        report.matches.neighborhood += 1;
                        Some((hood.id, neighborhood_comment(&hood.name)))
                    }
                    RegionMatch::Locality(locality) => {
                        let placeholder = placeholders
                            .resolve(&mut tx, locality.id, &locality.name, !options.dry_run)
                            .await?;
                        report.matches.locality += 1;
                        if placeholder.created {
                            report.matches.placeholders_created += 1;
                        }
                        Some((
                            placeholder.neighborhood_id,
                            locality_comment(&placeholder.name, &locality.name),
                        ))
                    }
                    RegionMatch::Unmatched => {
                        report.matches.unmatched += 1;
                        None
                    }
                };
                if let Some((neighborhood_id, system_comment)) = assignment {
                    updates.push(RecordAssignment {
                        record_id: record.id,
                        neighborhood_id,
                        system_comment,
                    });
                }
            }

            if !options.dry_run {
                tx.reassign_records(&updates).await?;
                tx.commit().await?;
            }

            report.processed += batch.len() as u64;
            let secs = started.elapsed().as_secs_f64();
            let rate = if secs > 0.0 {
                report.processed as f64 / secs
            } else {
                0.0
            };
            info!(
                "Processed {}/{} records ({:.1} records/sec)",
                report.processed, total, rate
            );
        }

        report.elapsed = started.elapsed();
        Ok::<_, StoreError>(report)
    }
    .instrument(span)
    .await
}
