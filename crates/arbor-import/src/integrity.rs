//! Post-import foreign-key scan. Findings are reported, never enforced.

use std::fmt;

use arbor_storage::{CatalogStore, CatalogTable, CatalogTx, ForeignKey, StoreError};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct OrphanCount {
    pub child: &'static str,
    pub column: &'static str,
    pub parent: &'static str,
    pub count: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub orphans: Vec<OrphanCount>,
    /// Records whose site and neighborhood belong to different localities.
    pub locality_mismatches: u64,
    /// Set when the scan itself could not run.
    pub scan_error: Option<String>,
}

impl IntegrityReport {
    pub fn failed(err: &StoreError) -> Self {
        Self {
            scan_error: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn is_clean(&self) -> bool {
        self.scan_error.is_none()
            && self.locality_mismatches == 0
            && self.orphans.iter().all(|o| o.count == 0)
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Integrity check:")?;
        if let Some(err) = &self.scan_error {
            return write!(f, "  Not completed: {err}");
        }
        for orphan in &self.orphans {
            writeln!(
                f,
                "  Found {} invalid {}(s) in {}",
                orphan.count, orphan.column, orphan.child
            )?;
        }
        write!(
            f,
            "  Found {} record(s) whose site and neighborhood are in different localities",
            self.locality_mismatches
        )
    }
}

pub async fn scan<T: CatalogTx>(tx: &mut T) -> Result<IntegrityReport, StoreError> {
    let mut report = IntegrityReport::default();
    for link in ForeignKey::ALL {
        let count = tx.count_orphans(link).await?;
        if count > 0 {
            warn!(child = %link.child(), column = link.column(), count, "orphaned rows");
        }
        report.orphans.push(OrphanCount {
            child: link.child().label(),
            column: link.column(),
            parent: link.parent().label(),
            count,
        });
    }
    report.locality_mismatches = tx.count_locality_mismatches().await?;
    info!(clean = report.is_clean(), "integrity scan finished");
    Ok(report)
}

/// Runs the scan in its own read-only transaction.
pub async fn check_store<S: CatalogStore>(store: &S) -> Result<IntegrityReport, StoreError> {
    let mut tx = store.begin().await?;
    scan(&mut tx).await
}

/// Moves every import table's id sequence past its largest explicit id.
pub async fn reset_sequences<S: CatalogStore>(store: &S) -> Result<(), StoreError> {
    let mut tx = store.begin().await?;
    for table in CatalogTable::IMPORT_TARGETS {
        tx.reset_sequence(table).await?;
    }
    tx.commit().await?;
    info!("id sequences reset");
    Ok(())
}
