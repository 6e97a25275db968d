//! Catalog persistence seam plus remote source fetching for Arbor.

pub mod cache;
pub mod fetch;
pub mod memory;
pub mod postgres;

use std::fmt;

use arbor_core::spatial::RegionShape;
use arbor_core::{
    BiodiversityRecord, ClimateReading, Locality, Measurement, Municipality, Neighborhood,
    NewNeighborhood, NewStation, Observation, Site, Species, Station, TraitKind, TraitValue,
};
use async_trait::async_trait;
use geo::{Point, Rect};
use thiserror::Error;

pub use cache::{CachedSource, SourceCache};
pub use fetch::{BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher, ProbeOutcome};
pub use memory::{CatalogState, MemoryCatalog};
pub use postgres::PgCatalog;

pub const CRATE_NAME: &str = "arbor-storage";

/// Tables written by the bulk import, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CatalogTable {
    Locality,
    Neighborhood,
    Site,
    Family,
    Genus,
    Species,
    FunctionalGroup,
    Trait,
    TraitValue,
    BiodiversityRecord,
    Measurement,
    Observation,
    Station,
    Climate,
}

impl CatalogTable {
    pub const IMPORT_TARGETS: [CatalogTable; 14] = [
        CatalogTable::Locality,
        CatalogTable::Neighborhood,
        CatalogTable::Site,
        CatalogTable::Family,
        CatalogTable::Genus,
        CatalogTable::Species,
        CatalogTable::FunctionalGroup,
        CatalogTable::Trait,
        CatalogTable::TraitValue,
        CatalogTable::BiodiversityRecord,
        CatalogTable::Measurement,
        CatalogTable::Observation,
        CatalogTable::Station,
        CatalogTable::Climate,
    ];

    /// Entity name used in reports.
    pub fn label(self) -> &'static str {
        match self {
            CatalogTable::Locality => "Locality",
            CatalogTable::Neighborhood => "Neighborhood",
            CatalogTable::Site => "Site",
            CatalogTable::Family => "Family",
            CatalogTable::Genus => "Genus",
            CatalogTable::Species => "Species",
            CatalogTable::FunctionalGroup => "FunctionalGroup",
            CatalogTable::Trait => "Trait",
            CatalogTable::TraitValue => "TraitValue",
            CatalogTable::BiodiversityRecord => "BiodiversityRecord",
            CatalogTable::Measurement => "Measurement",
            CatalogTable::Observation => "Observation",
            CatalogTable::Station => "Station",
            CatalogTable::Climate => "Climate",
        }
    }

    pub fn table_name(self) -> &'static str {
        match self {
            CatalogTable::Locality => "localities",
            CatalogTable::Neighborhood => "neighborhoods",
            CatalogTable::Site => "sites",
            CatalogTable::Family => "families",
            CatalogTable::Genus => "genera",
            CatalogTable::Species => "species",
            CatalogTable::FunctionalGroup => "functional_groups",
            CatalogTable::Trait => "traits",
            CatalogTable::TraitValue => "trait_values",
            CatalogTable::BiodiversityRecord => "biodiversity_records",
            CatalogTable::Measurement => "measurements",
            CatalogTable::Observation => "observations",
            CatalogTable::Station => "stations",
            CatalogTable::Climate => "climate_readings",
        }
    }
}

impl fmt::Display for CatalogTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Foreign-key relationships covered by the post-import integrity scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForeignKey {
    NeighborhoodLocality,
    RecordSite,
    RecordSpecies,
    RecordNeighborhood,
    ObservationRecord,
    MeasurementRecord,
}

impl ForeignKey {
    pub const ALL: [ForeignKey; 6] = [
        ForeignKey::NeighborhoodLocality,
        ForeignKey::RecordSite,
        ForeignKey::RecordSpecies,
        ForeignKey::RecordNeighborhood,
        ForeignKey::ObservationRecord,
        ForeignKey::MeasurementRecord,
    ];

    pub fn child(self) -> CatalogTable {
        match self {
            ForeignKey::NeighborhoodLocality => CatalogTable::Neighborhood,
            ForeignKey::RecordSite | ForeignKey::RecordSpecies | ForeignKey::RecordNeighborhood => {
                CatalogTable::BiodiversityRecord
            }
            ForeignKey::ObservationRecord => CatalogTable::Observation,
            ForeignKey::MeasurementRecord => CatalogTable::Measurement,
        }
    }

    pub fn parent(self) -> CatalogTable {
        match self {
            ForeignKey::NeighborhoodLocality => CatalogTable::Locality,
            ForeignKey::RecordSite => CatalogTable::Site,
            ForeignKey::RecordSpecies => CatalogTable::Species,
            ForeignKey::RecordNeighborhood => CatalogTable::Neighborhood,
            ForeignKey::ObservationRecord | ForeignKey::MeasurementRecord => {
                CatalogTable::BiodiversityRecord
            }
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            ForeignKey::NeighborhoodLocality => "locality_id",
            ForeignKey::RecordSite => "site_id",
            ForeignKey::RecordSpecies => "species_id",
            ForeignKey::RecordNeighborhood => "neighborhood_id",
            ForeignKey::ObservationRecord | ForeignKey::MeasurementRecord => {
                "biodiversity_record_id"
            }
        }
    }
}

/// A record selected for neighborhood repair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordLocation {
    pub id: i64,
    pub location: Point<f64>,
}

/// New neighborhood and audit comment for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAssignment {
    pub record_id: i64,
    pub neighborhood_id: i64,
    pub system_comment: String,
}

/// Which records the repair job selects from a neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSelection {
    pub neighborhood_id: i64,
    /// Also select records that already carry a system comment.
    pub include_commented: bool,
    pub limit: Option<u64>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{table}: duplicate key {key}")]
    Conflict { table: &'static str, key: String },
    #[error("{table}: {detail} references a missing row")]
    MissingParent { table: &'static str, detail: String },
    #[error("{table}: check constraint {constraint} violated ({detail})")]
    Check {
        table: &'static str,
        constraint: String,
        detail: String,
    },
    #[error("stored geometry of {table} {id} is unreadable: {reason}")]
    Geometry {
        table: &'static str,
        id: i64,
        reason: String,
    },
}

/// Opens catalog transactions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    type Tx: CatalogTx;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One catalog transaction. Dropping it without `commit` discards every write.
///
/// Bulk inserts keep the ids carried by their rows; `create_*` and `upsert_*` calls
/// take ids from the table sequence. Upserts return the existing row's id untouched
/// when the natural key is already present.
#[async_trait]
pub trait CatalogTx: Send {
    async fn commit(self) -> Result<(), StoreError>;

    async fn find_municipality(&mut self, name: &str) -> Result<Option<Municipality>, StoreError>;
    async fn count_rows(&mut self, table: CatalogTable) -> Result<u64, StoreError>;

    async fn insert_localities(&mut self, rows: &[Locality]) -> Result<u64, StoreError>;
    async fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError>;
    async fn insert_neighborhoods(&mut self, rows: &[Neighborhood]) -> Result<u64, StoreError>;
    async fn find_neighborhood(&mut self, id: i64) -> Result<Option<Neighborhood>, StoreError>;
    async fn find_neighborhood_by_name(
        &mut self,
        locality_id: i64,
        name: &str,
    ) -> Result<Option<Neighborhood>, StoreError>;
    async fn create_neighborhood(&mut self, new: &NewNeighborhood)
        -> Result<Neighborhood, StoreError>;
    async fn insert_sites(&mut self, rows: &[Site]) -> Result<u64, StoreError>;

    async fn upsert_family(&mut self, name: &str) -> Result<i64, StoreError>;
    async fn upsert_genus(&mut self, name: &str, family_id: i64) -> Result<i64, StoreError>;
    async fn insert_species(&mut self, rows: &[Species]) -> Result<u64, StoreError>;
    async fn upsert_functional_group(&mut self, group_id: i64) -> Result<i64, StoreError>;
    async fn upsert_trait(&mut self, kind: TraitKind) -> Result<i64, StoreError>;
    async fn insert_trait_values(&mut self, rows: &[TraitValue]) -> Result<u64, StoreError>;
    /// Points each `(species_id, functional_group_id)` species at its group.
    async fn assign_functional_groups(&mut self, pairs: &[(i64, i64)]) -> Result<u64, StoreError>;

    async fn insert_records(&mut self, rows: &[BiodiversityRecord]) -> Result<u64, StoreError>;
    async fn insert_measurements(&mut self, rows: &[Measurement]) -> Result<u64, StoreError>;
    async fn insert_observations(&mut self, rows: &[Observation]) -> Result<u64, StoreError>;
    async fn insert_stations(&mut self, rows: &[NewStation]) -> Result<Vec<Station>, StoreError>;
    async fn insert_climate(&mut self, rows: &[ClimateReading]) -> Result<u64, StoreError>;

    async fn count_orphans(&mut self, link: ForeignKey) -> Result<u64, StoreError>;
    /// Records whose site belongs to a different locality than their neighborhood.
    async fn count_locality_mismatches(&mut self) -> Result<u64, StoreError>;
    /// Moves the id sequence of `table` past its largest id.
    async fn reset_sequence(&mut self, table: CatalogTable) -> Result<(), StoreError>;

    /// How many records the selection matches before its limit applies.
    async fn count_selected(&mut self, selection: RecordSelection) -> Result<u64, StoreError>;
    /// Records with a location in the selected neighborhood, ordered by id.
    async fn select_records(
        &mut self,
        selection: RecordSelection,
    ) -> Result<Vec<RecordLocation>, StoreError>;
    /// Neighborhoods with a boundary, limited to those overlapping `extent` when given.
    async fn neighborhood_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError>;
    /// Localities with a boundary, limited to those overlapping `extent` when given.
    async fn locality_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError>;
    async fn reassign_records(&mut self, updates: &[RecordAssignment]) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_targets_cover_every_table_once() {
        let mut tables = CatalogTable::IMPORT_TARGETS.to_vec();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), CatalogTable::IMPORT_TARGETS.len());
        assert_eq!(CatalogTable::Family.to_string(), "Family");
        assert_eq!(CatalogTable::Climate.table_name(), "climate_readings");
    }

    #[test]
    fn foreign_keys_describe_child_parent_and_column() {
        let link = ForeignKey::MeasurementRecord;
        assert_eq!(link.child(), CatalogTable::Measurement);
        assert_eq!(link.parent(), CatalogTable::BiodiversityRecord);
        assert_eq!(link.column(), "biodiversity_record_id");
    }
}
