//! In-process catalog with the same keys and constraints as the Postgres schema.
//!
//! Each transaction works on a private copy of the state and swaps it in on commit,
//! so an abandoned transaction leaves nothing behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arbor_core::spatial::{boundary_touches_extent, RegionShape};
use arbor_core::{
    BiodiversityRecord, Boundary, ClimateReading, Locality, Measurement, Municipality,
    Neighborhood, NewNeighborhood, NewStation, Observation, Site, Species, Station, TraitKind,
    TraitValue,
};
use async_trait::async_trait;
use geo::Rect;

use crate::{
    CatalogStore, CatalogTable, CatalogTx, ForeignKey, RecordAssignment, RecordLocation,
    RecordSelection, StoreError,
};

/// Full catalog contents, readable through [`MemoryCatalog::read`].
#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    pub municipalities: BTreeMap<i64, Municipality>,
    pub localities: BTreeMap<i64, Locality>,
    pub neighborhoods: BTreeMap<i64, Neighborhood>,
    pub sites: BTreeMap<i64, Site>,
    pub families: BTreeMap<i64, String>,
    /// id -> (name, family id)
    pub genera: BTreeMap<i64, (String, i64)>,
    pub species: BTreeMap<i64, Species>,
    /// id -> source group id
    pub functional_groups: BTreeMap<i64, i64>,
    pub traits: BTreeMap<i64, TraitKind>,
    pub trait_values: Vec<TraitValue>,
    pub records: BTreeMap<i64, BiodiversityRecord>,
    pub measurements: Vec<Measurement>,
    pub observations: Vec<Observation>,
    pub stations: BTreeMap<i64, Station>,
    pub climate: Vec<ClimateReading>,
    sequences: HashMap<CatalogTable, i64>,
}

impl CatalogState {
    pub fn row_count(&self, table: CatalogTable) -> u64 {
        let n = match table {
            CatalogTable::Locality => self.localities.len(),
            CatalogTable::Neighborhood => self.neighborhoods.len(),
            CatalogTable::Site => self.sites.len(),
            CatalogTable::Family => self.families.len(),
            CatalogTable::Genus => self.genera.len(),
            CatalogTable::Species => self.species.len(),
            CatalogTable::FunctionalGroup => self.functional_groups.len(),
            CatalogTable::Trait => self.traits.len(),
            CatalogTable::TraitValue => self.trait_values.len(),
            CatalogTable::BiodiversityRecord => self.records.len(),
            CatalogTable::Measurement => self.measurements.len(),
            CatalogTable::Observation => self.observations.len(),
            CatalogTable::Station => self.stations.len(),
            CatalogTable::Climate => self.climate.len(),
        };
        n as u64
    }

    fn max_id(&self, table: CatalogTable) -> i64 {
        let last = match table {
            CatalogTable::Locality => self.localities.keys().next_back(),
            CatalogTable::Neighborhood => self.neighborhoods.keys().next_back(),
            CatalogTable::Site => self.sites.keys().next_back(),
            CatalogTable::Family => self.families.keys().next_back(),
            CatalogTable::Genus => self.genera.keys().next_back(),
            CatalogTable::Species => self.species.keys().next_back(),
            CatalogTable::FunctionalGroup => self.functional_groups.keys().next_back(),
            CatalogTable::Trait => self.traits.keys().next_back(),
            CatalogTable::BiodiversityRecord => self.records.keys().next_back(),
            CatalogTable::Station => self.stations.keys().next_back(),
            CatalogTable::TraitValue
            | CatalogTable::Measurement
            | CatalogTable::Observation
            | CatalogTable::Climate => return self.row_count(table) as i64,
        };
        last.copied().unwrap_or(0)
    }

    /// Located records matching a repair selection, ignoring its limit.
    fn selected(
        &self,
        selection: RecordSelection,
    ) -> impl Iterator<Item = &BiodiversityRecord> + '_ {
        self.records
            .values()
            .filter(move |r| r.neighborhood_id == selection.neighborhood_id)
            .filter(move |r| {
                selection.include_commented
                    || r.system_comment.as_deref().map_or(true, str::is_empty)
            })
            .filter(|r| r.location.is_some())
    }

    /// Value the table sequence hands out next.
    pub fn sequence_value(&self, table: CatalogTable) -> i64 {
        self.sequences.get(&table).copied().unwrap_or(1)
    }

    /// Next value of the table sequence; explicit-id inserts do not advance it.
    fn next_id(&mut self, table: CatalogTable) -> i64 {
        let next = self.sequences.entry(table).or_insert(1);
        let id = *next;
        *next += 1;
        id
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    shared: Arc<Mutex<CatalogState>>,
    broken_scans: Arc<AtomicBool>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding only the anchor municipality, as the seed migration leaves it.
    pub fn with_municipality(name: &str) -> Self {
        let catalog = Self::new();
        catalog.write(|state| {
            let id = state.municipalities.keys().next_back().copied().unwrap_or(0) + 1;
            state.municipalities.insert(
                id,
                Municipality {
                    id,
                    name: name.to_string(),
                },
            );
        });
        catalog
    }

    pub fn read<R>(&self, f: impl FnOnce(&CatalogState) -> R) -> R {
        let guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Makes every later orphan and mismatch scan fail with a database error.
    pub fn break_integrity_scans(&self) {
        self.broken_scans.store(true, Ordering::SeqCst);
    }

    /// Direct mutation outside a transaction, for seeding.
    pub fn write<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        let mut guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let working = self.read(Clone::clone);
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            working,
            broken_scans: self.broken_scans.load(Ordering::SeqCst),
        })
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<CatalogState>>,
    working: CatalogState,
    broken_scans: bool,
}

impl MemoryTx {
    fn scan_available(&self) -> Result<(), StoreError> {
        if self.broken_scans {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "integrity scan unavailable".to_string(),
            )));
        }
        Ok(())
    }
}

fn conflict(table: CatalogTable, key: impl ToString) -> StoreError {
    StoreError::Conflict {
        table: table.table_name(),
        key: key.to_string(),
    }
}

fn missing(table: CatalogTable, column: &'static str, value: i64) -> StoreError {
    StoreError::MissingParent {
        table: table.table_name(),
        detail: format!("{column}={value}"),
    }
}

fn shapes<'a>(
    rows: impl Iterator<Item = (i64, &'a str, Option<i64>, Option<&'a Boundary>)>,
    extent: Option<Rect<f64>>,
) -> Vec<RegionShape> {
    rows.filter_map(|(id, name, parent_id, boundary)| {
        let boundary = boundary?;
        if let Some(extent) = &extent {
            if !boundary_touches_extent(boundary, extent) {
                return None;
            }
        }
        Some(RegionShape {
            id,
            name: name.to_string(),
            parent_id,
            boundary: boundary.clone(),
        })
    })
    .collect()
}

#[async_trait]
impl CatalogTx for MemoryTx {
    async fn commit(self) -> Result<(), StoreError> {
        let mut guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = self.working;
        Ok(())
    }

    async fn find_municipality(&mut self, name: &str) -> Result<Option<Municipality>, StoreError> {
        Ok(self
            .working
            .municipalities
            .values()
            .find(|m| m.name == name)
            .cloned())
    }

    async fn count_rows(&mut self, table: CatalogTable) -> Result<u64, StoreError> {
        Ok(self.working.row_count(table))
    }

    async fn insert_localities(&mut self, rows: &[Locality]) -> Result<u64, StoreError> {
        let table = CatalogTable::Locality;
        for row in rows {
            let state = &mut self.working;
            if state.localities.contains_key(&row.id) {
                return Err(conflict(table, format!("id={}", row.id)));
            }
            if state
                .localities
                .values()
                .any(|l| l.name == row.name && l.municipality_id == row.municipality_id)
            {
                return Err(conflict(table, format!("name={}", row.name)));
            }
            if !state.municipalities.contains_key(&row.municipality_id) {
                return Err(missing(table, "municipality_id", row.municipality_id));
            }
            state.localities.insert(row.id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn find_locality(&mut self, id: i64) -> Result<Option<Locality>, StoreError> {
        Ok(self.working.localities.get(&id).cloned())
    }

    async fn insert_neighborhoods(&mut self, rows: &[Neighborhood]) -> Result<u64, StoreError> {
        let table = CatalogTable::Neighborhood;
        for row in rows {
            let state = &mut self.working;
            if state.neighborhoods.contains_key(&row.id) {
                return Err(conflict(table, format!("id={}", row.id)));
            }
            if state
                .neighborhoods
                .values()
                .any(|n| n.name == row.name && n.locality_id == row.locality_id)
            {
                return Err(conflict(table, format!("name={}", row.name)));
            }
            if !state.localities.contains_key(&row.locality_id) {
                return Err(missing(table, "locality_id", row.locality_id));
            }
            state.neighborhoods.insert(row.id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn find_neighborhood(&mut self, id: i64) -> Result<Option<Neighborhood>, StoreError> {
        Ok(self.working.neighborhoods.get(&id).cloned())
    }

    async fn find_neighborhood_by_name(
        &mut self,
        locality_id: i64,
        name: &str,
    ) -> Result<Option<Neighborhood>, StoreError> {
        Ok(self
            .working
            .neighborhoods
            .values()
            .find(|n| n.locality_id == locality_id && n.name == name)
            .cloned())
    }

    async fn create_neighborhood(
        &mut self,
        new: &NewNeighborhood,
    ) -> Result<Neighborhood, StoreError> {
        let id = self.working.next_id(CatalogTable::Neighborhood);
        let row = Neighborhood {
            id,
            name: new.name.clone(),
            locality_id: new.locality_id,
            boundary: None,
            calculated_area_m2: None,
        };
        self.insert_neighborhoods(std::slice::from_ref(&row)).await?;
        Ok(row)
    }

    async fn insert_sites(&mut self, rows: &[Site]) -> Result<u64, StoreError> {
        let table = CatalogTable::Site;
        for row in rows {
            let state = &mut self.working;
            if state.sites.contains_key(&row.id) {
                return Err(conflict(table, format!("id={}", row.id)));
            }
            if let Some(locality_id) = row.locality_id {
                if !state.localities.contains_key(&locality_id) {
                    return Err(missing(table, "locality_id", locality_id));
                }
                if state
                    .sites
                    .values()
                    .any(|s| s.name == row.name && s.locality_id == Some(locality_id))
                {
                    return Err(conflict(table, format!("name={}", row.name)));
                }
            } else if let (Some(zone), Some(subzone)) = (row.zone, row.subzone) {
                // nulls stay distinct, as in the partial unique index
                if state.sites.values().any(|s| {
                    s.locality_id.is_none()
                        && s.name == row.name
                        && s.zone == Some(zone)
                        && s.subzone == Some(subzone)
                }) {
                    return Err(conflict(
                        table,
                        format!("name={}, zone={zone}, subzone={subzone}", row.name),
                    ));
                }
            }
            state.sites.insert(row.id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_family(&mut self, name: &str) -> Result<i64, StoreError> {
        if let Some((id, _)) = self.working.families.iter().find(|(_, n)| n.as_str() == name) {
            return Ok(*id);
        }
        let id = self.working.next_id(CatalogTable::Family);
        if self.working.families.contains_key(&id) {
            return Err(conflict(CatalogTable::Family, format!("id={id}")));
        }
        self.working.families.insert(id, name.to_string());
        Ok(id)
    }

    async fn upsert_genus(&mut self, name: &str, family_id: i64) -> Result<i64, StoreError> {
        if let Some((id, _)) = self.working.genera.iter().find(|(_, (n, _))| n == name) {
            return Ok(*id);
        }
        if !self.working.families.contains_key(&family_id) {
            return Err(missing(CatalogTable::Genus, "family_id", family_id));
        }
        let id = self.working.next_id(CatalogTable::Genus);
        if self.working.genera.contains_key(&id) {
            return Err(conflict(CatalogTable::Genus, format!("id={id}")));
        }
        self.working.genera.insert(id, (name.to_string(), family_id));
        Ok(id)
    }

    async fn insert_species(&mut self, rows: &[Species]) -> Result<u64, StoreError> {
        let table = CatalogTable::Species;
        for row in rows {
            let state = &mut self.working;
            if state.species.contains_key(&row.id) {
                return Err(conflict(table, format!("id={}", row.id)));
            }
            if !state.genera.contains_key(&row.genus_id) {
                return Err(missing(table, "genus_id", row.genus_id));
            }
            if state
                .species
                .values()
                .any(|s| s.genus_id == row.genus_id && s.name == row.name)
            {
                return Err(conflict(table, format!("genus_id={}, name={}", row.genus_id, row.name)));
            }
            state.species.insert(row.id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_functional_group(&mut self, group_id: i64) -> Result<i64, StoreError> {
        if let Some((id, _)) = self
            .working
            .functional_groups
            .iter()
            .find(|(_, g)| **g == group_id)
        {
            return Ok(*id);
        }
        let id = self.working.next_id(CatalogTable::FunctionalGroup);
        self.working.functional_groups.insert(id, group_id);
        Ok(id)
    }

    async fn upsert_trait(&mut self, kind: TraitKind) -> Result<i64, StoreError> {
        if let Some((id, _)) = self.working.traits.iter().find(|(_, k)| **k == kind) {
            return Ok(*id);
        }
        let id = self.working.next_id(CatalogTable::Trait);
        self.working.traits.insert(id, kind);
        Ok(id)
    }

    async fn insert_trait_values(&mut self, rows: &[TraitValue]) -> Result<u64, StoreError> {
        let table = CatalogTable::TraitValue;
        for row in rows {
            let state = &mut self.working;
            if !row.bounds_are_valid() {
                return Err(StoreError::Check {
                    table: table.table_name(),
                    constraint: "trait_value_bounds".to_string(),
                    detail: format!("min_value={}, max_value={}", row.min_value, row.max_value),
                });
            }
            if !state.traits.contains_key(&row.trait_id) {
                return Err(missing(table, "trait_id", row.trait_id));
            }
            if !state.functional_groups.contains_key(&row.functional_group_id) {
                return Err(missing(table, "functional_group_id", row.functional_group_id));
            }
            if state.trait_values.iter().any(|v| {
                v.trait_id == row.trait_id && v.functional_group_id == row.functional_group_id
            }) {
                return Err(conflict(
                    table,
                    format!(
                        "trait_id={}, functional_group_id={}",
                        row.trait_id, row.functional_group_id
                    ),
                ));
            }
            state.trait_values.push(*row);
        }
        Ok(rows.len() as u64)
    }

    async fn assign_functional_groups(&mut self, pairs: &[(i64, i64)]) -> Result<u64, StoreError> {
        let mut updated = 0;
        for (species_id, group_id) in pairs {
            if !self.working.functional_groups.contains_key(group_id) {
                return Err(missing(CatalogTable::Species, "functional_group_id", *group_id));
            }
            if let Some(species) = self.working.species.get_mut(species_id) {
                species.functional_group_id = Some(*group_id);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_records(&mut self, rows: &[BiodiversityRecord]) -> Result<u64, StoreError> {
        let table = CatalogTable::BiodiversityRecord;
        for row in rows {
            let state = &mut self.working;
            if state.records.contains_key(&row.id) {
                return Err(conflict(table, format!("id={}", row.id)));
            }
            if !state.species.contains_key(&row.species_id) {
                return Err(missing(table, "species_id", row.species_id));
            }
            if !state.sites.contains_key(&row.site_id) {
                return Err(missing(table, "site_id", row.site_id));
            }
            if !state.neighborhoods.contains_key(&row.neighborhood_id) {
                return Err(missing(table, "neighborhood_id", row.neighborhood_id));
            }
            state.records.insert(row.id, row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn insert_measurements(&mut self, rows: &[Measurement]) -> Result<u64, StoreError> {
        for row in rows {
            if !self.working.records.contains_key(&row.biodiversity_record_id) {
                return Err(missing(
                    CatalogTable::Measurement,
                    "biodiversity_record_id",
                    row.biodiversity_record_id,
                ));
            }
        }
        self.working.measurements.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn insert_observations(&mut self, rows: &[Observation]) -> Result<u64, StoreError> {
        for row in rows {
            if !self.working.records.contains_key(&row.biodiversity_record_id) {
                return Err(missing(
                    CatalogTable::Observation,
                    "biodiversity_record_id",
                    row.biodiversity_record_id,
                ));
            }
        }
        self.working.observations.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn insert_stations(&mut self, rows: &[NewStation]) -> Result<Vec<Station>, StoreError> {
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            if self.working.stations.values().any(|s| s.code == row.code) {
                return Err(conflict(CatalogTable::Station, format!("code={}", row.code)));
            }
            let id = self.working.next_id(CatalogTable::Station);
            let station = Station {
                id,
                code: row.code,
                name: row.name.clone(),
                location: row.location,
            };
            self.working.stations.insert(id, station.clone());
            created.push(station);
        }
        Ok(created)
    }

    async fn insert_climate(&mut self, rows: &[ClimateReading]) -> Result<u64, StoreError> {
        for row in rows {
            if !self.working.stations.contains_key(&row.station_id) {
                return Err(missing(CatalogTable::Climate, "station_id", row.station_id));
            }
            if !self.working.municipalities.contains_key(&row.municipality_id) {
                return Err(missing(CatalogTable::Climate, "municipality_id", row.municipality_id));
            }
        }
        self.working.climate.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn count_orphans(&mut self, link: ForeignKey) -> Result<u64, StoreError> {
        self.scan_available()?;
        let s = &self.working;
        let n = match link {
            ForeignKey::NeighborhoodLocality => s
                .neighborhoods
                .values()
                .filter(|n| !s.localities.contains_key(&n.locality_id))
                .count(),
            ForeignKey::RecordSite => s
                .records
                .values()
                .filter(|r| !s.sites.contains_key(&r.site_id))
                .count(),
            ForeignKey::RecordSpecies => s
                .records
                .values()
                .filter(|r| !s.species.contains_key(&r.species_id))
                .count(),
            ForeignKey::RecordNeighborhood => s
                .records
                .values()
                .filter(|r| !s.neighborhoods.contains_key(&r.neighborhood_id))
                .count(),
            ForeignKey::ObservationRecord => s
                .observations
                .iter()
                .filter(|o| !s.records.contains_key(&o.biodiversity_record_id))
                .count(),
            ForeignKey::MeasurementRecord => s
                .measurements
                .iter()
                .filter(|m| !s.records.contains_key(&m.biodiversity_record_id))
                .count(),
        };
        Ok(n as u64)
    }

    async fn count_locality_mismatches(&mut self) -> Result<u64, StoreError> {
        self.scan_available()?;
        let s = &self.working;
        let n = s
            .records
            .values()
            .filter(|r| {
                let site_locality = s.sites.get(&r.site_id).and_then(|site| site.locality_id);
                let hood_locality = s.neighborhoods.get(&r.neighborhood_id).map(|n| n.locality_id);
                matches!((site_locality, hood_locality), (Some(a), Some(b)) if a != b)
            })
            .count();
        Ok(n as u64)
    }

    async fn reset_sequence(&mut self, table: CatalogTable) -> Result<(), StoreError> {
        let next = self.working.max_id(table) + 1;
        self.working.sequences.insert(table, next);
        Ok(())
    }

    async fn count_selected(&mut self, selection: RecordSelection) -> Result<u64, StoreError> {
        Ok(self.working.selected(selection).count() as u64)
    }

    async fn select_records(
        &mut self,
        selection: RecordSelection,
    ) -> Result<Vec<RecordLocation>, StoreError> {
        let limit = selection.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(self
            .working
            .selected(selection)
            .filter_map(|r| {
                r.location.map(|location| RecordLocation {
                    id: r.id,
                    location,
                })
            })
            .take(limit)
            .collect())
    }

    async fn neighborhood_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError> {
        let rows = self.working.neighborhoods.values().map(|n| {
            (n.id, n.name.as_str(), Some(n.locality_id), n.boundary.as_ref())
        });
        Ok(shapes(rows, extent))
    }

    async fn locality_shapes(
        &mut self,
        extent: Option<Rect<f64>>,
    ) -> Result<Vec<RegionShape>, StoreError> {
        let rows = self
            .working
            .localities
            .values()
            .map(|l| (l.id, l.name.as_str(), Some(l.municipality_id), l.boundary.as_ref()));
        Ok(shapes(rows, extent))
    }

    async fn reassign_records(&mut self, updates: &[RecordAssignment]) -> Result<u64, StoreError> {
        let mut updated = 0;
        for update in updates {
            if !self.working.neighborhoods.contains_key(&update.neighborhood_id) {
                return Err(missing(
                    CatalogTable::BiodiversityRecord,
                    "neighborhood_id",
                    update.neighborhood_id,
                ));
            }
            if let Some(record) = self.working.records.get_mut(&update.record_id) {
                record.neighborhood_id = update.neighborhood_id;
                record.system_comment = Some(update.system_comment.clone());
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{SENTINEL_LOCALITY_ID, SENTINEL_NEIGHBORHOOD_ID};

    async fn seeded() -> MemoryCatalog {
        let catalog = MemoryCatalog::with_municipality("Ibagué");
        let mut tx = catalog.begin().await.expect("begin");
        let anchor = tx
            .find_municipality("Ibagué")
            .await
            .expect("lookup")
            .expect("anchor");
        tx.insert_localities(&[Locality::sentinel(anchor.id)])
            .await
            .expect("sentinel locality");
        tx.insert_neighborhoods(&[Neighborhood::sentinel()])
            .await
            .expect("sentinel hood");
        tx.commit().await.expect("commit");
        catalog
    }

    #[tokio::test]
    async fn dropped_transactions_leave_no_trace() {
        let catalog = seeded().await;
        {
            let mut tx = catalog.begin().await.expect("begin");
            tx.upsert_family("Fabaceae").await.expect("family");
            assert_eq!(tx.count_rows(CatalogTable::Family).await.expect("count"), 1);
        }
        assert_eq!(catalog.read(|s| s.row_count(CatalogTable::Family)), 0);
    }

    #[tokio::test]
    async fn upserts_return_the_existing_row() {
        let catalog = seeded().await;
        let mut tx = catalog.begin().await.expect("begin");
        let first = tx.upsert_family("Fabaceae").await.expect("family");
        let again = tx.upsert_family("Fabaceae").await.expect("family again");
        assert_eq!(first, again);
        let genus = tx.upsert_genus("Inga", first).await.expect("genus");
        assert_eq!(tx.upsert_genus("Inga", first).await.expect("genus again"), genus);
        let carbon = tx.upsert_trait(TraitKind::CarbonSequestration).await.expect("trait");
        assert_eq!(
            tx.upsert_trait(TraitKind::CarbonSequestration).await.expect("trait again"),
            carbon
        );
    }

    #[tokio::test]
    async fn sentinel_ids_cannot_be_inserted_twice() {
        let catalog = seeded().await;
        let mut tx = catalog.begin().await.expect("begin");
        let err = tx
            .insert_localities(&[Locality::sentinel(1)])
            .await
            .expect_err("duplicate sentinel");
        assert!(matches!(err, StoreError::Conflict { .. }));
        let found = tx.find_locality(SENTINEL_LOCALITY_ID).await.expect("find");
        assert!(found.is_some());
        assert!(tx
            .find_neighborhood(SENTINEL_NEIGHBORHOOD_ID)
            .await
            .expect("find")
            .is_some());
    }

    #[tokio::test]
    async fn trait_values_enforce_bounds_and_uniqueness() {
        let catalog = seeded().await;
        let mut tx = catalog.begin().await.expect("begin");
        let trait_id = tx.upsert_trait(TraitKind::ShadeIndex).await.expect("trait");
        let group = tx.upsert_functional_group(3).await.expect("group");
        let mut value = TraitValue {
            trait_id,
            functional_group_id: group,
            min_value: 0.8,
            max_value: 0.5,
        };
        let err = tx.insert_trait_values(&[value]).await.expect_err("inverted");
        assert!(
            matches!(err, StoreError::Check { ref constraint, .. } if constraint == "trait_value_bounds")
        );

        value.min_value = -1.0;
        assert!(tx.insert_trait_values(&[value]).await.is_err());

        value.min_value = 0.1;
        tx.insert_trait_values(&[value]).await.expect("valid");
        let err = tx.insert_trait_values(&[value]).await.expect_err("duplicate pair");
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn sites_without_a_locality_are_keyed_by_zone() {
        let catalog = seeded().await;
        let mut tx = catalog.begin().await.expect("begin");
        let site = |id, zone| Site {
            id,
            name: "Parque Centenario".to_string(),
            locality_id: None,
            zone,
            subzone: Some(2),
        };
        tx.insert_sites(&[site(1, Some(1)), site(2, Some(3))])
            .await
            .expect("distinct zones");
        let err = tx
            .insert_sites(&[site(3, Some(1))])
            .await
            .expect_err("same name and zone");
        assert!(matches!(err, StoreError::Conflict { .. }));
        tx.insert_sites(&[site(4, None), site(5, None)])
            .await
            .expect("null zones stay distinct");
    }

    #[tokio::test]
    async fn broken_scans_fail_only_the_scan() {
        let catalog = seeded().await;
        catalog.break_integrity_scans();
        let mut tx = catalog.begin().await.expect("begin");
        assert!(tx.count_orphans(ForeignKey::RecordSite).await.is_err());
        assert!(tx.count_locality_mismatches().await.is_err());
        assert_eq!(tx.count_rows(CatalogTable::Locality).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn sequence_reset_moves_past_explicit_ids() {
        let catalog = seeded().await;
        let mut tx = catalog.begin().await.expect("begin");
        tx.reset_sequence(CatalogTable::Neighborhood).await.expect("reset");
        let created = tx
            .create_neighborhood(&NewNeighborhood {
                name: "Unknown in Unknown".to_string(),
                locality_id: SENTINEL_LOCALITY_ID,
            })
            .await
            .expect("create");
        assert_eq!(created.id, SENTINEL_NEIGHBORHOOD_ID + 1);
    }
}
