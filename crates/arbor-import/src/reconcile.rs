//! Assigning records to neighborhoods by location.
//!
//! Shared by the import (records whose `hood_id` does not resolve) and the repair job.

use std::collections::HashMap;

use arbor_core::spatial::{BoundaryIndex, RegionShape};
use arbor_core::{
    placeholder_neighborhood_name, NewNeighborhood, SENTINEL_LOCALITY_ID, SENTINEL_NEIGHBORHOOD_ID,
};
use arbor_storage::{CatalogTx, StoreError};
use geo::Point;
use tracing::{debug, info};

pub fn neighborhood_comment(neighborhood: &str) -> String {
    format!("Automatically assigned to neighborhood '{neighborhood}' based on spatial location.")
}

pub fn locality_comment(placeholder: &str, locality: &str) -> String {
    format!(
        "Automatically assigned to placeholder neighborhood '{placeholder}' as record is within \
         locality '{locality}' boundary but no matching neighborhood boundary was found."
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionMatch<'a> {
    Neighborhood(&'a RegionShape),
    /// No neighborhood contains the point but this locality does.
    Locality(&'a RegionShape),
    Unmatched,
}

/// Candidate neighborhoods and localities for containment tests.
#[derive(Debug, Clone, Default)]
pub struct RegionMatcher {
    neighborhoods: BoundaryIndex,
    localities: BoundaryIndex,
}

impl RegionMatcher {
    /// Drops the sentinels and `excluded_neighborhood` from the candidates.
    pub fn new(
        neighborhoods: Vec<RegionShape>,
        localities: Vec<RegionShape>,
        excluded_neighborhood: i64,
    ) -> Self {
        Self {
            neighborhoods: BoundaryIndex::new(neighborhoods)
                .without(SENTINEL_NEIGHBORHOOD_ID)
                .without(excluded_neighborhood),
            localities: BoundaryIndex::new(localities).without(SENTINEL_LOCALITY_ID),
        }
    }

    pub fn candidate_counts(&self) -> (usize, usize) {
        (self.neighborhoods.len(), self.localities.len())
    }

    pub fn locate(&self, point: &Point<f64>) -> RegionMatch<'_> {
        if let Some(hood) = self.neighborhoods.locate(point) {
            return RegionMatch::Neighborhood(hood);
        }
        match self.localities.locate(point) {
            Some(locality) => RegionMatch::Locality(locality),
            None => RegionMatch::Unmatched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub neighborhood_id: i64,
    pub name: String,
    /// First use in this run had to create it (or would have, on a dry run).
    pub created: bool,
}

/// Per-run cache of `Unknown in <Locality>` neighborhoods, keyed by locality id.
#[derive(Debug, Default)]
pub struct Placeholders {
    by_locality: HashMap<i64, (i64, String)>,
    next_provisional: i64,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds or creates the placeholder for a locality.
    ///
    /// With `persist` off nothing is written: a missing placeholder gets a provisional
    /// negative id so that later records of the same locality reuse it.
    pub async fn resolve<T: CatalogTx>(
        &mut self,
        tx: &mut T,
        locality_id: i64,
        locality_name: &str,
        persist: bool,
    ) -> Result<Placeholder, StoreError> {
        if let Some((id, name)) = self.by_locality.get(&locality_id) {
            return Ok(Placeholder {
                neighborhood_id: *id,
                name: name.clone(),
                created: false,
            });
        }

        let name = placeholder_neighborhood_name(locality_name);
        let (neighborhood_id, created) =
            match tx.find_neighborhood_by_name(locality_id, &name).await? {
                Some(existing) => {
                    debug!(locality_id, id = existing.id, "reusing placeholder neighborhood");
                    (existing.id, false)
                }
                None if persist => {
                    let hood = tx
                        .create_neighborhood(&NewNeighborhood {
                            name: name.clone(),
                            locality_id,
                        })
                        .await?;
                    info!(locality_id, id = hood.id, name = %name, "created placeholder neighborhood");
                    (hood.id, true)
                }
                None => {
                    self.next_provisional -= 1;
                    (self.next_provisional, true)
                }
            };

        self.by_locality
            .insert(locality_id, (neighborhood_id, name.clone()));
        Ok(Placeholder {
            neighborhood_id,
            name,
            created,
        })
    }
}

/// Outcome tallies of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchCounts {
    pub neighborhood: u64,
    pub locality: u64,
    pub placeholders_created: u64,
    pub unmatched: u64,
}

impl MatchCounts {
    pub fn total(&self) -> u64 {
        self.neighborhood + self.locality + self.unmatched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_core::{Locality, Neighborhood};
    use arbor_storage::{CatalogStore, MemoryCatalog};
    use geo::{polygon, MultiPolygon};

    fn square(id: i64, name: &str, parent: i64, x0: f64, y0: f64, x1: f64, y1: f64) -> RegionShape {
        RegionShape {
            id,
            name: name.to_string(),
            parent_id: Some(parent),
            boundary: MultiPolygon(vec![polygon![
                (x: x0, y: y0),
                (x: x1, y: y0),
                (x: x1, y: y1),
                (x: x0, y: y1),
                (x: x0, y: y0),
            ]]),
        }
    }

    #[test]
    fn neighborhoods_win_over_localities() {
        let matcher = RegionMatcher::new(
            vec![square(1, "Center", 1, -75.25, 4.40, -75.20, 4.45)],
            vec![square(1, "Comuna 1", 1, -75.40, 4.30, -75.10, 4.60)],
            SENTINEL_NEIGHBORHOOD_ID,
        );

        match matcher.locate(&Point::new(-75.23, 4.43)) {
            RegionMatch::Neighborhood(hood) => assert_eq!(hood.name, "Center"),
            other => panic!("unexpected {other:?}"),
        }
        match matcher.locate(&Point::new(-75.30, 4.47)) {
            RegionMatch::Locality(locality) => assert_eq!(locality.id, 1),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(matcher.locate(&Point::new(-70.0, 4.0)), RegionMatch::Unmatched);
    }

    #[test]
    fn sentinel_boundaries_are_never_candidates() {
        let matcher = RegionMatcher::new(
            vec![square(SENTINEL_NEIGHBORHOOD_ID, "Unknown", 14, -76.0, 4.0, -75.0, 5.0)],
            Vec::new(),
            SENTINEL_NEIGHBORHOOD_ID,
        );
        assert_eq!(matcher.candidate_counts(), (0, 0));
        assert_eq!(matcher.locate(&Point::new(-75.5, 4.5)), RegionMatch::Unmatched);
    }

    #[test]
    fn comments_name_the_regions() {
        assert_eq!(
            neighborhood_comment("Center"),
            "Automatically assigned to neighborhood 'Center' based on spatial location."
        );
        assert!(locality_comment("Unknown in Comuna 1", "Comuna 1")
            .contains("within locality 'Comuna 1' boundary"));
    }

    #[tokio::test]
    async fn placeholders_are_created_once_per_locality() {
        let catalog = MemoryCatalog::with_municipality("Ibagué");
        let mut tx = catalog.begin().await.expect("begin");
        tx.insert_localities(&[Locality {
            id: 3,
            name: "Comuna 3".into(),
            municipality_id: 1,
            boundary: None,
            calculated_area_m2: None,
            population_2019: None,
        }])
        .await
        .expect("locality");
        tx.insert_neighborhoods(&[Neighborhood {
            id: 40,
            name: "Belén".into(),
            locality_id: 3,
            boundary: None,
            calculated_area_m2: None,
        }])
        .await
        .expect("hood");
        tx.reset_sequence(arbor_storage::CatalogTable::Neighborhood)
            .await
            .expect("reset");

        let mut placeholders = Placeholders::new();
        let first = placeholders
            .resolve(&mut tx, 3, "Comuna 3", true)
            .await
            .expect("resolve");
        assert!(first.created);
        assert_eq!(first.name, "Unknown in Comuna 3");
        assert_eq!(first.neighborhood_id, 41);

        let again = placeholders
            .resolve(&mut tx, 3, "Comuna 3", true)
            .await
            .expect("resolve again");
        assert_eq!(again.neighborhood_id, first.neighborhood_id);
        assert!(!again.created);

        let mut fresh = Placeholders::new();
        let existing = fresh
            .resolve(&mut tx, 3, "Comuna 3", true)
            .await
            .expect("lookup");
        assert_eq!(existing.neighborhood_id, 41);
        assert!(!existing.created);
    }

    #[tokio::test]
    async fn dry_runs_use_provisional_ids() {
        let catalog = MemoryCatalog::with_municipality("Ibagué");
        let mut tx = catalog.begin().await.expect("begin");
        let mut placeholders = Placeholders::new();

        let first = placeholders
            .resolve(&mut tx, 7, "Comuna 7", false)
            .await
            .expect("resolve");
        let second = placeholders
            .resolve(&mut tx, 8, "Comuna 8", false)
            .await
            .expect("resolve");
        assert_eq!((first.neighborhood_id, second.neighborhood_id), (-1, -2));
        assert!(first.created && second.created);
        assert_eq!(tx.count_rows(arbor_storage::CatalogTable::Neighborhood).await.expect("count"), 0);
    }
}
