//! Per-run state threaded through the import phases.

use std::collections::{BTreeMap, HashMap, HashSet};

use arbor_core::spatial::RegionShape;
use arbor_core::{Locality, Municipality, Neighborhood, SENTINEL_NEIGHBORHOOD_ID};
use arbor_sources::ParseWarning;
use arbor_storage::CatalogTable;
use uuid::Uuid;

use crate::reconcile::{MatchCounts, Placeholders, RegionMatcher};

/// Id maps built by earlier phases and consumed by later ones. Dropped when the run ends.
pub struct ImportContext {
    pub run_id: Uuid,
    pub municipality: Municipality,
    pub localities: HashMap<i64, Locality>,
    pub neighborhoods: HashMap<i64, Neighborhood>,
    pub sites: HashSet<i64>,
    pub families: HashMap<String, i64>,
    pub genera: HashMap<String, i64>,
    pub species: HashSet<i64>,
    pub functional_groups: HashMap<i64, i64>,
    /// Station code to station id.
    pub stations: HashMap<i64, i64>,
    pub placeholders: Placeholders,
    pub inline_matches: MatchCounts,
    pub warnings: Vec<ParseWarning>,
    pub counts: BTreeMap<CatalogTable, u64>,
    matcher: Option<RegionMatcher>,
}

impl ImportContext {
    pub fn new(run_id: Uuid, municipality: Municipality) -> Self {
        Self {
            run_id,
            municipality,
            localities: HashMap::new(),
            neighborhoods: HashMap::new(),
            sites: HashSet::new(),
            families: HashMap::new(),
            genera: HashMap::new(),
            species: HashSet::new(),
            functional_groups: HashMap::new(),
            stations: HashMap::new(),
            placeholders: Placeholders::new(),
            inline_matches: MatchCounts::default(),
            warnings: Vec::new(),
            counts: BTreeMap::new(),
            matcher: None,
        }
    }

    pub fn add_count(&mut self, table: CatalogTable, rows: u64) {
        *self.counts.entry(table).or_default() += rows;
    }

    /// Boundaries loaded in the region phases, indexed on first use.
    pub fn matcher(&mut self) -> &RegionMatcher {
        let localities = &self.localities;
        let neighborhoods = &self.neighborhoods;
        self.matcher.get_or_insert_with(|| {
            let hoods = neighborhoods
                .values()
                .filter_map(|hood| {
                    Some(RegionShape {
                        id: hood.id,
                        name: hood.name.clone(),
                        parent_id: Some(hood.locality_id),
                        boundary: hood.boundary.clone()?,
                    })
                })
                .collect();
            let locs = localities
                .values()
                .filter_map(|locality| {
                    Some(RegionShape {
                        id: locality.id,
                        name: locality.name.clone(),
                        parent_id: Some(locality.municipality_id),
                        boundary: locality.boundary.clone()?,
                    })
                })
                .collect();
            RegionMatcher::new(hoods, locs, SENTINEL_NEIGHBORHOOD_ID)
        })
    }
}
