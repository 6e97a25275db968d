//! Core domain model, coded vocabularies and spatial matching for Arbor.

pub mod codes;
pub mod geojson;
pub mod mapping;
pub mod spatial;

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

pub use codes::*;

pub const CRATE_NAME: &str = "arbor-core";

/// Reserved id of the locality that holds records with no known region.
pub const SENTINEL_LOCALITY_ID: i64 = 14;
/// Reserved id of the neighborhood that holds records with no known region.
pub const SENTINEL_NEIGHBORHOOD_ID: i64 = 688;
pub const SENTINEL_REGION_NAME: &str = "Unknown";

/// Recorder used for observations when the source leaves it blank.
pub const DEFAULT_RECORDER: &str = "Cortolima";

/// Region boundaries are always stored as multipolygons in SRID 4326.
pub type Boundary = MultiPolygon<f64>;

/// Name of the per-locality neighborhood that collects records matched only at locality level.
pub fn placeholder_neighborhood_name(locality_name: &str) -> String {
    format!("{SENTINEL_REGION_NAME} in {locality_name}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Municipality {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Locality {
    pub id: i64,
    pub name: String,
    pub municipality_id: i64,
    pub boundary: Option<Boundary>,
    pub calculated_area_m2: Option<f64>,
    pub population_2019: Option<i64>,
}

impl Locality {
    pub fn sentinel(municipality_id: i64) -> Self {
        Self {
            id: SENTINEL_LOCALITY_ID,
            name: SENTINEL_REGION_NAME.to_string(),
            municipality_id,
            boundary: None,
            calculated_area_m2: None,
            population_2019: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighborhood {
    pub id: i64,
    pub name: String,
    pub locality_id: i64,
    pub boundary: Option<Boundary>,
    pub calculated_area_m2: Option<f64>,
}

impl Neighborhood {
    pub fn sentinel() -> Self {
        Self {
            id: SENTINEL_NEIGHBORHOOD_ID,
            name: SENTINEL_REGION_NAME.to_string(),
            locality_id: SENTINEL_LOCALITY_ID,
            boundary: None,
            calculated_area_m2: None,
        }
    }
}

/// Neighborhood created at run time with a store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNeighborhood {
    pub name: String,
    pub locality_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub name: String,
    pub locality_id: Option<i64>,
    pub zone: Option<i32>,
    pub subzone: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: i64,
    pub genus_id: i64,
    pub name: String,
    pub accepted_scientific_name: Option<String>,
    pub origin: Origin,
    pub iucn_status: IucnStatus,
    pub life_form: LifeForm,
    pub canopy_shape: CanopyShape,
    pub flower_color: FlowerColor,
    pub gbif_id: Option<String>,
    pub identified_by: Option<String>,
    pub identified_on: Option<NaiveDate>,
    pub functional_group_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalGroup {
    pub id: i64,
    pub group_id: i64,
}

/// Min/max range of one trait for one functional group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraitValue {
    pub trait_id: i64,
    pub functional_group_id: i64,
    pub min_value: f64,
    pub max_value: f64,
}

impl TraitValue {
    /// Both bounds non-negative and ordered.
    pub fn bounds_are_valid(&self) -> bool {
        self.min_value >= 0.0 && self.max_value >= 0.0 && self.min_value <= self.max_value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BiodiversityRecord {
    pub id: i64,
    pub common_name: Option<String>,
    pub species_id: i64,
    pub site_id: i64,
    pub neighborhood_id: i64,
    pub location: Option<Point<f64>>,
    pub elevation_m: Option<f64>,
    pub recorded_by: Option<String>,
    pub observed_on: Option<NaiveDate>,
    pub system_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub biodiversity_record_id: i64,
    pub attribute: MeasuredAttribute,
    pub value: Option<f64>,
    pub unit: MeasurementUnit,
    pub method: MeasurementMethod,
    pub measured_on: Option<NaiveDate>,
}

/// Single-character survey columns carried verbatim on every observation.
pub const OBSERVATION_INDICATORS: [&str; 26] = [
    "rd", "dm", "bbs", "ab", "ed", "pi", "ph", "pa", "hc", "hcf", "pd", "pe", "pp", "po", "cre",
    "crh", "cra", "coa", "ce", "civ", "crt", "crg", "cap", "r_vol", "r_cr", "r_ce",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub biodiversity_record_id: i64,
    pub reproductive_condition: ReproductiveCondition,
    pub phytosanitary_status: PhytosanitaryStatus,
    pub physical_condition: PhysicalCondition,
    pub foliage_density: FoliageDensity,
    pub aesthetic_value: AestheticValue,
    pub growth_phase: GrowthPhase,
    pub is_standing: bool,
    pub field_notes: Option<String>,
    /// Keyed by the names in [`OBSERVATION_INDICATORS`]; absent cells are omitted.
    pub indicators: BTreeMap<&'static str, String>,
    pub photo_url: String,
    pub recorded_by: String,
    pub accompanying_collectors: Option<String>,
    pub observed_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub id: i64,
    pub code: i64,
    pub name: String,
    pub location: Option<Point<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStation {
    pub code: i64,
    pub name: String,
    pub location: Option<Point<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateReading {
    pub station_id: i64,
    pub municipality_id: i64,
    pub observed_at: NaiveDateTime,
    pub sensor: String,
    pub value: Option<f64>,
    pub unit: String,
}
