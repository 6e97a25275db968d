//! Import source contracts and readers.

pub mod coerce;
pub mod manifest;
pub mod regions;
pub mod table;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use manifest::{SourceLocation, SourceManifest, SourceSet, SourcePaths};
pub use regions::{read_hoods, read_localities, HoodEntry, LocalityEntry};
pub use table::{CsvSource, RowChunk, SourceRow};

pub const CRATE_NAME: &str = "arbor-sources";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Localities,
    Hoods,
    Sites,
    Taxonomy,
    Traits,
    Biodiversity,
    Measurements,
    Observations,
    Climate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Csv,
}

const SITE_COLUMNS: &[&str] = &["id", "name", "zone", "subzone"];

const TAXONOMY_COLUMNS: &[&str] = &[
    "taxonomy_id",
    "family",
    "genus",
    "specie",
    "accept_scientific_name",
    "origin",
    "iucn_category",
    "lifeForm",
    "canopy_shape_code",
    "flower_color_code",
    "gbif_id",
    "identified_by",
    "date_of_identification",
];

const TRAIT_COLUMNS: &[&str] = &[
    "pft_id",
    "taxonomy_id",
    "carbon_sequestration_min",
    "carbon_sequestration_max",
    "shade_index_min",
    "shade_index_max",
    "canopy_diameter_min",
    "canopy_diameter_max",
    "height_max_min",
    "height_max_max",
];

const BIODIVERSITY_COLUMNS: &[&str] = &[
    "code_record",
    "common_name",
    "longitude",
    "latitude",
    "elevation_m",
    "registered_by",
    "date_event",
    "site_id",
    "species_id",
    "hood_id",
];

const MEASUREMENT_COLUMNS: &[&str] = &[
    "record_code",
    "measurement_name",
    "measurement_value",
    "measurement_unit",
    "measurement_method",
    "measurement_date_event",
];

const OBSERVATION_COLUMNS: &[&str] = &[
    "record_code",
    "reproductive_condition",
    "phytosanitary_status",
    "physical_condition",
    "foliage_density",
    "aesthetic_value",
    "growth_phase",
    "field_notes",
    "general_state",
    "rd",
    "dm",
    "bbs",
    "ab",
    "ed",
    "pi",
    "ph",
    "pa",
    "hc",
    "hcf",
    "pd",
    "pe",
    "pp",
    "po",
    "cre",
    "crh",
    "cra",
    "coa",
    "ce",
    "civ",
    "crt",
    "crg",
    "cap",
    "r_vol",
    "r_cr",
    "r_ce",
    "photo_url",
    "accompanying_collectors",
];

const CLIMATE_COLUMNS: &[&str] = &[
    "stationcode",
    "stationname",
    "datetime",
    "latitude",
    "longitude",
    "sensordescription",
    "measureunit",
    "value",
];

impl SourceKind {
    pub const ALL: [SourceKind; 9] = [
        SourceKind::Localities,
        SourceKind::Hoods,
        SourceKind::Sites,
        SourceKind::Taxonomy,
        SourceKind::Traits,
        SourceKind::Biodiversity,
        SourceKind::Measurements,
        SourceKind::Observations,
        SourceKind::Climate,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SourceKind::Localities => "localities",
            SourceKind::Hoods => "hoods",
            SourceKind::Sites => "sites",
            SourceKind::Taxonomy => "taxonomy",
            SourceKind::Traits => "traits",
            SourceKind::Biodiversity => "biodiversity",
            SourceKind::Measurements => "measurements",
            SourceKind::Observations => "observations",
            SourceKind::Climate => "climate",
        }
    }

    pub fn format(self) -> SourceFormat {
        match self {
            SourceKind::Localities | SourceKind::Hoods => SourceFormat::Json,
            _ => SourceFormat::Csv,
        }
    }

    pub fn extension(self) -> &'static str {
        match self.format() {
            SourceFormat::Json => "json",
            SourceFormat::Csv => "csv",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.{}", self.name(), self.extension())
    }

    /// `<dir>/json/<name>.json` or `<dir>/csv/<name>.csv`.
    pub fn local_path(self, dir: &Path) -> PathBuf {
        dir.join(self.extension()).join(self.file_name())
    }

    /// Top-level key of a JSON source.
    pub fn json_key(self) -> Option<&'static str> {
        match self {
            SourceKind::Localities => Some("localities"),
            SourceKind::Hoods => Some("hoods"),
            _ => None,
        }
    }

    /// Header columns a CSV source must carry. Empty for JSON sources.
    pub fn required_columns(self) -> &'static [&'static str] {
        match self {
            SourceKind::Localities | SourceKind::Hoods => &[],
            SourceKind::Sites => SITE_COLUMNS,
            SourceKind::Taxonomy => TAXONOMY_COLUMNS,
            SourceKind::Traits => TRAIT_COLUMNS,
            SourceKind::Biodiversity => BIODIVERSITY_COLUMNS,
            SourceKind::Measurements => MEASUREMENT_COLUMNS,
            SourceKind::Observations => OBSERVATION_COLUMNS,
            SourceKind::Climate => CLIMATE_COLUMNS,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{file} must be a JSON object with a '{key}' key")]
    MissingJsonKey { file: String, key: &'static str },
    #[error("{file} line {line}: column '{column}' value '{value}' {reason}")]
    InvalidCell {
        file: String,
        line: u64,
        column: String,
        value: String,
        reason: String,
    },
    #[error("source manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("downloading {kind} source failed: {reason}")]
    Download { kind: SourceKind, reason: String },
}

/// A cell that could not be coerced and was imported as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseWarning {
    pub source: SourceKind,
    pub line: u64,
    pub column: String,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} line {}: {} '{}' {}; stored as null",
            self.source.file_name(),
            self.line,
            self.column,
            self.value,
            self.reason
        )
    }
}

/// Lists every problem with the shape of one local source file.
///
/// CSV sources report missing header columns; JSON sources report a missing top-level key.
pub fn check_contract(kind: SourceKind, path: &Path) -> Result<Vec<String>, SourceError> {
    match kind.format() {
        SourceFormat::Csv => {
            let source = CsvSource::open(kind, path)?;
            let missing: Vec<&str> = kind
                .required_columns()
                .iter()
                .copied()
                .filter(|column| !source.has_column(column))
                .collect();
            if missing.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![format!(
                    "Missing required columns in {}: {}",
                    kind.file_name(),
                    missing.join(", ")
                )])
            }
        }
        SourceFormat::Json => {
            let Some(key) = kind.json_key() else {
                return Ok(Vec::new());
            };
            let value = regions::read_json(path)?;
            if value.as_object().is_some_and(|obj| obj.contains_key(key)) {
                Ok(Vec::new())
            } else {
                Ok(vec![SourceError::MissingJsonKey {
                    file: kind.file_name(),
                    key,
                }
                .to_string()])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn local_layout_splits_json_and_csv() {
        let dir = Path::new("/data");
        assert_eq!(
            SourceKind::Hoods.local_path(dir),
            PathBuf::from("/data/json/hoods.json")
        );
        assert_eq!(
            SourceKind::Climate.local_path(dir),
            PathBuf::from("/data/csv/climate.csv")
        );
    }

    #[test]
    fn observation_contract_lists_every_indicator() {
        let columns = SourceKind::Observations.required_columns();
        for indicator in arbor_core::OBSERVATION_INDICATORS {
            assert!(columns.contains(&indicator), "{indicator} missing");
        }
    }

    #[test]
    fn csv_contract_reports_all_missing_columns() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("sites.csv");
        fs::write(&path, "id,name\n1,Plaza\n").expect("write");

        let problems = check_contract(SourceKind::Sites, &path).expect("check");
        assert_eq!(problems, vec!["Missing required columns in sites.csv: zone, subzone"]);
    }

    #[test]
    fn json_contract_requires_top_level_key() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("hoods.json");
        fs::write(&path, r#"{"neighborhoods": []}"#).expect("write");

        let problems = check_contract(SourceKind::Hoods, &path).expect("check");
        assert_eq!(problems, vec!["hoods.json must be a JSON object with a 'hoods' key"]);

        fs::write(&path, r#"[]"#).expect("write");
        assert_eq!(check_contract(SourceKind::Hoods, &path).expect("check").len(), 1);
    }
}
