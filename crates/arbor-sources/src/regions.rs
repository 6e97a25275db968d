//! Locality and neighborhood JSON sources.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use arbor_core::geojson::{boundary_from_geojson, GeoJsonError};
use arbor_core::Boundary;
use serde::Deserialize;
use serde_json::Value;

use crate::{SourceError, SourceKind};

#[derive(Debug, Clone, Deserialize)]
pub struct LocalityEntry {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub calculated_area_m2: Option<f64>,
    #[serde(default)]
    pub population_2019: Option<f64>,
    #[serde(default)]
    pub boundary: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HoodEntry {
    pub id: i64,
    pub name: String,
    pub locality_id: i64,
    #[serde(default)]
    pub calculated_area_m2: Option<f64>,
    #[serde(default)]
    pub boundary: Option<Value>,
}

fn parse_boundary(value: Option<&Value>) -> Result<Option<Boundary>, GeoJsonError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(geometry) => boundary_from_geojson(geometry).map(Some),
    }
}

impl LocalityEntry {
    pub fn boundary(&self) -> Result<Option<Boundary>, GeoJsonError> {
        parse_boundary(self.boundary.as_ref())
    }

    pub fn population(&self) -> Option<i64> {
        self.population_2019
            .filter(|p| p.is_finite())
            .map(|p| p.round() as i64)
    }
}

impl HoodEntry {
    pub fn boundary(&self) -> Result<Option<Boundary>, GeoJsonError> {
        parse_boundary(self.boundary.as_ref())
    }
}

pub(crate) fn read_json(path: &Path) -> Result<Value, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| SourceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_entries<T: for<'de> Deserialize<'de>>(
    kind: SourceKind,
    path: &Path,
) -> Result<Vec<T>, SourceError> {
    let key = kind.json_key().unwrap_or_else(|| kind.name());
    let mut document = read_json(path)?;
    let entries = document
        .as_object_mut()
        .and_then(|obj| obj.remove(key))
        .ok_or_else(|| SourceError::MissingJsonKey {
            file: kind.file_name(),
            key,
        })?;
    serde_json::from_value(entries).map_err(|source| SourceError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_localities(path: &Path) -> Result<Vec<LocalityEntry>, SourceError> {
    read_entries(SourceKind::Localities, path)
}

pub fn read_hoods(path: &Path) -> Result<Vec<HoodEntry>, SourceError> {
    read_entries(SourceKind::Hoods, path)
}
