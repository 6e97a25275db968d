//! GeoJSON Polygon/MultiPolygon boundaries to and from `geo` multipolygons.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Value};
use thiserror::Error;

use crate::Boundary;

#[derive(Debug, Error)]
pub enum GeoJsonError {
    #[error("geometry is not a GeoJSON object")]
    NotAnObject,
    #[error("unsupported geometry type {0}; expected Polygon or MultiPolygon")]
    UnsupportedType(String),
    #[error("malformed coordinates: {0}")]
    MalformedCoordinates(String),
    #[error("invalid GeoJSON text: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reads a Polygon or MultiPolygon; a Polygon becomes a single-member MultiPolygon.
pub fn boundary_from_geojson(value: &Value) -> Result<Boundary, GeoJsonError> {
    let object = value.as_object().ok_or(GeoJsonError::NotAnObject)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(GeoJsonError::NotAnObject)?;
    let coordinates = object
        .get("coordinates")
        .ok_or_else(|| GeoJsonError::MalformedCoordinates("missing coordinates".to_string()))?;

    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![polygon(coordinates)?])),
        "MultiPolygon" => {
            let members = array(coordinates, "multipolygon")?
                .iter()
                .map(polygon)
                .collect::<Result<Vec<_>, _>>()?;
            if members.is_empty() {
                return Err(GeoJsonError::MalformedCoordinates(
                    "multipolygon has no members".to_string(),
                ));
            }
            Ok(MultiPolygon::new(members))
        }
        other => Err(GeoJsonError::UnsupportedType(other.to_string())),
    }
}

pub fn boundary_from_geojson_str(text: &str) -> Result<Boundary, GeoJsonError> {
    let value: Value = serde_json::from_str(text)?;
    boundary_from_geojson(&value)
}

/// Serializes as a GeoJSON MultiPolygon, the shape `ST_GeomFromGeoJSON` expects.
pub fn boundary_to_geojson(boundary: &Boundary) -> String {
    let polygons: Vec<Value> = boundary
        .0
        .iter()
        .map(|poly| {
            let mut rings = vec![ring_coords(poly.exterior())];
            rings.extend(poly.interiors().iter().map(ring_coords));
            Value::Array(rings)
        })
        .collect();
    json!({ "type": "MultiPolygon", "coordinates": polygons }).to_string()
}

fn ring_coords(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, GeoJsonError> {
    value
        .as_array()
        .ok_or_else(|| GeoJsonError::MalformedCoordinates(format!("{what} is not an array")))
}

fn polygon(value: &Value) -> Result<Polygon<f64>, GeoJsonError> {
    let mut rings = array(value, "polygon")?
        .iter()
        .map(ring)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter();
    let exterior = rings
        .next()
        .ok_or_else(|| GeoJsonError::MalformedCoordinates("polygon has no rings".to_string()))?;
    Ok(Polygon::new(exterior, rings.collect()))
}

fn ring(value: &Value) -> Result<LineString<f64>, GeoJsonError> {
    let coords = array(value, "ring")?
        .iter()
        .map(position)
        .collect::<Result<Vec<_>, _>>()?;
    if coords.len() < 4 {
        return Err(GeoJsonError::MalformedCoordinates(format!(
            "ring has {} positions, at least 4 required",
            coords.len()
        )));
    }
    Ok(LineString::new(coords))
}

fn position(value: &Value) -> Result<Coord<f64>, GeoJsonError> {
    let parts = array(value, "position")?;
    match (parts.first().and_then(Value::as_f64), parts.get(1).and_then(Value::as_f64)) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(GeoJsonError::MalformedCoordinates(format!(
            "position {value} is not a numeric pair"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygons_are_promoted_to_multipolygons() {
        let value = json!({
            "type": "Polygon",
            "coordinates": [[[0, 0], [0, 1], [1, 1], [1, 0], [0, 0]]]
        });
        let boundary = boundary_from_geojson(&value).expect("polygon");
        assert_eq!(boundary.0.len(), 1);
        assert_eq!(boundary.0[0].exterior().coords().count(), 5);
    }

    #[test]
    fn multipolygons_keep_holes_and_members() {
        let text = r#"{"type":"MultiPolygon","coordinates":[
            [[[0,0],[0,4],[4,4],[4,0],[0,0]],[[1,1],[1,2],[2,2],[2,1],[1,1]]],
            [[[10,10],[10,11],[11,11],[11,10],[10,10]]]
        ]}"#;
        let boundary = boundary_from_geojson_str(text).expect("multipolygon");
        assert_eq!(boundary.0.len(), 2);
        assert_eq!(boundary.0[0].interiors().len(), 1);

        let again = boundary_from_geojson_str(&boundary_to_geojson(&boundary)).expect("reparse");
        assert_eq!(again, boundary);
    }

    #[test]
    fn other_geometry_types_are_rejected() {
        let err = boundary_from_geojson(&json!({"type": "Point", "coordinates": [1, 2]}))
            .expect_err("point");
        assert!(matches!(err, GeoJsonError::UnsupportedType(kind) if kind == "Point"));
        assert!(matches!(
            boundary_from_geojson(&json!("POLYGON")),
            Err(GeoJsonError::NotAnObject)
        ));
        assert!(matches!(
            boundary_from_geojson(&json!({"type": "Polygon", "coordinates": [[[0, 0], [1, 1]]]})),
            Err(GeoJsonError::MalformedCoordinates(_))
        ));
    }
}
