//! Point-in-region matching over administrative boundaries.

use geo::{coord, Area, BoundingRect, Contains, Intersects, Point, Rect};

use crate::Boundary;

/// Padding added around the record extent when narrowing candidate boundaries (~5 km).
pub const EXTENT_BUFFER_DEGREES: f64 = 0.05;

/// A region with a boundary that can take part in containment tests.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionShape {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub boundary: Boundary,
}

#[derive(Debug, Clone)]
struct IndexedRegion {
    shape: RegionShape,
    area: f64,
    bounds: Option<Rect<f64>>,
}

/// Candidate boundaries ordered by id.
///
/// When several boundaries contain a point the smallest area wins, then the lowest id.
#[derive(Debug, Clone, Default)]
pub struct BoundaryIndex {
    regions: Vec<IndexedRegion>,
}

impl BoundaryIndex {
    pub fn new(shapes: impl IntoIterator<Item = RegionShape>) -> Self {
        let mut regions: Vec<IndexedRegion> = shapes
            .into_iter()
            .map(|shape| IndexedRegion {
                area: shape.boundary.unsigned_area(),
                bounds: shape.boundary.bounding_rect(),
                shape,
            })
            .collect();
        regions.sort_by_key(|r| r.shape.id);
        Self { regions }
    }

    /// Drops the region with `id`, used to keep the sentinel out of the candidates.
    pub fn without(mut self, id: i64) -> Self {
        self.regions.retain(|r| r.shape.id != id);
        self
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn locate(&self, point: &Point<f64>) -> Option<&RegionShape> {
        let mut best: Option<&IndexedRegion> = None;
        for region in &self.regions {
            let Some(bounds) = region.bounds else {
                continue;
            };
            if !bounds.intersects(&point.0) || !region.shape.boundary.contains(point) {
                continue;
            }
            // Regions are visited in id order, so a strict comparison keeps the lowest id on ties.
            match best {
                Some(current) if current.area <= region.area => {}
                _ => best = Some(region),
            }
        }
        best.map(|r| &r.shape)
    }
}

/// Bounding rectangle of `points`, padded by `buffer` degrees on every side.
pub fn padded_extent<'a>(
    points: impl IntoIterator<Item = &'a Point<f64>>,
    buffer: f64,
) -> Option<Rect<f64>> {
    let mut iter = points.into_iter();
    let first = iter.next()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x(), first.y(), first.x(), first.y());
    for p in iter {
        min_x = min_x.min(p.x());
        min_y = min_y.min(p.y());
        max_x = max_x.max(p.x());
        max_y = max_y.max(p.y());
    }
    Some(Rect::new(
        coord! { x: min_x - buffer, y: min_y - buffer },
        coord! { x: max_x + buffer, y: max_y + buffer },
    ))
}

/// True when the boundary's bounding box overlaps `extent`.
pub fn boundary_touches_extent(boundary: &Boundary, extent: &Rect<f64>) -> bool {
    boundary
        .bounding_rect()
        .map(|bounds| bounds.intersects(extent))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn square(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Boundary {
        MultiPolygon::new(vec![polygon![
            (x: min_x, y: min_y),
            (x: max_x, y: min_y),
            (x: max_x, y: max_y),
            (x: min_x, y: max_y),
            (x: min_x, y: min_y),
        ]])
    }

    fn shape(id: i64, name: &str, boundary: Boundary) -> RegionShape {
        RegionShape {
            id,
            name: name.to_string(),
            parent_id: None,
            boundary,
        }
    }

    #[test]
    fn locates_points_inside_adjacent_boxes() {
        let index = BoundaryIndex::new(vec![
            shape(2, "North", square(-75.25, 4.45, -75.20, 4.50)),
            shape(1, "Center", square(-75.25, 4.40, -75.20, 4.45)),
        ]);

        let center = index.locate(&Point::new(-75.23, 4.43)).expect("center match");
        assert_eq!(center.name, "Center");
        let north = index.locate(&Point::new(-75.23, 4.47)).expect("north match");
        assert_eq!(north.name, "North");
        assert!(index.locate(&Point::new(-75.30, 4.47)).is_none());
    }

    #[test]
    fn overlapping_boundaries_prefer_the_smallest_then_lowest_id() {
        let index = BoundaryIndex::new(vec![
            shape(5, "Wide", square(0.0, 0.0, 10.0, 10.0)),
            shape(9, "Narrow", square(1.0, 1.0, 2.0, 2.0)),
            shape(7, "NarrowTwin", square(1.0, 1.0, 2.0, 2.0)),
        ]);
        let hit = index.locate(&Point::new(1.5, 1.5)).expect("match");
        assert_eq!(hit.id, 7);
        let hit = index.locate(&Point::new(5.0, 5.0)).expect("match");
        assert_eq!(hit.id, 5);
    }

    #[test]
    fn without_removes_a_candidate() {
        let index = BoundaryIndex::new(vec![
            shape(688, "Unknown", square(0.0, 0.0, 10.0, 10.0)),
            shape(1, "Inner", square(1.0, 1.0, 2.0, 2.0)),
        ])
        .without(688);
        assert_eq!(index.len(), 1);
        assert!(index.locate(&Point::new(5.0, 5.0)).is_none());
    }

    #[test]
    fn extent_is_padded_by_the_buffer() {
        let points = [Point::new(-75.23, 4.43), Point::new(-75.30, 4.47)];
        let extent = padded_extent(points.iter(), EXTENT_BUFFER_DEGREES).expect("extent");
        assert!((extent.min().x - (-75.35)).abs() < 1e-9);
        assert!((extent.max().y - 4.52).abs() < 1e-9);
        assert!(padded_extent(std::iter::empty(), 0.05).is_none());

        assert!(boundary_touches_extent(&square(-75.40, 4.0, -75.34, 4.5), &extent));
        assert!(!boundary_touches_extent(&square(-74.0, 4.0, -73.9, 4.5), &extent));
    }
}
