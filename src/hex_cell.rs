//! Resolved index rows
//!
//! A [`HexCell`] is one row of the output table: a hexagon, the value that won
//! it and the polygon (and raster row) that value came from.

use crate::polygon::PolygonId;
use geojson::{Feature, Geometry, JsonObject, Position, Value as GeoValue};
use h3o::{CellIndex, LatLng, Resolution};

/// One resolved row of the hexagon index
///
/// The resolution is not stored separately; it is read from the cell index,
/// so it can never disagree with it.
///
/// # Example
///
/// ```
/// use geo_hex_index::HexCell;
/// use h3o::{LatLng, Resolution};
///
/// let cell = LatLng::new(37.7749, -122.4194).unwrap().to_cell(Resolution::Five);
/// let row = HexCell::new(cell, 12, 1);
/// assert_eq!(row.resolution(), Resolution::Five);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HexCell {
    /// H3 cell index, unique across the output set
    pub index: CellIndex,

    /// Winning classification value
    pub value: i32,

    /// Polygon the winning value came from
    pub origin_polygon_id: PolygonId,

    /// Raster row the origin polygon was polygonized from, if any
    pub source_raster_id: Option<i64>,
}

impl HexCell {
    pub fn new(index: CellIndex, value: i32, origin_polygon_id: PolygonId) -> Self {
        Self {
            index,
            value,
            origin_polygon_id,
            source_raster_id: None,
        }
    }

    pub fn with_source_raster_id(mut self, rid: Option<i64>) -> Self {
        self.source_raster_id = rid;
        self
    }

    pub fn resolution(&self) -> Resolution {
        self.index.resolution()
    }

    /// Cell index as the 64-bit integer stored in the table
    pub fn raw_index(&self) -> u64 {
        u64::from(self.index)
    }

    /// Representative point of the cell as `(lon, lat)` in degrees
    pub fn center(&self) -> (f64, f64) {
        cell_center(self.index)
    }

    /// Render the cell as a GeoJSON Polygon feature
    ///
    /// Properties: `h3_index` (hex string), `value`, `polygon_id`, `rid`
    /// (null when absent) and `resolution`.
    pub fn to_feature(&self) -> Feature {
        let mut properties = JsonObject::new();
        properties.insert("h3_index".to_string(), serde_json::json!(self.index.to_string()));
        properties.insert("value".to_string(), serde_json::json!(self.value));
        properties.insert(
            "polygon_id".to_string(),
            serde_json::json!(self.origin_polygon_id),
        );
        properties.insert("rid".to_string(), serde_json::json!(self.source_raster_id));
        properties.insert(
            "resolution".to_string(),
            serde_json::json!(u8::from(self.resolution())),
        );

        Feature {
            bbox: None,
            geometry: Some(Geometry::new(GeoValue::Polygon(vec![boundary_ring(
                self.index,
            )]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }
}

/// Center of a cell as `(lon, lat)` in degrees
pub fn cell_center(cell: CellIndex) -> (f64, f64) {
    let center = LatLng::from(cell);
    (center.lng(), center.lat())
}

/// Closed boundary ring of a cell as GeoJSON positions
fn boundary_ring(cell: CellIndex) -> Vec<Position> {
    let mut ring: Vec<Position> = cell
        .boundary()
        .iter()
        .map(|vertex| vec![vertex.lng(), vertex.lat()])
        .collect();
    if let Some(first) = ring.first().cloned() {
        ring.push(first);
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cell() -> CellIndex {
        LatLng::new(10.0, 20.0).unwrap().to_cell(Resolution::Five)
    }

    #[test]
    fn test_hex_cell_resolution_follows_index() {
        let row = HexCell::new(sample_cell(), 3, 9);
        assert_eq!(row.resolution(), Resolution::Five);
        assert_eq!(row.raw_index(), u64::from(sample_cell()));
    }

    #[test]
    fn test_center_is_near_source_point() {
        let (lon, lat) = HexCell::new(sample_cell(), 3, 9).center();
        assert!((lon - 20.0).abs() < 0.2);
        assert!((lat - 10.0).abs() < 0.2);
    }

    #[test]
    fn test_to_feature() {
        let row = HexCell::new(sample_cell(), 14, 21).with_source_raster_id(Some(4));
        let feature = row.to_feature();

        assert_eq!(feature.property("value"), Some(&serde_json::json!(14)));
        assert_eq!(feature.property("polygon_id"), Some(&serde_json::json!(21)));
        assert_eq!(feature.property("rid"), Some(&serde_json::json!(4)));
        assert_eq!(feature.property("resolution"), Some(&serde_json::json!(5)));
        assert_eq!(
            feature.property("h3_index"),
            Some(&serde_json::json!(sample_cell().to_string()))
        );

        match feature.geometry.unwrap().value {
            GeoValue::Polygon(rings) => {
                assert_eq!(rings.len(), 1);
                assert!(rings[0].len() >= 7, "hexagon ring closes on its first vertex");
                assert_eq!(rings[0].first(), rings[0].last());
            }
            _ => panic!("Expected Polygon geometry"),
        }
    }
}
