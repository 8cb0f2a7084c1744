//! Classified source polygons
//!
//! A [`Polygon`] is what the geometry source hands the engine: rings of
//! `[lon, lat]` positions in degrees, an integer classification value and the
//! identifiers needed to trace a hexagon back to the row it came from.

use crate::error::{IndexError, Result};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Position, Value as GeoValue};

/// Stable identifier of a source polygon. Conflicts between overlapping
/// polygons are broken by ascending id.
pub type PolygonId = u64;

/// Rings of one polygon part: exterior ring first, then holes.
pub type PolygonRings = Vec<Vec<Position>>;

/// A classified polygon produced by the geometry source
///
/// Multi-part polygons cover the union of their parts. Rings may be given
/// closed (first position repeated at the end) or open.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    id: PolygonId,
    parts: Vec<PolygonRings>,
    value: i32,
    source_raster_id: Option<i64>,
}

impl Polygon {
    /// Create a single-part polygon from an exterior ring and optional holes
    pub fn new(id: PolygonId, rings: PolygonRings, value: i32) -> Self {
        Self {
            id,
            parts: vec![rings],
            value,
            source_raster_id: None,
        }
    }

    /// Create a polygon covering the union of several parts
    pub fn multi(id: PolygonId, parts: Vec<PolygonRings>, value: i32) -> Self {
        Self {
            id,
            parts,
            value,
            source_raster_id: None,
        }
    }

    /// Attach the raster row the polygon was polygonized from
    pub fn with_source_raster_id(mut self, rid: i64) -> Self {
        self.source_raster_id = Some(rid);
        self
    }

    pub fn id(&self) -> PolygonId {
        self.id
    }

    pub fn parts(&self) -> &[PolygonRings] {
        &self.parts
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    pub fn source_raster_id(&self) -> Option<i64> {
        self.source_raster_id
    }

    /// Reference row for this polygon, as registered with the index writer
    pub fn as_ref_row(&self) -> PolygonRef {
        PolygonRef {
            id: self.id,
            value: self.value,
            source_raster_id: self.source_raster_id,
        }
    }

    /// Build a polygon from a GeoJSON feature
    ///
    /// The classification value is read from the `value` property, falling
    /// back to `val`. The id comes from the feature id, then the `polygon_id`
    /// property, then `fallback_id`. The raster row is read from `rid`; a
    /// `rid` that is present but not an integer is an error.
    pub fn from_feature(feature: &Feature, fallback_id: PolygonId) -> Result<Self> {
        let id = extract_id(feature).unwrap_or(fallback_id);

        let value = extract_int(feature, "value")
            .or_else(|| extract_int(feature, "val"))
            .ok_or_else(|| {
                IndexError::Source(format!("feature {} has no integer value property", id))
            })?;
        let value = i32::try_from(value).map_err(|_| {
            IndexError::Source(format!("feature {} value {} out of range", id, value))
        })?;

        let parts = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(GeoValue::Polygon(rings)) => vec![rings.clone()],
            Some(GeoValue::MultiPolygon(polygons)) => polygons.clone(),
            Some(_) => {
                return Err(IndexError::Source(format!(
                    "feature {} is not a Polygon or MultiPolygon",
                    id
                )))
            }
            None => {
                return Err(IndexError::Source(format!("feature {} has no geometry", id)))
            }
        };

        let mut polygon = Self::multi(id, parts, value);
        match feature.property("rid") {
            None | Some(serde_json::Value::Null) => {}
            Some(raw) => {
                let rid = extract_int(feature, "rid").ok_or_else(|| {
                    IndexError::Source(format!("feature {} rid {} is not an integer", id, raw))
                })?;
                polygon = polygon.with_source_raster_id(rid);
            }
        }
        Ok(polygon)
    }
}

/// Row describing a polygon that contributed cells to the index
///
/// Writers use these to enforce the foreign key from cell rows to polygons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolygonRef {
    pub id: PolygonId,
    pub value: i32,
    pub source_raster_id: Option<i64>,
}

/// Finite supply of polygons for one run
pub trait GeometrySource {
    /// Resolution the source was prepared for, if it declares one
    fn declared_resolution(&self) -> Option<u8> {
        None
    }

    /// Produce every polygon of the run
    fn polygons(&mut self) -> Result<Vec<Polygon>>;
}

impl GeometrySource for Vec<Polygon> {
    fn polygons(&mut self) -> Result<Vec<Polygon>> {
        Ok(std::mem::take(self))
    }
}

/// Geometry source over a GeoJSON FeatureCollection
///
/// Features without an id are numbered upwards from one past the largest
/// explicit id, in collection order, so they never collide with it.
pub struct FeatureCollectionSource {
    collection: FeatureCollection,
    resolution: Option<u8>,
}

impl FeatureCollectionSource {
    pub fn new(collection: FeatureCollection) -> Self {
        Self {
            collection,
            resolution: None,
        }
    }

    /// Declare the resolution the features were prepared for
    pub fn with_declared_resolution(mut self, resolution: u8) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Parse a FeatureCollection from GeoJSON text
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(text)?;
        Ok(Self::new(collection))
    }
}

impl GeometrySource for FeatureCollectionSource {
    fn declared_resolution(&self) -> Option<u8> {
        self.resolution
    }

    fn polygons(&mut self) -> Result<Vec<Polygon>> {
        let features = &self.collection.features;
        let explicit: Vec<Option<PolygonId>> = features.iter().map(extract_id).collect();

        let mut next_id: PolygonId = match explicit.iter().flatten().max() {
            Some(&max) => max.checked_add(1).ok_or_else(|| {
                IndexError::Source("no polygon id left for features without one".to_string())
            })?,
            None => 1,
        };

        let mut polygons = Vec::with_capacity(features.len());
        for (feature, id) in features.iter().zip(explicit) {
            let id = match id {
                Some(id) => id,
                None => {
                    let assigned = next_id;
                    next_id = next_id.checked_add(1).ok_or_else(|| {
                        IndexError::Source("polygon id space exhausted".to_string())
                    })?;
                    assigned
                }
            };
            polygons.push(Polygon::from_feature(feature, id)?);
        }
        Ok(polygons)
    }
}

/// Extract the polygon id from the feature id, or the `polygon_id` property
/// when the feature id is missing or not a non-negative integer
fn extract_id(feature: &Feature) -> Option<PolygonId> {
    let from_id = match &feature.id {
        Some(Id::Number(n)) => n.as_u64(),
        Some(Id::String(s)) => s.parse().ok(),
        None => None,
    };
    from_id.or_else(|| feature.property("polygon_id").and_then(|v| v.as_u64()))
}

/// Extract an integer property, accepting integral floats
fn extract_int(feature: &Feature, key: &str) -> Option<i64> {
    let value = feature.property(key)?;
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::{Geometry, JsonObject};

    fn square(x: f64, y: f64, size: f64) -> Vec<Position> {
        vec![
            vec![x, y],
            vec![x + size, y],
            vec![x + size, y + size],
            vec![x, y + size],
            vec![x, y],
        ]
    }

    fn feature(value: GeoValue, properties: serde_json::Value, id: Option<Id>) -> Feature {
        let properties: JsonObject = match properties {
            serde_json::Value::Object(map) => map,
            _ => JsonObject::new(),
        };
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(value)),
            id,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    #[test]
    fn test_from_feature_polygon() {
        let f = feature(
            GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
            serde_json::json!({ "val": 12, "rid": 7 }),
            Some(Id::Number(42.into())),
        );

        let polygon = Polygon::from_feature(&f, 1).unwrap();
        assert_eq!(polygon.id(), 42);
        assert_eq!(polygon.value(), 12);
        assert_eq!(polygon.source_raster_id(), Some(7));
        assert_eq!(polygon.parts().len(), 1);
    }

    #[test]
    fn test_from_feature_multipolygon_and_fallback_id() {
        let f = feature(
            GeoValue::MultiPolygon(vec![
                vec![square(0.0, 0.0, 1.0)],
                vec![square(5.0, 5.0, 1.0)],
            ]),
            serde_json::json!({ "value": 3.0 }),
            None,
        );

        let polygon = Polygon::from_feature(&f, 9).unwrap();
        assert_eq!(polygon.id(), 9);
        assert_eq!(polygon.value(), 3);
        assert_eq!(polygon.parts().len(), 2);
        assert_eq!(polygon.source_raster_id(), None);
    }

    #[test]
    fn test_from_feature_requires_value() {
        let f = feature(
            GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
            serde_json::json!({ "name": "no value" }),
            None,
        );
        assert!(matches!(
            Polygon::from_feature(&f, 1),
            Err(IndexError::Source(_))
        ));
    }

    #[test]
    fn test_from_feature_rejects_points() {
        let f = feature(
            GeoValue::Point(vec![1.0, 2.0]),
            serde_json::json!({ "value": 1 }),
            None,
        );
        assert!(matches!(
            Polygon::from_feature(&f, 1),
            Err(IndexError::Source(_))
        ));
    }

    #[test]
    fn test_feature_collection_source() {
        let text = serde_json::json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "value": 11, "polygon_id": 5 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                    }
                },
                {
                    "type": "Feature",
                    "properties": { "value": 2 },
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[2.0, 0.0], [3.0, 0.0], [3.0, 1.0], [2.0, 0.0]]]
                    }
                }
            ]
        })
        .to_string();

        let mut source = FeatureCollectionSource::from_geojson_str(&text)
            .unwrap()
            .with_declared_resolution(5);
        assert_eq!(source.declared_resolution(), Some(5));

        let polygons = source.polygons().unwrap();
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].id(), 5);
        assert_eq!(polygons[1].id(), 6);
    }

    fn collection(features: Vec<Feature>) -> FeatureCollectionSource {
        FeatureCollectionSource::new(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }

    #[test]
    fn test_generated_ids_avoid_explicit_ids() {
        let ring = || GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]);
        let mut source = collection(vec![
            feature(ring(), serde_json::json!({ "value": 3 }), None),
            feature(ring(), serde_json::json!({ "value": 3 }), Some(Id::Number(2.into()))),
            feature(ring(), serde_json::json!({ "value": 3 }), None),
        ]);

        let ids: Vec<PolygonId> = source.polygons().unwrap().iter().map(Polygon::id).collect();
        assert_eq!(ids, vec![3, 2, 4]);
    }

    #[test]
    fn test_string_id_falls_back_to_property() {
        let f = feature(
            GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
            serde_json::json!({ "value": 3, "polygon_id": 17 }),
            Some(Id::String("parcel-a".to_string())),
        );
        assert_eq!(Polygon::from_feature(&f, 1).unwrap().id(), 17);

        let numeric = feature(
            GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
            serde_json::json!({ "value": 3 }),
            Some(Id::String("21".to_string())),
        );
        assert_eq!(Polygon::from_feature(&numeric, 1).unwrap().id(), 21);
    }

    #[test]
    fn test_non_integer_rid_rejected() {
        for rid in [serde_json::json!("row-7"), serde_json::json!(7.5)] {
            let f = feature(
                GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
                serde_json::json!({ "value": 3, "rid": rid }),
                None,
            );
            assert!(matches!(
                Polygon::from_feature(&f, 1),
                Err(IndexError::Source(_))
            ));
        }

        let null_rid = feature(
            GeoValue::Polygon(vec![square(0.0, 0.0, 1.0)]),
            serde_json::json!({ "value": 3, "rid": null }),
            None,
        );
        assert_eq!(Polygon::from_feature(&null_rid, 1).unwrap().source_raster_id(), None);
    }
}
