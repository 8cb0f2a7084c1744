//! Polygon to hexagon enumeration
//!
//! A cell belongs to a polygon when its center lies inside the polygon's
//! covered area (inside an exterior ring, outside its holes). Multi-part
//! polygons cover the union of their parts.
//!
//! For each part:
//! 1. Every ring edge is sampled at a step well below the cell inradius and
//!    the cell under each sample is recorded. These boundary cells seed the
//!    search and bridge narrow parts of the polygon.
//! 2. A breadth-first walk over cell neighbours expands through cells whose
//!    center is inside. Every cell meeting the polygon is either a boundary
//!    cell or lies wholly inside it, so the walk reaches all of them.

use crate::aggregator::Candidate;
use crate::error::{IndexError, Result};
use crate::geometry::{normalize_lon, PreparedPart};
use crate::hex_cell::cell_center;
use crate::polygon::Polygon;
use arrayvec::ArrayVec;
use h3o::{CellIndex, LatLng, Resolution};
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Fraction of the smallest center-to-vertex distance used as edge sampling
/// step. Hexagon inradius is ~0.87 of it; cell sizes vary within a resolution.
const SAMPLING_FRACTION: f64 = 0.25;

/// Hexagons have 6 neighbours (pentagons 5) plus the cell itself.
type Disk = ArrayVec<CellIndex, 7>;

/// Enumerates the cells covering polygons at a fixed resolution
#[derive(Debug, Clone, Copy)]
pub struct CellEnumerator {
    resolution: Resolution,
}

impl CellEnumerator {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Sorted, de-duplicated cells covering the polygon
    ///
    /// Fails with [`IndexError::MalformedGeometry`] when any part is
    /// degenerate. A valid polygon smaller than a cell may cover no cell.
    pub fn cells(&self, polygon: &Polygon) -> Result<Vec<CellIndex>> {
        let malformed = |reason: String| IndexError::MalformedGeometry {
            polygon_id: polygon.id(),
            reason,
        };

        if polygon.parts().is_empty() {
            return Err(malformed("polygon has no parts".to_string()));
        }

        let mut covered = BTreeSet::new();
        for (part_idx, rings) in polygon.parts().iter().enumerate() {
            let part = PreparedPart::new(rings)
                .map_err(|reason| malformed(format!("part {}: {}", part_idx, reason)))?;
            self.cover_part(&part, &mut covered).map_err(malformed)?;
        }

        tracing::debug!(
            polygon_id = polygon.id(),
            cells = covered.len(),
            "Enumerated polygon"
        );

        Ok(covered.into_iter().collect())
    }

    /// Candidate triples for the polygon, tagged with its id and value
    pub fn enumerate(&self, polygon: &Polygon) -> Result<Vec<Candidate>> {
        Ok(self
            .cells(polygon)?
            .into_iter()
            .map(|cell| Candidate::from_polygon(cell, polygon))
            .collect())
    }

    fn cover_part(
        &self,
        part: &PreparedPart,
        covered: &mut BTreeSet<CellIndex>,
    ) -> std::result::Result<(), String> {
        let boundary = self.boundary_cells(part)?;

        let mut visited: HashSet<CellIndex> = boundary.clone();
        let mut queue: VecDeque<CellIndex> = VecDeque::with_capacity(boundary.len());

        for &cell in &boundary {
            if center_inside(part, cell) {
                covered.insert(cell);
            }
            queue.push_back(cell);
        }

        while let Some(cell) = queue.pop_front() {
            for neighbor in cell.grid_disk::<Disk>(1) {
                if !visited.insert(neighbor) {
                    continue;
                }
                if center_inside(part, neighbor) {
                    covered.insert(neighbor);
                    queue.push_back(neighbor);
                }
            }
        }

        Ok(())
    }

    /// Cells under densely sampled points of every ring edge
    fn boundary_cells(&self, part: &PreparedPart) -> std::result::Result<HashSet<CellIndex>, String> {
        let first = &part.rings()[0][0];
        let step = sampling_step(self.to_cell(first[0], first[1])?);

        let mut cells = HashSet::new();
        for ring in part.rings() {
            let n = ring.len();
            for i in 0..n {
                let a = &ring[i];
                let b = &ring[(i + 1) % n];
                let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
                let samples = ((dx.hypot(dy) / step).ceil() as usize).max(1);

                for s in 0..samples {
                    let t = s as f64 / samples as f64;
                    cells.insert(self.to_cell(a[0] + dx * t, a[1] + dy * t)?);
                }
            }
        }

        Ok(cells)
    }

    /// Cell under a point given in (possibly unwrapped) lon/lat degrees
    fn to_cell(&self, lon: f64, lat: f64) -> std::result::Result<CellIndex, String> {
        LatLng::new(lat, normalize_lon(lon))
            .map(|ll| ll.to_cell(self.resolution))
            .map_err(|e| format!("invalid coordinate ({}, {}): {}", lon, lat, e))
    }
}

fn center_inside(part: &PreparedPart, cell: CellIndex) -> bool {
    let (lon, lat) = cell_center(cell);
    part.contains(lon, lat)
}

/// Edge sampling step in degrees for cells about the size of `cell`
fn sampling_step(cell: CellIndex) -> f64 {
    let center = LatLng::from(cell);
    let radius = cell
        .boundary()
        .iter()
        .map(|vertex| angular_distance_deg(&center, vertex))
        .fold(f64::INFINITY, f64::min);
    radius * SAMPLING_FRACTION
}

/// Great-circle distance between two points, in degrees of arc
fn angular_distance_deg(a: &LatLng, b: &LatLng) -> f64 {
    let (lat1, lat2) = (a.lat().to_radians(), b.lat().to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lng() - a.lng()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
}
