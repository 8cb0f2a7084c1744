//! Planar polygon geometry in longitude/latitude space
//!
//! Validation, antimeridian unwrapping and point containment for polygon
//! parts. Everything here works on `[lon, lat]` positions in degrees, treating
//! them as planar coordinates.

use geojson::Position;

/// Areas below this (in square degrees) are treated as zero.
const AREA_EPSILON: f64 = 1e-12;

/// Bounding box of a ring in (possibly unwrapped) lon/lat space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BBox {
    /// Compute bounding box from a ring
    pub fn from_ring(ring: &[Position]) -> Self {
        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for point in ring {
            min_x = min_x.min(point[0]);
            max_x = max_x.max(point[0]);
            min_y = min_y.min(point[1]);
            max_y = max_y.max(point[1]);
        }

        Self { min_x, max_x, min_y, max_y }
    }

    /// Check if a point falls inside or on the box
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Check if a point is inside a ring using ray casting
///
/// Reference: http://www.ecse.rpi.edu/Homepages/wrf/Research/Short_Notes/pnpoly.html
pub fn point_in_ring(point: &[f64], ring: &[Position]) -> bool {
    if ring.is_empty() {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;

    for i in 0..ring.len() {
        let one = &ring[i];
        let two = &ring[j];

        if ((one[1] > point[1]) != (two[1] > point[1]))
            && (point[0] < (two[0] - one[0]) * (point[1] - one[1]) / (two[1] - one[1]) + one[0])
        {
            inside = !inside;
        }

        j = i;
    }

    inside
}

/// Signed area of a ring (shoelace formula), positive when counter-clockwise
pub fn ring_area(ring: &[Position]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        sum += (ring[j][0] - ring[i][0]) * (ring[j][1] + ring[i][1]);
        j = i;
    }
    sum / 2.0
}

/// A validated polygon part ready for containment tests
///
/// Rings are open (no repeated closing vertex), free of consecutive duplicate
/// vertices, and unwrapped across the antimeridian when the part crosses it:
/// negative longitudes are shifted by +360 so the part is continuous.
#[derive(Debug, Clone)]
pub struct PreparedPart {
    rings: Vec<Vec<Position>>,
    bbox: BBox,
    wraps: bool,
}

impl PreparedPart {
    /// Validate and prepare one part (exterior ring followed by holes)
    ///
    /// Returns a human-readable reason when the part is degenerate.
    pub fn new(rings: &[Vec<Position>]) -> std::result::Result<Self, String> {
        if rings.is_empty() {
            return Err("polygon part has no rings".to_string());
        }

        let mut cleaned = Vec::with_capacity(rings.len());
        for (ring_idx, ring) in rings.iter().enumerate() {
            let ring = clean_ring(ring).map_err(|e| format!("ring {}: {}", ring_idx, e))?;
            cleaned.push(ring);
        }

        let wraps = cleaned.iter().any(|ring| crosses_antimeridian(ring));
        if wraps {
            for ring in &mut cleaned {
                for point in ring.iter_mut() {
                    point[0] = unwrap_lon(point[0]);
                }
            }
        }

        for (ring_idx, ring) in cleaned.iter().enumerate() {
            if ring_area(ring).abs() < AREA_EPSILON {
                return Err(format!("ring {}: zero area", ring_idx));
            }
        }

        if let Some((a, b)) = find_self_intersection(&cleaned) {
            return Err(format!(
                "self-intersection between ring {} edge {} and ring {} edge {}",
                a.0, a.1, b.0, b.1
            ));
        }

        for (ring_idx, hole) in cleaned.iter().enumerate().skip(1) {
            if !hole_inside(hole, &cleaned[0]) {
                return Err(format!("ring {}: hole outside exterior ring", ring_idx));
            }
        }

        let bbox = BBox::from_ring(&cleaned[0]);
        Ok(Self {
            rings: cleaned,
            bbox,
            wraps,
        })
    }

    /// Rings of the part in unwrapped coordinates, exterior first
    pub fn rings(&self) -> &[Vec<Position>] {
        &self.rings
    }

    /// Whether the part crosses the antimeridian
    pub fn wraps(&self) -> bool {
        self.wraps
    }

    /// Check whether a geographic point lies in the covered area
    ///
    /// Inside the exterior ring and outside every hole.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let x = if self.wraps { unwrap_lon(lon) } else { lon };
        if !self.bbox.contains(x, lat) {
            return false;
        }

        let point = [x, lat];
        point_in_ring(&point, &self.rings[0])
            && !self.rings[1..].iter().any(|hole| point_in_ring(&point, hole))
    }
}

/// Check a hole against its exterior ring
///
/// Rings are already known not to cross, so one hole vertex that is not
/// shared with the exterior decides it.
fn hole_inside(hole: &[Position], exterior: &[Position]) -> bool {
    hole.iter()
        .find(|vertex| !exterior.contains(*vertex))
        .map_or(true, |vertex| point_in_ring(vertex, exterior))
}

/// Shift a longitude into the continuous [0, 360) space used for wrapped parts
fn unwrap_lon(lon: f64) -> f64 {
    if lon < 0.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// Bring a longitude back into [-180, 180)
pub fn normalize_lon(lon: f64) -> f64 {
    let wrapped = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 && lon > 0.0 {
        180.0
    } else {
        wrapped
    }
}

/// A ring crosses the antimeridian when any edge jumps more than 180 degrees
fn crosses_antimeridian(ring: &[Position]) -> bool {
    let n = ring.len();
    (0..n).any(|i| (ring[(i + 1) % n][0] - ring[i][0]).abs() > 180.0)
}

/// Validate coordinates, drop the closing vertex and consecutive duplicates
fn clean_ring(ring: &[Position]) -> std::result::Result<Vec<Position>, String> {
    let mut cleaned: Vec<Position> = Vec::with_capacity(ring.len());

    for point in ring {
        if point.len() < 2 {
            return Err("position with fewer than 2 coordinates".to_string());
        }
        let (lon, lat) = (point[0], point[1]);
        if !lon.is_finite() || !lat.is_finite() {
            return Err("non-finite coordinate".to_string());
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(format!("coordinate ({}, {}) out of range", lon, lat));
        }
        if cleaned.last().map_or(true, |last| last[0] != lon || last[1] != lat) {
            cleaned.push(vec![lon, lat]);
        }
    }

    while cleaned.len() > 1 && cleaned.first() == cleaned.last() {
        cleaned.pop();
    }

    let mut distinct: Vec<(u64, u64)> = cleaned
        .iter()
        .map(|p| (p[0].to_bits(), p[1].to_bits()))
        .collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() < 3 {
        return Err(format!(
            "fewer than 3 distinct vertices ({})",
            distinct.len()
        ));
    }

    Ok(cleaned)
}

/// Edge of a ring used by the intersection sweep
#[derive(Debug, Clone, Copy)]
struct Segment {
    ring: usize,
    index: usize,
    ring_len: usize,
    a: [f64; 2],
    b: [f64; 2],
}

impl Segment {
    fn min_x(&self) -> f64 {
        self.a[0].min(self.b[0])
    }

    fn max_x(&self) -> f64 {
        self.a[0].max(self.b[0])
    }

    /// Adjacent edges of the same ring share a vertex by construction
    fn is_adjacent(&self, other: &Segment) -> bool {
        if self.ring != other.ring {
            return false;
        }
        let diff = self.index.abs_diff(other.index);
        diff == 1 || diff == self.ring_len - 1
    }
}

fn orientation(a: [f64; 2], b: [f64; 2], c: [f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Check whether two segments cross or overlap along a stretch
///
/// Touching at a single point is allowed; rings produced by polygonization
/// routinely touch at vertices.
fn segments_conflict(s: &Segment, t: &Segment) -> bool {
    let o1 = orientation(s.a, s.b, t.a);
    let o2 = orientation(s.a, s.b, t.b);
    let o3 = orientation(t.a, t.b, s.a);
    let o4 = orientation(t.a, t.b, s.b);

    if o1 * o2 < 0.0 && o3 * o4 < 0.0 {
        return true;
    }

    if o1 == 0.0 && o2 == 0.0 {
        // Collinear: conflict only when the projections overlap with length
        let axis = if (s.a[0] - s.b[0]).abs() >= (s.a[1] - s.b[1]).abs() { 0 } else { 1 };
        let (s0, s1) = (s.a[axis].min(s.b[axis]), s.a[axis].max(s.b[axis]));
        let (t0, t1) = (t.a[axis].min(t.b[axis]), t.a[axis].max(t.b[axis]));
        return s1.min(t1) - s0.max(t0) > 0.0;
    }

    false
}

/// Find a pair of conflicting edges across all rings of a part
///
/// Sweeps edges sorted by their minimum x so only edges with overlapping x
/// extents are compared. Returns `((ring, edge), (ring, edge))`.
fn find_self_intersection(rings: &[Vec<Position>]) -> Option<((usize, usize), (usize, usize))> {
    let mut segments: Vec<Segment> = Vec::new();
    for (ring_idx, ring) in rings.iter().enumerate() {
        let n = ring.len();
        for i in 0..n {
            let a = &ring[i];
            let b = &ring[(i + 1) % n];
            segments.push(Segment {
                ring: ring_idx,
                index: i,
                ring_len: n,
                a: [a[0], a[1]],
                b: [b[0], b[1]],
            });
        }
    }

    segments.sort_by(|s, t| s.min_x().total_cmp(&t.min_x()));

    for i in 0..segments.len() {
        let s = &segments[i];
        for t in &segments[i + 1..] {
            if t.min_x() > s.max_x() {
                break;
            }
            if s.is_adjacent(t) {
                continue;
            }
            if segments_conflict(s, t) {
                return Some(((s.ring, s.index), (t.ring, t.index)));
            }
        }
    }

    None
}
