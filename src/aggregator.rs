//! Per-cell conflict resolution
//!
//! Enumeration emits one [`Candidate`] per (cell, polygon). Overlapping
//! polygons produce several candidates for the same cell; this module reduces
//! them to exactly one [`HexCell`] per cell.
//!
//! # Resolution rule
//!
//! | Contributions | Winner |
//! |---------------|--------|
//! | notable + other band | notable |
//! | several in one band | lowest polygon id |
//!
//! Collecting and resolving are separate steps. Workers append to their own
//! [`CandidateStore`]; stores are concatenated; [`resolve`] then sorts the
//! whole set by `(cell, band, polygon id, value)` and keeps the first entry
//! per cell. The key is total, so the output does not depend on the order in
//! which candidates arrived.

use crate::config::ValueRange;
use crate::hex_cell::HexCell;
use crate::polygon::{Polygon, PolygonId};
use h3o::CellIndex;

/// One polygon's claim on one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub cell: CellIndex,
    pub value: i32,
    pub polygon_id: PolygonId,
    pub source_raster_id: Option<i64>,
}

impl Candidate {
    pub fn new(cell: CellIndex, value: i32, polygon_id: PolygonId) -> Self {
        Self {
            cell,
            value,
            polygon_id,
            source_raster_id: None,
        }
    }

    /// Candidate for `cell` carrying the polygon's id, value and raster row
    pub fn from_polygon(cell: CellIndex, polygon: &Polygon) -> Self {
        Self {
            cell,
            value: polygon.value(),
            polygon_id: polygon.id(),
            source_raster_id: polygon.source_raster_id(),
        }
    }

    fn into_hex_cell(self) -> HexCell {
        HexCell::new(self.cell, self.value, self.polygon_id)
            .with_source_raster_id(self.source_raster_id)
    }
}

/// Priority band of a classification value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueBand {
    /// Wins over every other band
    Notable,
    Other,
}

/// Band/tie-break policy applied when candidates collide on a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    notable: ValueRange,
}

impl ConflictPolicy {
    pub fn new(notable: ValueRange) -> Self {
        Self { notable }
    }

    pub fn notable(&self) -> ValueRange {
        self.notable
    }

    pub fn band(&self, value: i32) -> ValueBand {
        if self.notable.contains(value) {
            ValueBand::Notable
        } else {
            ValueBand::Other
        }
    }

    /// Sort key: cell first, then the preferred candidate of that cell first
    fn key(&self, c: &Candidate) -> (u64, ValueBand, PolygonId, i32) {
        (u64::from(c.cell), self.band(c.value), c.polygon_id, c.value)
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::new(ValueRange::default())
    }
}

/// Append-only candidate collection
///
/// One store per worker; stores are combined with [`CandidateStore::merge`]
/// and only read back by [`resolve`].
#[derive(Debug, Clone, Default)]
pub struct CandidateStore {
    candidates: Vec<Candidate>,
}

impl CandidateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    pub fn extend<I: IntoIterator<Item = Candidate>>(&mut self, candidates: I) {
        self.candidates.extend(candidates);
    }

    /// Concatenate two stores
    pub fn merge(mut self, mut other: CandidateStore) -> CandidateStore {
        if self.candidates.len() < other.candidates.len() {
            std::mem::swap(&mut self, &mut other);
        }
        self.candidates.append(&mut other.candidates);
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl FromIterator<Candidate> for CandidateStore {
    fn from_iter<I: IntoIterator<Item = Candidate>>(iter: I) -> Self {
        Self {
            candidates: iter.into_iter().collect(),
        }
    }
}

/// Statistics of one reduction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReduceStats {
    /// Candidates consumed.
    pub candidates: usize,

    /// Distinct cells produced.
    pub cells: usize,

    /// Cells claimed by more than one candidate.
    pub contested_cells: usize,

    /// Contested cells whose winner was decided by band rather than id order.
    pub decided_by_band: usize,
}

/// Reduce candidates to exactly one row per cell
///
/// Output is sorted by ascending cell index.
pub fn resolve(store: CandidateStore, policy: &ConflictPolicy) -> (Vec<HexCell>, ReduceStats) {
    let mut candidates = store.candidates;
    candidates.sort_unstable_by_key(|c| policy.key(c));

    let mut stats = ReduceStats {
        candidates: candidates.len(),
        ..ReduceStats::default()
    };
    let mut cells: Vec<HexCell> = Vec::new();

    let mut i = 0;
    while i < candidates.len() {
        let winner = candidates[i];
        let mut j = i + 1;
        while j < candidates.len() && candidates[j].cell == winner.cell {
            j += 1;
        }

        if j - i > 1 {
            stats.contested_cells += 1;
            let winner_band = policy.band(winner.value);
            if candidates[i + 1..j]
                .iter()
                .any(|c| policy.band(c.value) != winner_band)
            {
                stats.decided_by_band += 1;
            }
        }

        cells.push(winner.into_hex_cell());
        i = j;
    }

    stats.cells = cells.len();
    (cells, stats)
}
