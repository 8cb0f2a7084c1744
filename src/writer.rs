//! Index writers and batched commits
//!
//! The persistent store is external; [`IndexWriter`] is the contract the
//! engine needs from it. Two writers ship with the crate:
//!
//! - [`MemoryIndexWriter`]: an in-memory table with a primary key on the cell
//!   index and a foreign key to the registered polygons
//! - [`GeoJsonIndexWriter`]: renders committed rows as a FeatureCollection
//!
//! [`write_batches`] splits the resolved rows into batches and commits each
//! one with bounded retries. Batch size only changes how many calls are made,
//! never which rows end up stored.

use crate::error::{IndexError, Result, WriteError};
use crate::hex_cell::HexCell;
use crate::polygon::{PolygonId, PolygonRef};
use geojson::{Feature, FeatureCollection};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::num::NonZeroUsize;

/// Sink for resolved index rows
///
/// Both methods are all-or-nothing: on error the writer must be left exactly
/// as it was before the call, so the same batch can be retried.
pub trait IndexWriter {
    /// Register the polygons cells may reference, before any batch
    fn register_polygons(&mut self, _polygons: &[PolygonRef]) -> std::result::Result<(), WriteError> {
        Ok(())
    }

    /// Commit one batch of rows
    fn commit_batch(&mut self, batch: &[HexCell]) -> std::result::Result<(), WriteError>;
}

impl<W: IndexWriter + ?Sized> IndexWriter for &mut W {
    fn register_polygons(&mut self, polygons: &[PolygonRef]) -> std::result::Result<(), WriteError> {
        (**self).register_polygons(polygons)
    }

    fn commit_batch(&mut self, batch: &[HexCell]) -> std::result::Result<(), WriteError> {
        (**self).commit_batch(batch)
    }
}

/// In-memory index table
///
/// Rows are keyed by cell index (primary key) and must reference a registered
/// polygon (foreign key).
#[derive(Debug, Clone, Default)]
pub struct MemoryIndexWriter {
    polygons: HashMap<PolygonId, PolygonRef>,
    rows: BTreeMap<u64, HexCell>,
    batches_committed: usize,
}

impl MemoryIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored rows in ascending cell index order
    pub fn rows(&self) -> Vec<HexCell> {
        self.rows.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    pub fn polygon(&self, id: PolygonId) -> Option<&PolygonRef> {
        self.polygons.get(&id)
    }

    /// Empty the table and the polygon registry
    pub fn truncate(&mut self) {
        self.polygons.clear();
        self.rows.clear();
        self.batches_committed = 0;
    }
}

impl IndexWriter for MemoryIndexWriter {
    fn register_polygons(&mut self, polygons: &[PolygonRef]) -> std::result::Result<(), WriteError> {
        let mut incoming = HashSet::with_capacity(polygons.len());
        for polygon in polygons {
            if self.polygons.contains_key(&polygon.id) || !incoming.insert(polygon.id) {
                return Err(WriteError::Rejected(format!(
                    "duplicate polygon id {}",
                    polygon.id
                )));
            }
        }

        self.polygons
            .extend(polygons.iter().map(|polygon| (polygon.id, *polygon)));
        Ok(())
    }

    fn commit_batch(&mut self, batch: &[HexCell]) -> std::result::Result<(), WriteError> {
        let mut incoming = HashSet::with_capacity(batch.len());
        for row in batch {
            let key = row.raw_index();
            if self.rows.contains_key(&key) || !incoming.insert(key) {
                return Err(WriteError::Rejected(format!(
                    "duplicate h3_index {}",
                    row.index
                )));
            }
            if !self.polygons.contains_key(&row.origin_polygon_id) {
                return Err(WriteError::Rejected(format!(
                    "h3_index {} references unknown polygon {}",
                    row.index, row.origin_polygon_id
                )));
            }
        }

        self.rows
            .extend(batch.iter().map(|row| (row.raw_index(), *row)));
        self.batches_committed += 1;
        Ok(())
    }
}

/// Writer collecting committed rows as GeoJSON features
#[derive(Debug, Clone, Default)]
pub struct GeoJsonIndexWriter {
    features: Vec<Feature>,
}

impl GeoJsonIndexWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn into_feature_collection(self) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            foreign_members: None,
            features: self.features,
        }
    }

    /// Serialize the collected features as a GeoJSON FeatureCollection
    pub fn write_to<W: Write>(self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, &self.into_feature_collection())?;
        Ok(())
    }
}

impl IndexWriter for GeoJsonIndexWriter {
    fn commit_batch(&mut self, batch: &[HexCell]) -> std::result::Result<(), WriteError> {
        let features: Vec<Feature> = batch.iter().map(HexCell::to_feature).collect();
        self.features.extend(features);
        Ok(())
    }
}

/// Counters from committing a run's rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub batches: usize,
    pub rows: usize,
    /// Failed attempts that were retried successfully.
    pub retries: usize,
}

/// Commit rows in batches of at most `batch_size` (`None`: one batch)
///
/// Each batch is attempted up to `max_attempts` times while the writer
/// reports [`WriteError::Unavailable`]; a [`WriteError::Rejected`] batch fails
/// at once. Failure is reported as [`IndexError::WriterBatchFailure`] and
/// leaves previously committed batches in place.
pub fn write_batches(
    rows: &[HexCell],
    writer: &mut dyn IndexWriter,
    batch_size: Option<NonZeroUsize>,
    max_attempts: u32,
) -> Result<WriteStats> {
    let mut stats = WriteStats::default();
    if rows.is_empty() {
        return Ok(stats);
    }

    let size = batch_size.map_or(rows.len(), NonZeroUsize::get);
    for (batch_no, batch) in rows.chunks(size).enumerate() {
        stats.retries += commit_with_retry(writer, batch_no, batch, max_attempts)?;
        stats.batches += 1;
        stats.rows += batch.len();
    }

    Ok(stats)
}

/// Commit one batch, returning how many attempts failed before it succeeded
fn commit_with_retry(
    writer: &mut dyn IndexWriter,
    batch_no: usize,
    batch: &[HexCell],
    max_attempts: u32,
) -> Result<usize> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match writer.commit_batch(batch) {
            Ok(()) => {
                tracing::debug!(batch = batch_no, rows = batch.len(), attempt, "Committed batch");
                return Ok((attempt - 1) as usize);
            }
            Err(WriteError::Unavailable(reason)) if attempt < max_attempts => {
                tracing::warn!(
                    batch = batch_no,
                    attempt,
                    max_attempts,
                    reason = %reason,
                    "Batch commit failed, retrying"
                );
            }
            Err(source) => {
                tracing::error!(batch = batch_no, attempt, error = %source, "Batch commit failed");
                return Err(IndexError::WriterBatchFailure {
                    batch: batch_no,
                    attempts: attempt,
                    source,
                });
            }
        }
    }
}
