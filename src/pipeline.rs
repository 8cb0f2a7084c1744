//! Run orchestration
//!
//! One run takes polygons from a [`GeometrySource`] through enumeration,
//! conflict resolution and domain filtering into an [`IndexWriter`]:
//!
//! ```text
//! GeometrySource ──► CellEnumerator (parallel, per polygon)
//!                          │  per-worker CandidateStore
//!                          ▼
//!                    merge stores ──► resolve (single pass)
//!                                          │
//!                                          ▼
//!                                    DomainFilter ──► write_batches ──► IndexWriter
//! ```
//!
//! Configuration problems (bad config, resolution mismatch, duplicate polygon
//! ids, unusable mask) fail the run before any enumeration starts. Malformed
//! polygons are skipped and counted. Writer failures are retried and then
//! fail the run.

use crate::aggregator::{resolve, CandidateStore, ConflictPolicy};
use crate::config::{IndexConfig, RunParams};
use crate::enumerator::CellEnumerator;
use crate::error::{IndexError, Result};
use crate::hex_cell::HexCell;
use crate::mask::{DomainFilter, MaskProvider};
use crate::polygon::{GeometrySource, Polygon, PolygonId, PolygonRef};
use crate::writer::{write_batches, IndexWriter};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whole-run cancellation flag, shared between the caller and workers
///
/// Honoured up to the end of conflict resolution. A cancelled run returns
/// [`IndexError::Cancelled`] without touching the writer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(IndexError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Polygon dropped during enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedPolygon {
    pub polygon_id: PolygonId,
    pub reason: String,
}

/// Per-run summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Polygons produced by the source.
    pub polygons_read: usize,

    /// Polygons dropped by the source value range.
    pub polygons_filtered: usize,

    /// Polygons enumerated successfully.
    pub polygons_enumerated: usize,

    /// Polygons skipped as malformed.
    pub polygons_skipped: usize,

    pub skipped: Vec<SkippedPolygon>,

    pub candidates: usize,

    /// Distinct cells after conflict resolution, before domain filtering.
    pub cells_resolved: usize,

    pub contested_cells: usize,

    pub decided_by_band: usize,

    /// Whether a domain mask restricted the output.
    pub mask_applied: bool,

    pub cells_masked_out: usize,

    pub cells_written: usize,

    pub batches_committed: usize,

    pub batch_retries: usize,
}

/// Resolved output of a run before it is written
#[derive(Debug, Clone, Default)]
pub struct ResolvedIndex {
    /// Rows in ascending cell order, unique per cell.
    pub cells: Vec<HexCell>,

    /// Polygons that enumerated successfully, ascending by id.
    pub polygons: Vec<PolygonRef>,

    pub summary: RunSummary,
}

/// Configured indexing engine
#[derive(Debug, Clone)]
pub struct IndexPipeline {
    params: RunParams,
    enumerator: CellEnumerator,
    policy: ConflictPolicy,
}

impl IndexPipeline {
    /// Validate the configuration and set up the engine
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let params = config.validate()?;
        Ok(Self {
            params,
            enumerator: CellEnumerator::new(params.resolution),
            policy: ConflictPolicy::new(params.notable_band),
        })
    }

    pub fn params(&self) -> &RunParams {
        &self.params
    }

    pub fn enumerator(&self) -> &CellEnumerator {
        &self.enumerator
    }

    /// Run the whole pipeline
    pub fn run(
        &self,
        source: &mut dyn GeometrySource,
        mask: &dyn MaskProvider,
        writer: &mut dyn IndexWriter,
        cancel: &CancelToken,
    ) -> Result<RunSummary> {
        let resolution = self.params.resolution;

        if let Some(declared) = source.declared_resolution() {
            if declared != u8::from(resolution) {
                return Err(IndexError::ResolutionMismatch {
                    expected: u8::from(resolution),
                    found: declared,
                    origin: "geometry source".to_string(),
                });
            }
        }

        let filter = DomainFilter::detect(mask, resolution)?;
        let polygons = source.polygons()?;

        tracing::info!(
            polygons = polygons.len(),
            resolution = u8::from(resolution),
            masked = filter.is_masked(),
            "Starting hex index run"
        );

        let resolved = self.resolve_polygons(polygons, &filter, cancel)?;
        let mut summary = resolved.summary;

        writer
            .register_polygons(&resolved.polygons)
            .map_err(IndexError::PolygonRegistry)?;

        let stats = write_batches(
            &resolved.cells,
            writer,
            self.params.batch_size,
            self.params.max_commit_attempts,
        )?;
        summary.cells_written = stats.rows;
        summary.batches_committed = stats.batches;
        summary.batch_retries = stats.retries;

        tracing::info!(
            cells_written = summary.cells_written,
            batches = summary.batches_committed,
            skipped = summary.polygons_skipped,
            masked_out = summary.cells_masked_out,
            "Hex index run complete"
        );

        Ok(summary)
    }

    /// Enumerate, resolve and filter without writing
    ///
    /// Fails on duplicate polygon ids, since conflict resolution orders by id.
    pub fn resolve_polygons(
        &self,
        polygons: Vec<Polygon>,
        filter: &DomainFilter,
        cancel: &CancelToken,
    ) -> Result<ResolvedIndex> {
        check_unique_ids(&polygons)?;

        let mut summary = RunSummary {
            polygons_read: polygons.len(),
            mask_applied: filter.is_masked(),
            ..RunSummary::default()
        };

        let polygons: Vec<Polygon> = match self.params.source_values {
            Some(range) => polygons
                .into_iter()
                .filter(|p| range.contains(p.value()))
                .collect(),
            None => polygons,
        };
        summary.polygons_filtered = summary.polygons_read - polygons.len();

        cancel.check()?;
        let (store, skipped) = self.collect(&polygons, cancel)?;
        cancel.check()?;

        let skipped_ids: HashSet<PolygonId> = skipped.iter().map(|s| s.polygon_id).collect();
        let mut refs: Vec<PolygonRef> = polygons
            .iter()
            .filter(|p| !skipped_ids.contains(&p.id()))
            .map(Polygon::as_ref_row)
            .collect();
        refs.sort_unstable_by_key(|r| r.id);

        summary.polygons_enumerated = refs.len();
        summary.polygons_skipped = skipped.len();
        summary.skipped = skipped;

        let (cells, stats) = resolve(store, &self.policy);
        cancel.check()?;

        summary.candidates = stats.candidates;
        summary.cells_resolved = stats.cells;
        summary.contested_cells = stats.contested_cells;
        summary.decided_by_band = stats.decided_by_band;

        let (cells, removed) = filter.apply(cells);
        summary.cells_masked_out = removed;

        tracing::debug!(
            candidates = summary.candidates,
            cells = cells.len(),
            contested = summary.contested_cells,
            "Resolved cell conflicts"
        );

        Ok(ResolvedIndex {
            cells,
            polygons: refs,
            summary,
        })
    }

    /// Enumerate polygons in parallel into per-worker stores
    fn collect(
        &self,
        polygons: &[Polygon],
        cancel: &CancelToken,
    ) -> Result<(CandidateStore, Vec<SkippedPolygon>)> {
        let work = || {
            polygons
                .par_iter()
                .fold(
                    || (CandidateStore::new(), Vec::new()),
                    |(mut store, mut skipped), polygon| {
                        if cancel.is_cancelled() {
                            return (store, skipped);
                        }
                        match self.enumerator.enumerate(polygon) {
                            Ok(candidates) => store.extend(candidates),
                            Err(e) => {
                                tracing::warn!(
                                    polygon_id = polygon.id(),
                                    error = %e,
                                    "Skipping malformed polygon"
                                );
                                skipped.push(SkippedPolygon {
                                    polygon_id: polygon.id(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                        (store, skipped)
                    },
                )
                .reduce(
                    || (CandidateStore::new(), Vec::new()),
                    |(left, mut left_skipped), (right, right_skipped)| {
                        left_skipped.extend(right_skipped);
                        (left.merge(right), left_skipped)
                    },
                )
        };

        let (store, mut skipped): (CandidateStore, Vec<SkippedPolygon>) =
            match self.params.worker_threads {
                Some(threads) => rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| IndexError::Config(format!("worker pool: {}", e)))?
                    .install(work),
                None => work(),
            };

        skipped.sort_by_key(|s| s.polygon_id);
        Ok((store, skipped))
    }
}

fn check_unique_ids(polygons: &[Polygon]) -> Result<()> {
    let mut seen = HashSet::with_capacity(polygons.len());
    for polygon in polygons {
        if !seen.insert(polygon.id()) {
            return Err(IndexError::Config(format!(
                "duplicate polygon id {}",
                polygon.id()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueRange;
    use crate::mask::NoMask;
    use crate::writer::MemoryIndexWriter;
    use geojson::Position;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<Position> {
        vec![
            vec![min_x, min_y],
            vec![max_x, min_y],
            vec![max_x, max_y],
            vec![min_x, max_y],
            vec![min_x, min_y],
        ]
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(!token.is_cancelled());
        shared.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(IndexError::Cancelled)));
    }

    #[test]
    fn test_duplicate_ids_fail_fast() {
        let pipeline = IndexPipeline::new(&IndexConfig::default()).unwrap();
        let mut source = vec![
            Polygon::new(1, vec![rect(0.0, 0.0, 1.0, 1.0)], 3),
            Polygon::new(1, vec![rect(2.0, 2.0, 3.0, 3.0)], 4),
        ];
        let mut writer = MemoryIndexWriter::new();

        let err = pipeline
            .run(&mut source, &NoMask, &mut writer, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
        assert!(writer.is_empty());
    }

    #[test]
    fn test_source_values_filter() {
        let config = IndexConfig::default().with_source_values(Some(ValueRange::new(10, 17)));
        let pipeline = IndexPipeline::new(&config).unwrap();
        let polygons = vec![
            Polygon::new(1, vec![rect(0.0, 0.0, 0.5, 0.5)], 11),
            Polygon::new(2, vec![rect(2.0, 2.0, 2.5, 2.5)], 70),
        ];

        let resolved = pipeline
            .resolve_polygons(polygons, &DomainFilter::PassThrough, &CancelToken::new())
            .unwrap();

        assert_eq!(resolved.summary.polygons_read, 2);
        assert_eq!(resolved.summary.polygons_filtered, 1);
        assert_eq!(resolved.polygons.len(), 1);
        assert!(resolved.cells.iter().all(|c| c.origin_polygon_id == 1));
    }

    #[test]
    fn test_dedicated_worker_pool() {
        let config = IndexConfig::default().with_worker_threads(Some(2));
        let pipeline = IndexPipeline::new(&config).unwrap();
        let polygons = vec![Polygon::new(1, vec![rect(0.0, 0.0, 0.5, 0.5)], 11)];

        let resolved = pipeline
            .resolve_polygons(polygons, &DomainFilter::PassThrough, &CancelToken::new())
            .unwrap();
        assert!(!resolved.cells.is_empty());
    }
}
