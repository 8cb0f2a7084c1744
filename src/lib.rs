//! # geo-hex-index
//!
//! Index classification polygons onto the H3 hexagonal grid.
//!
//! Polygons produced by vectorising a classification raster (each carrying an
//! integer class value) are turned into exactly one row per H3 cell at a
//! configured resolution. Where polygons overlap, a deterministic rule picks
//! the winning value. An optional domain mask restricts the output to cells
//! of a reference domain, for example an ocean mask built from water polygons.
//!
//! ## Pipeline
//!
//! ```text
//! GeometrySource ──► CellEnumerator ──► CandidateStore ──► resolve ──► DomainFilter ──► IndexWriter
//!   (polygons)        (cells whose       (per worker,      (one row    (mask or         (batched,
//!                      centre lies        merged)           per cell)   pass-through)     retried)
//!                      inside)
//! ```
//!
//! ### Overlap resolution
//!
//! | Contributions | Winner |
//! |---------------|--------|
//! | value in the notable band (default 10-17) + any other value | notable |
//! | several values in the same band | lowest polygon id |
//!
//! The rule is applied over the whole candidate set after all polygons are
//! enumerated, so the output is identical regardless of thread count, polygon
//! order or batch size.
//!
//! ## Examples
//!
//! ### Full Run
//!
//! ```rust,ignore
//! use geo_hex_index::{
//!     CancelToken, FeatureCollectionSource, IndexConfig, IndexPipeline, MaskFile,
//!     MemoryIndexWriter,
//! };
//!
//! let config = IndexConfig::from_file("index.json")?;
//! let pipeline = IndexPipeline::new(&config)?;
//!
//! let mut source = FeatureCollectionSource::from_geojson_str(&polygons_geojson)?;
//! let mask = MaskFile::new("ocean_mask_res5.csv");
//! let mut writer = MemoryIndexWriter::new();
//!
//! let summary = pipeline.run(&mut source, &mask, &mut writer, &CancelToken::new())?;
//! println!(
//!     "{} cells written in {} batches, {} polygons skipped",
//!     summary.cells_written, summary.batches_committed, summary.polygons_skipped
//! );
//! ```
//!
//! ### Building a Domain Mask
//!
//! ```rust,ignore
//! use geo_hex_index::{build_mask, CellEnumerator};
//! use h3o::Resolution;
//!
//! let water: Vec<Polygon> = load_water_polygons();
//! let built = build_mask(&water, &CellEnumerator::new(Resolution::Five));
//! built.mask.save("ocean_mask_res5.csv")?;
//! ```
//!
//! ### Enumerating a Single Polygon
//!
//! ```rust,ignore
//! use geo_hex_index::{CellEnumerator, Polygon};
//! use h3o::Resolution;
//!
//! let polygon = Polygon::new(1, vec![exterior_ring], 12);
//! let cells = CellEnumerator::new(Resolution::Five).cells(&polygon)?;
//! ```
//!
//! ## Coordinates
//!
//! Rings use GeoJSON positions, `[longitude, latitude]` in degrees. Rings that
//! cross the antimeridian are unwrapped before testing, so a polygon spanning
//! 179°E to 179°W covers the narrow strip rather than the rest of the globe.
//! Polygons containing a pole are not supported.

pub mod aggregator;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod geometry;
pub mod hex_cell;
pub mod mask;
pub mod pipeline;
pub mod polygon;
pub mod writer;

// Re-export main types
pub use aggregator::{resolve, Candidate, CandidateStore, ConflictPolicy, ReduceStats, ValueBand};
pub use config::{
    IndexConfig, RunParams, ValueRange, DEFAULT_BATCH_SIZE, DEFAULT_MAX_COMMIT_ATTEMPTS,
    DEFAULT_RESOLUTION,
};
pub use enumerator::CellEnumerator;
pub use error::{IndexError, Result, WriteError};
pub use hex_cell::{cell_center, HexCell};
pub use mask::{
    build_mask, DomainFilter, DomainMask, MaskBuild, MaskFile, MaskProvider, NoMask, MASK_HEADER,
};
pub use pipeline::{CancelToken, IndexPipeline, ResolvedIndex, RunSummary, SkippedPolygon};
pub use polygon::{
    FeatureCollectionSource, GeometrySource, Polygon, PolygonId, PolygonRef, PolygonRings,
};
pub use writer::{write_batches, GeoJsonIndexWriter, IndexWriter, MemoryIndexWriter, WriteStats};

#[cfg(test)]
mod tests {
    use super::*;
    use geojson::Position;

    fn square(x: f64, y: f64, size: f64) -> Vec<Position> {
        vec![
            vec![x, y],
            vec![x + size, y],
            vec![x + size, y + size],
            vec![x, y + size],
            vec![x, y],
        ]
    }

    #[test]
    fn test_basic_run() {
        let pipeline = IndexPipeline::new(&IndexConfig::default()).unwrap();
        let mut source = vec![Polygon::new(1, vec![square(0.0, 0.0, 1.0)], 12)];
        let mut writer = MemoryIndexWriter::new();

        let summary = pipeline
            .run(&mut source, &NoMask, &mut writer, &CancelToken::new())
            .unwrap();

        assert!(summary.cells_written > 0);
        assert_eq!(summary.cells_written, writer.len());
        assert!(writer.rows().iter().all(|row| row.value == 12));
    }
}
