//! Domain masks
//!
//! A [`DomainMask`] is a set of cells (typically ocean cells) that output can
//! be restricted to. Whether a mask exists is discovered once per run through
//! a [`MaskProvider`] probe; [`DomainFilter`] then holds one of two fixed
//! paths for the rest of the run:
//!
//! - `Masked`: keep only cells in the mask
//! - `PassThrough`: keep everything
//!
//! Masks are stored as single-column text tables: an `H3_Index` header line
//! followed by one hexadecimal cell index per line.

use crate::enumerator::CellEnumerator;
use crate::error::{IndexError, Result};
use crate::hex_cell::HexCell;
use crate::polygon::{Polygon, PolygonId};
use h3o::{CellIndex, Resolution};
use rayon::prelude::*;
use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Header line of a mask file.
pub const MASK_HEADER: &str = "H3_Index";

/// Immutable set of cells at a single resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainMask {
    cells: HashSet<CellIndex>,
    resolution: Option<Resolution>,
}

impl DomainMask {
    /// Build a mask from cells, which must all share one resolution
    pub fn from_cells<I: IntoIterator<Item = CellIndex>>(cells: I) -> Result<Self> {
        let cells: HashSet<CellIndex> = cells.into_iter().collect();

        let mut resolution = None;
        for cell in &cells {
            match resolution {
                None => resolution = Some(cell.resolution()),
                Some(res) if res != cell.resolution() => {
                    return Err(IndexError::Mask(format!(
                        "mixed resolutions {} and {}",
                        u8::from(res),
                        u8::from(cell.resolution())
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(Self { cells, resolution })
    }

    pub fn contains(&self, cell: CellIndex) -> bool {
        self.cells.contains(&cell)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Resolution of the mask cells; `None` for an empty mask
    pub fn resolution(&self) -> Option<Resolution> {
        self.resolution
    }

    /// Cells in ascending index order
    pub fn sorted_cells(&self) -> Vec<CellIndex> {
        let mut cells: Vec<CellIndex> = self.cells.iter().copied().collect();
        cells.sort_unstable_by_key(|c| u64::from(*c));
        cells
    }

    /// Parse a mask table
    ///
    /// The header line is optional; blank lines are ignored.
    pub fn read_from<R: BufRead>(reader: R) -> Result<Self> {
        let mut cells = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let field = line.trim();
            if field.is_empty() || (line_no == 0 && field.eq_ignore_ascii_case(MASK_HEADER)) {
                continue;
            }

            let cell = u64::from_str_radix(field, 16)
                .ok()
                .and_then(|raw| CellIndex::try_from(raw).ok())
                .ok_or_else(|| {
                    IndexError::Mask(format!(
                        "line {}: '{}' is not a cell index",
                        line_no + 1,
                        field
                    ))
                })?;
            cells.push(cell);
        }

        Self::from_cells(cells)
    }

    /// Write the mask table, cells in ascending order
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "{}", MASK_HEADER)?;
        for cell in self.sorted_cells() {
            writeln!(writer, "{}", cell)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        self.write_to(file)?;
        tracing::info!(
            path = %path.as_ref().display(),
            cells = self.len(),
            "Wrote domain mask"
        );
        Ok(())
    }
}

/// Capability probe for an optional domain mask
pub trait MaskProvider {
    /// `Ok(None)` when no mask is available. Errors are reserved for a mask
    /// that exists but cannot be used.
    fn probe(&self) -> Result<Option<Arc<DomainMask>>>;
}

/// Provider for runs without a reference domain
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMask;

impl MaskProvider for NoMask {
    fn probe(&self) -> Result<Option<Arc<DomainMask>>> {
        Ok(None)
    }
}

impl MaskProvider for Arc<DomainMask> {
    fn probe(&self) -> Result<Option<Arc<DomainMask>>> {
        Ok(Some(Arc::clone(self)))
    }
}

/// Mask stored in a file that may not exist yet
#[derive(Debug, Clone)]
pub struct MaskFile {
    path: PathBuf,
}

impl MaskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MaskProvider for MaskFile {
    fn probe(&self) -> Result<Option<Arc<DomainMask>>> {
        if !self.path.is_file() {
            tracing::debug!(path = %self.path.display(), "Mask file not present");
            return Ok(None);
        }
        DomainMask::load(&self.path).map(|mask| Some(Arc::new(mask)))
    }
}

/// Domain filtering path chosen once at run start
#[derive(Debug, Clone)]
pub enum DomainFilter {
    Masked(Arc<DomainMask>),
    PassThrough,
}

impl DomainFilter {
    /// Probe the provider and pick the filtering path
    ///
    /// A non-empty mask at a different resolution than the run is fatal.
    pub fn detect(provider: &dyn MaskProvider, resolution: Resolution) -> Result<Self> {
        match provider.probe()? {
            Some(mask) => {
                if let Some(found) = mask.resolution() {
                    if found != resolution {
                        return Err(IndexError::ResolutionMismatch {
                            expected: u8::from(resolution),
                            found: u8::from(found),
                            origin: "domain mask".to_string(),
                        });
                    }
                }
                if mask.is_empty() {
                    tracing::warn!("Domain mask is empty; every cell will be filtered out");
                } else {
                    tracing::info!(cells = mask.len(), "Domain mask available, filtering output");
                }
                Ok(DomainFilter::Masked(mask))
            }
            None => {
                tracing::warn!("Domain mask unavailable, output will not be filtered");
                Ok(DomainFilter::PassThrough)
            }
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, DomainFilter::Masked(_))
    }

    /// Restrict cells to the mask; returns the kept cells and how many were
    /// removed
    pub fn apply(&self, cells: Vec<HexCell>) -> (Vec<HexCell>, usize) {
        match self {
            DomainFilter::Masked(mask) => {
                let before = cells.len();
                let kept: Vec<HexCell> = cells
                    .into_iter()
                    .filter(|cell| mask.contains(cell.index))
                    .collect();
                let removed = before - kept.len();
                (kept, removed)
            }
            DomainFilter::PassThrough => (cells, 0),
        }
    }
}

/// Result of building a mask from boundary polygons
#[derive(Debug, Clone)]
pub struct MaskBuild {
    pub mask: DomainMask,

    /// Polygons skipped as malformed, with the reason.
    pub skipped: Vec<(PolygonId, String)>,
}

/// Build a mask covering the union of the given polygons
///
/// Used to derive an ocean mask from water polygons. Polygons are enumerated
/// in parallel, each worker collecting into its own set; the sets are merged
/// at the end. Malformed polygons are skipped and reported.
pub fn build_mask(polygons: &[Polygon], enumerator: &CellEnumerator) -> MaskBuild {
    let (cells, mut skipped): (HashSet<CellIndex>, Vec<(PolygonId, String)>) = polygons
        .par_iter()
        .fold(
            || (HashSet::new(), Vec::new()),
            |(mut cells, mut skipped), polygon| {
                match enumerator.cells(polygon) {
                    Ok(found) => cells.extend(found),
                    Err(e) => {
                        tracing::warn!(polygon_id = polygon.id(), error = %e, "Skipping polygon");
                        skipped.push((polygon.id(), e.to_string()));
                    }
                }
                (cells, skipped)
            },
        )
        .reduce(
            || (HashSet::new(), Vec::new()),
            |(mut cells, mut skipped), (other_cells, other_skipped)| {
                cells.extend(other_cells);
                skipped.extend(other_skipped);
                (cells, skipped)
            },
        );

    skipped.sort_by_key(|(id, _)| *id);

    let resolution = enumerator.resolution();
    tracing::info!(
        polygons = polygons.len(),
        skipped = skipped.len(),
        cells = cells.len(),
        resolution = u8::from(resolution),
        "Built domain mask"
    );

    MaskBuild {
        mask: DomainMask {
            cells,
            resolution: Some(resolution),
        },
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use h3o::LatLng;

    fn cell_at(lat: f64, lng: f64, res: Resolution) -> CellIndex {
        LatLng::new(lat, lng).unwrap().to_cell(res)
    }

    #[test]
    fn test_from_cells_rejects_mixed_resolutions() {
        let cells = [
            cell_at(0.0, 0.0, Resolution::Five),
            cell_at(0.0, 0.0, Resolution::Six),
        ];
        assert!(matches!(
            DomainMask::from_cells(cells),
            Err(IndexError::Mask(_))
        ));
    }

    #[test]
    fn test_read_write_roundtrip() {
        let mask = DomainMask::from_cells([
            cell_at(0.0, 0.0, Resolution::Five),
            cell_at(1.0, 1.0, Resolution::Five),
        ])
        .unwrap();

        let mut buffer = Vec::new();
        mask.write_to(&mut buffer).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("H3_Index\n"));

        let parsed = DomainMask::read_from(buffer.as_slice()).unwrap();
        assert_eq!(parsed, mask);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let text = "H3_Index\nnot-a-cell\n";
        assert!(matches!(
            DomainMask::read_from(text.as_bytes()),
            Err(IndexError::Mask(_))
        ));
    }

    #[test]
    fn test_detect_without_mask_passes_through() {
        let filter = DomainFilter::detect(&NoMask, Resolution::Five).unwrap();
        assert!(!filter.is_masked());
    }

    #[test]
    fn test_detect_resolution_mismatch() {
        let mask = Arc::new(
            DomainMask::from_cells([cell_at(0.0, 0.0, Resolution::Six)]).unwrap(),
        );
        match DomainFilter::detect(&mask, Resolution::Five) {
            Err(IndexError::ResolutionMismatch { expected, found, .. }) => {
                assert_eq!(expected, 5);
                assert_eq!(found, 6);
            }
            other => panic!("Expected ResolutionMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_apply() {
        let a = cell_at(0.0, 0.0, Resolution::Five);
        let b = cell_at(1.0, 1.0, Resolution::Five);
        let c = cell_at(2.0, 2.0, Resolution::Five);
        let rows = vec![HexCell::new(a, 1, 1), HexCell::new(b, 1, 1), HexCell::new(c, 1, 1)];

        let mask = Arc::new(DomainMask::from_cells([a, b]).unwrap());
        let (kept, removed) = DomainFilter::Masked(mask).apply(rows.clone());
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 1);

        let (kept, removed) = DomainFilter::PassThrough.apply(rows);
        assert_eq!(kept.len(), 3);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_missing_mask_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MaskFile::new(dir.path().join("h3_oceans.csv"));
        assert!(provider.probe().unwrap().is_none());
    }
}
