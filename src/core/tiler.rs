//! Geometry tiler
//!
//! Splits a region into a covering grid aligned to the region's projection
//! (multiples of the cell size from the origin) and clips every cell to the
//! region boundary. The grid exists so that each backend reduction stays under
//! the per-call pixel budget; cell size is configuration, not a constant.

use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect, Simplify};
use log::debug;

use crate::core::error::{Error, Result};
use crate::core::region::Region;

/// One clipped tile of the covering grid
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Row-major index over the full covering grid
    pub id: usize,
    /// Unclipped cell rectangle
    pub bounds: Rect<f64>,
    /// Cell rectangle intersected with the region
    pub geometry: MultiPolygon<f64>,
}

/// Covering-grid tiler with a fixed clip tolerance
#[derive(Debug, Clone, Copy)]
pub struct GridTiler {
    cell_size: f64,
    clip_tolerance: f64,
    max_cells: usize,
}

impl GridTiler {
    pub fn new(cell_size: f64, clip_tolerance: f64, max_cells: usize) -> Result<Self> {
        if !(cell_size > 0.0) || !cell_size.is_finite() {
            return Err(Error::InvalidInput(format!(
                "cell size must be positive, got {cell_size}"
            )));
        }
        Ok(Self {
            cell_size,
            clip_tolerance: clip_tolerance.max(0.0),
            max_cells,
        })
    }

    /// Row/column span of the grid covering `bounds`
    fn grid_span(&self, bounds: &Rect<f64>) -> (i64, i64, i64, i64) {
        let col_min = (bounds.min().x / self.cell_size).floor() as i64;
        let row_min = (bounds.min().y / self.cell_size).floor() as i64;
        // A max edge that lands on a grid line does not open a new cell
        let col_max = ((bounds.max().x / self.cell_size).ceil() as i64).max(col_min + 1);
        let row_max = ((bounds.max().y / self.cell_size).ceil() as i64).max(row_min + 1);
        (col_min, row_min, col_max, row_max)
    }

    /// Produce the clipped cells covering `region`, dropping empty ones
    pub fn tile(&self, region: &Region) -> Result<Vec<GridCell>> {
        let bounds = region.geometry.bounding_rect().ok_or_else(|| {
            Error::InvalidInput(format!("region '{}' has an empty geometry", region.name))
        })?;

        let (col_min, row_min, col_max, row_max) = self.grid_span(&bounds);
        let cols = (col_max - col_min) as usize;
        let rows = (row_max - row_min) as usize;
        let total = cols.saturating_mul(rows);
        if total > self.max_cells {
            return Err(Error::InvalidInput(format!(
                "region '{}' needs {total} grid cells of {}°, more than the limit of {}; use a larger cell size",
                region.name, self.cell_size, self.max_cells
            )));
        }

        // Anything smaller than a tolerance-sized square is clip noise
        let min_area = self.clip_tolerance * self.clip_tolerance;
        let mut cells = Vec::new();

        for row in 0..rows {
            for col in 0..cols {
                let x0 = (col_min + col as i64) as f64 * self.cell_size;
                let y0 = (row_min + row as i64) as f64 * self.cell_size;
                let rect = Rect::new((x0, y0), (x0 + self.cell_size, y0 + self.cell_size));

                if !rects_overlap(&rect, &bounds) {
                    continue;
                }

                let clipped = region.geometry.intersection(&rect.to_polygon());
                let clipped = if self.clip_tolerance > 0.0 {
                    clipped.simplify(&self.clip_tolerance)
                } else {
                    clipped
                };

                if clipped.0.is_empty() || clipped.unsigned_area() <= min_area {
                    continue;
                }

                cells.push(GridCell {
                    id: row * cols + col,
                    bounds: rect,
                    geometry: clipped,
                });
            }
        }

        debug!(
            "Tiled '{}' into {} non-empty cells of a {cols}x{rows} grid",
            region.name,
            cells.len()
        );
        Ok(cells)
    }
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x < b.max().x && b.min().x < a.max().x && a.min().y < b.max().y && b.min().y < a.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use std::collections::BTreeSet;

    fn region(geometry: MultiPolygon<f64>) -> Region {
        Region {
            name: "Testland".to_string(),
            feature_id: "feature-0".to_string(),
            geometry,
        }
    }

    fn total_area(cells: &[GridCell]) -> f64 {
        cells.iter().map(|c| c.geometry.unsigned_area()).sum()
    }

    #[test]
    fn test_aligned_square_gives_one_cell_per_grid_square() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
        let tiler = GridTiler::new(1.0, 1e-9, 100).unwrap();
        let cells = tiler.tile(&region(MultiPolygon(vec![square]))).unwrap();
        assert_eq!(cells.len(), 4);
        assert!((total_area(&cells) - 4.0).abs() < 1e-9);
        for cell in &cells {
            assert!((cell.geometry.unsigned_area() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_union_of_cells_equals_irregular_region() {
        let shape = polygon![
            (x: 0.3, y: 0.2),
            (x: 3.7, y: 0.9),
            (x: 2.9, y: 2.6),
            (x: 1.1, y: 3.4),
            (x: -0.6, y: 1.8),
        ];
        let geometry = MultiPolygon(vec![shape]);
        let expected = geometry.unsigned_area();
        let tiler = GridTiler::new(0.5, 1e-9, 1_000).unwrap();
        let cells = tiler.tile(&region(geometry)).unwrap();

        assert!(cells.len() > 4);
        assert!((total_area(&cells) - expected).abs() < 1e-6);

        let ids: BTreeSet<usize> = cells.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), cells.len(), "cell ids must be unique");
    }

    #[test]
    fn test_cells_outside_region_are_dropped() {
        // L-shape: the upper-right grid square is empty
        let shape = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 0.0),
            (x: 2.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 2.0),
            (x: 0.0, y: 2.0),
        ];
        let tiler = GridTiler::new(1.0, 1e-9, 100).unwrap();
        let cells = tiler.tile(&region(MultiPolygon(vec![shape]))).unwrap();
        assert_eq!(cells.len(), 3);
        assert!(cells.iter().all(|c| c.geometry.unsigned_area() > 0.0));
    }

    #[test]
    fn test_negative_coordinates_align_to_origin() {
        let square = polygon![(x: -1.5, y: -1.5), (x: -0.5, y: -1.5), (x: -0.5, y: -0.5), (x: -1.5, y: -0.5)];
        let tiler = GridTiler::new(1.0, 1e-9, 100).unwrap();
        let cells = tiler.tile(&region(MultiPolygon(vec![square]))).unwrap();
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(|c| c.bounds.min().x.fract() == 0.0));
        assert!((total_area(&cells) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_many_cells_is_rejected() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)];
        let tiler = GridTiler::new(0.1, 1e-9, 100).unwrap();
        assert!(matches!(
            tiler.tile(&region(MultiPolygon(vec![square]))),
            Err(Error::InvalidInput(_))
        ));
        assert!(GridTiler::new(0.0, 0.0, 10).is_err());
    }
}
