//! Boundary/interior decomposition of a pixel mask.
//!
//! Masks arrive as a grid of 1 (transparent, interior pixel kept for
//! analysis) and 0 or NaN (opaque, boundary pixel such as a grain
//! boundary). The decomposition into coordinate lists preserves row-major
//! order so downstream arrays stay index-aligned with the pixel grid.

use ndarray::Array2;

/// A binary pixel mask over the scan grid.
///
/// "on" pixels are boundary pixels excluded from the clustering feature
/// pool, "off" pixels are the interior retained for analysis. Every pixel
/// is exactly one of the two, so
/// `boundary_coords().len() + interior_coords().len() == rows * cols`.
#[derive(Clone, Debug)]
pub struct Mask {
    grid: Array2<f32>,
}

impl Mask {
    /// Wraps a mask grid of 1 (interior) and 0/NaN (boundary) values.
    pub fn from_array(grid: Array2<f32>) -> Self {
        Mask { grid }
    }

    /// Mask with no boundary pixels, used when no mask file is supplied.
    pub fn all_interior(rows: usize, cols: usize) -> Self {
        Mask {
            grid: Array2::ones((rows, cols)),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.grid.dim()
    }

    /// Row-major `(row, col)` list of boundary ("on") pixels.
    pub fn boundary_coords(&self) -> Vec<(usize, usize)> {
        self.coords(false)
    }

    /// Row-major `(row, col)` list of interior ("off") pixels.
    pub fn interior_coords(&self) -> Vec<(usize, usize)> {
        self.coords(true)
    }

    /// Overlay map for plotting: NaN at boundary pixels, 1 elsewhere, so a
    /// rendered image shows through the masked regions.
    pub fn nan_map(&self) -> Array2<f32> {
        self.grid
            .mapv(|v| if v == 1.0 { 1.0 } else { f32::NAN })
    }

    fn coords(&self, interior: bool) -> Vec<(usize, usize)> {
        self.grid
            .indexed_iter()
            .filter(|(_, &v)| (v == 1.0) == interior)
            .map(|((r, c), _)| (r, c))
            .collect()
    }
}
