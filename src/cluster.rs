//! Boundary-distance clustering of extracted scalar fields.
//!
//! Interior pixels are turned into feature vectors combining their distance
//! to the nearest masked boundary with their CPD trace (or any other scalar
//! field), then partitioned with k-means. The resulting labels are mapped
//! back onto grid coordinates so segments can be overlaid on the scan
//! image and re-averaged per cluster.

use crate::config::ScanParams;
use crate::error::{AnalysisError, Result};
use crate::mask::Mask;
use linfa::traits::{Fit, Predict};
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{Array1, Array2, Axis};
use rand_xoshiro::rand_core::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

/// Clustering engine binding a per-pixel data matrix, its averaged field
/// and a boundary mask to one scan geometry.
///
/// `data` holds one row per pixel in row-major grid order (full CPD trace
/// or any per-pixel vector); `data_avg` is the per-pixel scalar summary on
/// the grid. All shape compatibility is checked eagerly at construction so
/// the expensive distance sweep never trips over an index error.
pub struct ClusterEngine {
    params: ScanParams,
    data: Array2<f32>,
    data_avg: Array2<f32>,
    mask: Mask,
}

/// Per-interior-pixel products of the distance analysis.
#[derive(Clone, Debug)]
pub struct ClusterAnalysis {
    /// Grid indices `(row, col)` of every interior pixel, row-major.
    pub interior_idx: Vec<(usize, usize)>,
    /// Physical positions in meters, shape (n, 2) as `[row_m, col_m]`.
    pub interior_pos: Array2<f32>,
    /// Full per-pixel traces restricted to interior pixels, shape (n, t).
    pub interior_traces: Array2<f32>,
    /// Averaged scalar per interior pixel.
    pub interior_avg: Array1<f32>,
    /// Distance to the nearest boundary pixel, in meters.
    pub min_dist: Array1<f32>,
    /// Mean distance over all boundary pixels, in meters.
    pub mean_dist: Array1<f32>,
    /// Feature table `[min_dist, trace...]`, shape (n, 1 + t).
    pub features: Array2<f32>,
    /// Reduced feature table `[min_dist, avg]`, shape (n, 2).
    pub avg_features: Array2<f32>,
}

/// K-means assignment over a feature table.
#[derive(Clone, Debug)]
pub struct ClusterLabels {
    pub k: usize,
    /// Cluster label per interior pixel, aligned with the analysis arrays.
    pub labels: Array1<usize>,
    /// Cluster centroids in feature space, shape (k, features).
    pub centroids: Array2<f32>,
    /// Sum of squared distances of samples to their closest centroid.
    pub inertia: f32,
}

/// Per-cluster partitions of the analysis arrays, for display and
/// re-analysis.
#[derive(Clone, Debug)]
pub struct ClusterSegments {
    /// Physical positions per cluster, each shape (n_i, 2).
    pub positions: Vec<Array2<f32>>,
    /// Grid indices per cluster.
    pub indices: Vec<Vec<(usize, usize)>>,
    /// Trace rows per cluster, each shape (n_i, t).
    pub traces: Vec<Array2<f32>>,
    /// Averaged scalar values per cluster.
    pub averages: Vec<Array1<f32>>,
    /// Mean trace per cluster (NaN-filled for an empty cluster).
    pub time_avg: Vec<Array1<f32>>,
}

impl ClusterEngine {
    /// Binds data, averaged field and mask to the scan geometry.
    ///
    /// # Arguments
    /// - `params`: validated scan parameters.
    /// - `data`: per-pixel vectors, shape (num_rows * num_cols, t).
    /// - `data_avg`: per-pixel scalar field, shape (num_rows, num_cols).
    /// - `mask`: boundary mask; `None` means no boundary pixels at all.
    ///
    /// # Errors
    /// [`AnalysisError::ShapeMismatch`] when any input disagrees with the
    /// grid declared by `params`.
    pub fn new(
        params: &ScanParams,
        data: Array2<f32>,
        data_avg: Array2<f32>,
        mask: Option<Mask>,
    ) -> Result<Self> {
        let grid = (params.num_rows, params.num_cols);
        let pixels = params.num_rows * params.num_cols;

        if data.nrows() != pixels {
            return Err(AnalysisError::ShapeMismatch {
                name: "data",
                expected: (pixels, data.ncols()),
                actual: data.dim(),
            });
        }
        if data_avg.dim() != grid {
            return Err(AnalysisError::ShapeMismatch {
                name: "data_avg",
                expected: grid,
                actual: data_avg.dim(),
            });
        }
        let mask = mask.unwrap_or_else(|| Mask::all_interior(grid.0, grid.1));
        if mask.dim() != grid {
            return Err(AnalysisError::ShapeMismatch {
                name: "mask",
                expected: grid,
                actual: mask.dim(),
            });
        }

        Ok(ClusterEngine {
            params: params.clone(),
            data,
            data_avg,
            mask,
        })
    }

    /// Extracts interior pixels, computes their boundary distances and
    /// assembles the clustering feature tables.
    ///
    /// The pairwise distance sweep is quadratic in the point-cloud sizes
    /// and runs in parallel over interior pixels; min/mean per pixel do not
    /// depend on evaluation order, so the result is deterministic.
    pub fn analyze(&self) -> ClusterAnalysis {
        let row_pitch = self.params.row_pitch() as f32;
        let col_pitch = self.params.col_pitch() as f32;

        let interior_idx = self.mask.interior_coords();
        let boundary_idx = self.mask.boundary_coords();
        let n = interior_idx.len();
        let t = self.data.ncols();

        let scale = |&(r, c): &(usize, usize)| [r as f32 * row_pitch, c as f32 * col_pitch];
        let interior_scaled: Vec<[f32; 2]> = interior_idx.iter().map(scale).collect();
        let boundary_scaled: Vec<[f32; 2]> = boundary_idx.iter().map(scale).collect();

        let mut interior_pos = Array2::<f32>::zeros((n, 2));
        let mut interior_traces = Array2::<f32>::zeros((n, t));
        let mut interior_avg = Array1::<f32>::zeros(n);
        for (i, &(r, c)) in interior_idx.iter().enumerate() {
            interior_pos[[i, 0]] = interior_scaled[i][0];
            interior_pos[[i, 1]] = interior_scaled[i][1];
            interior_traces
                .row_mut(i)
                .assign(&self.data.row(r * self.params.num_cols + c));
            interior_avg[i] = self.data_avg[[r, c]];
        }

        let (min_dist, mean_dist) = if boundary_scaled.is_empty() {
            log::warn!(
                "mask has no boundary pixels; distances default to 0 and clustering \
                 degenerates to the value features alone"
            );
            (Array1::zeros(n), Array1::zeros(n))
        } else {
            let pairs: Vec<(f32, f32)> = interior_scaled
                .par_iter()
                .map(|p| {
                    let mut min = f32::INFINITY;
                    let mut sum = 0.0f64;
                    for b in &boundary_scaled {
                        let dr = p[0] - b[0];
                        let dc = p[1] - b[1];
                        let d = (dr * dr + dc * dc).sqrt();
                        min = min.min(d);
                        sum += d as f64;
                    }
                    (min, (sum / boundary_scaled.len() as f64) as f32)
                })
                .collect();
            (
                Array1::from_iter(pairs.iter().map(|p| p.0)),
                Array1::from_iter(pairs.iter().map(|p| p.1)),
            )
        };

        let mut features = Array2::<f32>::zeros((n, 1 + t));
        let mut avg_features = Array2::<f32>::zeros((n, 2));
        for i in 0..n {
            features[[i, 0]] = min_dist[i];
            features
                .row_mut(i)
                .slice_mut(ndarray::s![1..])
                .assign(&interior_traces.row(i));
            avg_features[[i, 0]] = min_dist[i];
            avg_features[[i, 1]] = interior_avg[i];
        }

        ClusterAnalysis {
            interior_idx,
            interior_pos,
            interior_traces,
            interior_avg,
            min_dist,
            mean_dist,
            features,
            avg_features,
        }
    }
}

impl ClusterAnalysis {
    /// K-means over the full `[distance, trace...]` feature table.
    ///
    /// Seeded, so a fixed `seed` reproduces the same assignment on the
    /// same input. The underlying algorithm converges to a local optimum;
    /// callers needing robustness should compare several seeds and keep
    /// the lowest-inertia result.
    pub fn kmeans(&self, k: usize, seed: u64) -> Result<ClusterLabels> {
        run_kmeans(&self.features, k, seed)
    }

    /// K-means over the reduced `[distance, averaged value]` pairs.
    pub fn kmeans_avg(&self, k: usize, seed: u64) -> Result<ClusterLabels> {
        run_kmeans(&self.avg_features, k, seed)
    }

    /// Inertia for a range of cluster counts, for elbow-style selection of
    /// `k`.
    pub fn elbow_scores(
        &self,
        ks: impl IntoIterator<Item = usize>,
        seed: u64,
    ) -> Result<Vec<(usize, f32)>> {
        ks.into_iter()
            .map(|k| self.kmeans(k, seed).map(|labels| (k, labels.inertia)))
            .collect()
    }

    /// Partitions every per-pixel array by cluster label and averages each
    /// cluster's traces over time.
    pub fn segment_maps(&self, labels: &ClusterLabels) -> ClusterSegments {
        let t = self.interior_traces.ncols();
        let mut segments = ClusterSegments {
            positions: Vec::with_capacity(labels.k),
            indices: Vec::with_capacity(labels.k),
            traces: Vec::with_capacity(labels.k),
            averages: Vec::with_capacity(labels.k),
            time_avg: Vec::with_capacity(labels.k),
        };

        for cluster in 0..labels.k {
            let members: Vec<usize> = labels
                .labels
                .iter()
                .enumerate()
                .filter(|(_, &label)| label == cluster)
                .map(|(i, _)| i)
                .collect();

            let mut positions = Array2::<f32>::zeros((members.len(), 2));
            let mut traces = Array2::<f32>::zeros((members.len(), t));
            let mut averages = Array1::<f32>::zeros(members.len());
            let mut indices = Vec::with_capacity(members.len());
            for (row, &i) in members.iter().enumerate() {
                positions.row_mut(row).assign(&self.interior_pos.row(i));
                traces.row_mut(row).assign(&self.interior_traces.row(i));
                averages[row] = self.interior_avg[i];
                indices.push(self.interior_idx[i]);
            }

            let time_avg = traces
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::from_elem(t, f32::NAN));

            segments.positions.push(positions);
            segments.indices.push(indices);
            segments.traces.push(traces);
            segments.averages.push(averages);
            segments.time_avg.push(time_avg);
        }

        segments
    }
}

fn run_kmeans(records: &Array2<f32>, k: usize, seed: u64) -> Result<ClusterLabels> {
    let rng = Xoshiro256Plus::seed_from_u64(seed);
    let dataset = DatasetBase::from(records.clone());

    let model = KMeans::params_with_rng(k, rng)
        .max_n_iterations(300)
        .fit(&dataset)
        .map_err(|e| AnalysisError::Clustering(e.to_string()))?;

    let labels = model.predict(&dataset);

    Ok(ClusterLabels {
        k,
        labels,
        centroids: model.centroids().clone(),
        inertia: model.inertia(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn grid_params() -> ScanParams {
        ScanParams {
            sampling_rate: 1.0e6,
            drive_freq: 10.0e3,
            total_time: 1.0e-3,
            num_rows: 4,
            num_cols: 4,
            fast_scan_size: 4.0e-6,
            slow_scan_size: 8.0e-6,
        }
    }

    /// Scalar field from the 4x4 reference scenario, as both a (16, 1)
    /// trace matrix and the (4, 4) averaged field.
    fn grid_field() -> (Array2<f32>, Array2<f32>) {
        let avg = array![
            [1.0f32, 2.0, 3.0, 4.0],
            [2.0, 3.0, 4.0, 5.0],
            [3.0, 4.0, 5.0, 6.0],
            [4.0, 5.0, 6.0, 7.0],
        ];
        let traces = avg
            .iter()
            .cloned()
            .collect::<Array1<f32>>()
            .into_shape_with_order((16, 1))
            .unwrap();
        (traces, avg)
    }

    fn corner_mask() -> Mask {
        let mut grid = Array2::<f32>::ones((4, 4));
        grid[[0, 0]] = 0.0;
        Mask::from_array(grid)
    }

    #[test]
    fn test_shape_mismatch_is_rejected_eagerly() {
        let params = grid_params();

        let (traces, _) = grid_field();
        let bad_avg = Array2::<f32>::zeros((3, 4));
        assert!(matches!(
            ClusterEngine::new(&params, traces, bad_avg, None),
            Err(AnalysisError::ShapeMismatch { name: "data_avg", .. })
        ));

        let (_, avg) = grid_field();
        let bad_traces = Array2::<f32>::zeros((15, 1));
        assert!(matches!(
            ClusterEngine::new(&params, bad_traces, avg, None),
            Err(AnalysisError::ShapeMismatch { name: "data", .. })
        ));
    }

    #[test]
    fn test_single_boundary_distance_matches_scaled_euclidean() {
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, Some(corner_mask())).unwrap();
        let analysis = engine.analyze();

        assert_eq!(analysis.interior_idx.len(), 15);

        // Pixel (3, 3) is the last interior pixel in row-major order.
        let last = analysis.interior_idx.len() - 1;
        assert_eq!(analysis.interior_idx[last], (3, 3));

        let row_pitch = (params.slow_scan_size / 4.0) as f32;
        let col_pitch = (params.fast_scan_size / 4.0) as f32;
        let expected = ((3.0 * row_pitch).powi(2) + (3.0 * col_pitch).powi(2)).sqrt();

        assert_abs_diff_eq!(analysis.min_dist[last], expected, epsilon = 1e-12);
        // A single boundary pixel makes the min and mean coincide.
        assert_abs_diff_eq!(analysis.mean_dist[last], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_feature_table_prepends_distance() {
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, Some(corner_mask())).unwrap();
        let analysis = engine.analyze();

        assert_eq!(analysis.features.dim(), (15, 2));
        for i in 0..15 {
            assert_abs_diff_eq!(
                analysis.features[[i, 0]],
                analysis.min_dist[i],
                epsilon = 0.0
            );
            assert_abs_diff_eq!(
                analysis.features[[i, 1]],
                analysis.interior_avg[i],
                epsilon = 0.0
            );
        }
    }

    #[test]
    fn test_empty_boundary_defaults_distances_to_zero() {
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, None).unwrap();
        let analysis = engine.analyze();

        assert_eq!(analysis.interior_idx.len(), 16);
        assert!(analysis.min_dist.iter().all(|&d| d == 0.0));
        assert!(analysis.mean_dist.iter().all(|&d| d == 0.0));
    }

    #[test]
    fn test_kmeans_is_deterministic_for_fixed_seed() {
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, Some(corner_mask())).unwrap();
        let analysis = engine.analyze();

        let first = analysis.kmeans(3, 42).unwrap();
        let second = analysis.kmeans(3, 42).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_abs_diff_eq!(first.inertia, second.inertia, epsilon = 0.0);
    }

    #[test]
    fn test_segment_maps_partition_every_interior_pixel() {
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, Some(corner_mask())).unwrap();
        let analysis = engine.analyze();

        let labels = analysis.kmeans(3, 7).unwrap();
        let segments = analysis.segment_maps(&labels);

        let total: usize = segments.indices.iter().map(|idx| idx.len()).sum();
        assert_eq!(total, 15);
        assert_eq!(segments.time_avg.len(), 3);
        for (traces, time_avg) in segments.traces.iter().zip(segments.time_avg.iter()) {
            if traces.nrows() > 0 {
                let mean = traces.column(0).mean().unwrap();
                assert_abs_diff_eq!(time_avg[0], mean, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_end_to_end_corner_scenario() {
        // Full pipeline on the 4x4 reference scenario: distances, k-means
        // and segmentation chained together.
        let params = grid_params();
        let (traces, avg) = grid_field();
        let engine = ClusterEngine::new(&params, traces, avg, Some(corner_mask())).unwrap();
        let analysis = engine.analyze();

        let labels = analysis.kmeans_avg(2, 3).unwrap();
        assert_eq!(labels.labels.len(), 15);
        assert!(labels.labels.iter().all(|&l| l < 2));

        let segments = analysis.segment_maps(&labels);
        assert_eq!(segments.positions.len(), 2);
        let total: usize = segments.averages.iter().map(|a| a.len()).sum();
        assert_eq!(total, 15);
    }
}
