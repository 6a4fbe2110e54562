//! Constant-velocity Kalman filter over bounding box geometry.
//!
//! The 8-dimensional state is `(cx, cy, a, h, vx, vy, va, vh)`: box center,
//! aspect ratio, height and their velocities. Measurements are XYAH boxes.
//! Covariance factorisations go through nalgebra's Cholesky decomposition.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

use crate::error::{Result, TrackerError};

/// 0.95 quantile of the chi-square distribution; entry `i` holds `i + 1`
/// degrees of freedom. Used as Mahalanobis gating threshold.
pub const CHI2INV95: [f64; 9] = [
    3.8415, 5.9915, 7.8147, 9.4877, 11.070, 12.592, 14.067, 15.507, 16.919,
];

const NDIM: usize = 4;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = Array2::eye(2 * NDIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, 2 * NDIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Create a track state from an unassociated XYAH measurement.
    /// Velocities start at zero.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(2 * NDIM);
        for i in 0..NDIM {
            mean[i] = measurement[i];
        }

        let h = measurement[3];
        let std = [
            2.0 * self.std_weight_position * h,
            2.0 * self.std_weight_position * h,
            1e-2,
            2.0 * self.std_weight_position * h,
            10.0 * self.std_weight_velocity * h,
            10.0 * self.std_weight_velocity * h,
            1e-5,
            10.0 * self.std_weight_velocity * h,
        ];

        (mean, diag_squared(&std))
    }

    /// Advance the state one time step.
    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = mean[3];
        let std = [
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-2,
            self.std_weight_position * h,
            self.std_weight_velocity * h,
            self.std_weight_velocity * h,
            1e-5,
            self.std_weight_velocity * h,
        ];
        let motion_cov = diag_squared(&std);

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, new_covariance)
    }

    /// Project the state distribution into measurement space.
    pub fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = mean[3];
        let std = [
            self.std_weight_position * h,
            self.std_weight_position * h,
            1e-1,
            self.std_weight_position * h,
        ];
        let innovation_cov = diag_squared(&std);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state with an associated XYAH measurement.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let chol = to_dmatrix(&projected_cov, NDIM)
            .cholesky()
            .ok_or(TrackerError::SingularCovariance)?;

        // K = P H^T S^-1, solved as S K^T = H P^T since S is symmetric.
        let pht = covariance.dot(&self.update_mat.t());
        let pht_t = DMatrix::from_fn(NDIM, 2 * NDIM, |i, j| pht[[j, i]]);
        let gain_t = chol.solve(&pht_t);
        let kalman_gain = Array2::from_shape_fn((2 * NDIM, NDIM), |(i, j)| gain_t[(j, i)]);

        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        let new_mean = mean + kalman_gain.dot(&innovation);
        let new_covariance = covariance - kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        Ok((new_mean, new_covariance))
    }

    /// Squared Mahalanobis distance between the state distribution and each
    /// XYAH measurement.
    ///
    /// With `only_position` the distance uses the box center only; compare
    /// against `CHI2INV95[1]` then, `CHI2INV95[3]` otherwise.
    pub fn gating_distance(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurements: &[[f64; 4]],
        only_position: bool,
    ) -> Result<Vec<f64>> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let dims = if only_position { 2 } else { NDIM };

        let chol = to_dmatrix(&projected_cov, dims)
            .cholesky()
            .ok_or(TrackerError::SingularCovariance)?;

        Ok(measurements
            .iter()
            .map(|measurement| {
                let d = DVector::from_fn(dims, |i, _| measurement[i] - projected_mean[i]);
                d.dot(&chol.solve(&d))
            })
            .collect())
    }
}

fn diag_squared(std: &[f64]) -> Array2<f64> {
    Array2::from_diag(&Array1::from_iter(std.iter().map(|s| s * s)))
}

/// Copy the leading `dims x dims` block into a nalgebra matrix.
fn to_dmatrix(m: &Array2<f64>, dims: usize) -> DMatrix<f64> {
    DMatrix::from_fn(dims, dims, |i, j| m[[i, j]])
}
