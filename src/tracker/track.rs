//! Single target track with state space `(x, y, a, h)` and velocities.

use log::warn;
use ndarray::{Array1, Array2};

use crate::tracker::detection::Detection;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// One tracked identity.
///
/// Counters follow the lifecycle rules: `hits` counts measurement updates
/// (creation included), `age` counts frames since creation and
/// `time_since_update` counts frames since the last match.
#[derive(Debug, Clone)]
pub struct Track {
    /// Unique track identifier, never reused within a tracker
    pub track_id: u64,
    /// Current track state
    pub state: TrackState,
    /// Kalman filter state mean (8-dim)
    pub mean: Array1<f64>,
    /// Kalman filter state covariance (8x8)
    pub covariance: Array2<f64>,
    /// Total number of measurement updates
    pub hits: u32,
    /// Total number of frames since first occurrence
    pub age: u32,
    /// Number of frames since the last measurement update
    pub time_since_update: u32,
    /// Consecutive hits needed for confirmation
    pub n_init: u32,
    /// Misses tolerated once confirmed
    pub max_age: u32,
    /// Detection of the latest association
    pub detection: Detection,
    /// Appearance history; the creation feature is kept pending until
    /// confirmation, later features are appended only while confirmed
    pub features: Vec<Array1<f32>>,
    /// Sub-region appearance history, parallel to `features`
    pub sub_features: Vec<Option<Array1<f32>>>,
}

impl Track {
    pub fn new(
        mean: Array1<f64>,
        covariance: Array2<f64>,
        track_id: u64,
        n_init: u32,
        max_age: u32,
        detection: Detection,
    ) -> Self {
        let features = vec![detection.feature.clone()];
        let sub_features = vec![detection.sub_feature.as_ref().map(|s| s.feature.clone())];
        Self {
            track_id,
            state: TrackState::Tentative,
            mean,
            covariance,
            hits: 1,
            age: 1,
            time_since_update: 0,
            n_init,
            max_age,
            detection,
            features,
            sub_features,
        }
    }

    /// Current box estimate from the filter mean.
    pub fn bbox(&self) -> Rect {
        Rect::from_xyah(
            self.mean[0] as f32,
            self.mean[1] as f32,
            self.mean[2] as f32,
            self.mean[3] as f32,
        )
    }

    /// Propagate the state distribution one time step forward.
    pub fn predict(&mut self, kalman_filter: &KalmanFilter) {
        let (mean, covariance) = kalman_filter.predict(&self.mean, &self.covariance);
        self.mean = mean;
        self.covariance = covariance;
        self.age += 1;
        self.time_since_update += 1;
    }

    /// Correct the state with an associated detection and advance the
    /// lifecycle.
    pub fn update(&mut self, kalman_filter: &KalmanFilter, detection: &Detection) {
        match kalman_filter.update(&self.mean, &self.covariance, detection.bbox.to_measurement()) {
            Ok((mean, covariance)) => {
                self.mean = mean;
                self.covariance = covariance;
            }
            Err(err) => warn!("track {}: keeping predicted state: {err}", self.track_id),
        }

        self.hits += 1;
        self.time_since_update = 0;
        if self.state == TrackState::Tentative && self.hits >= self.n_init {
            self.state = TrackState::Confirmed;
        }

        if self.state == TrackState::Confirmed {
            self.features.push(detection.feature.clone());
            self.sub_features
                .push(detection.sub_feature.as_ref().map(|s| s.feature.clone()));
        }
        self.detection = detection.clone();
    }

    /// Mark this track as missed (no association at the current time step).
    pub fn mark_missed(&mut self) {
        if self.state == TrackState::Tentative || self.time_since_update > self.max_age {
            self.state = TrackState::Deleted;
        }
    }

    pub fn is_tentative(&self) -> bool {
        self.state == TrackState::Tentative
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub fn is_deleted(&self) -> bool {
        self.state == TrackState::Deleted
    }
}
