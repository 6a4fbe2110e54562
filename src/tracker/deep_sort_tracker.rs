//! Main Deep SORT tracker: association cascade and track management.

use log::{debug, trace};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::tracker::detection::Detection;
use crate::tracker::kalman_filter::{CHI2INV95, KalmanFilter};
use crate::tracker::matching::{self, AssignmentResult, AssignmentSolver, LapjvSolver};
use crate::tracker::nn_matching::{
    self, DistanceMetric, MetricConfig, NearestNeighborDistanceMetric,
};
use crate::tracker::track::Track;

/// Configuration for the [`Tracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// IoU matching rejects pairs with `1 - IoU` above this value
    pub max_iou_distance: f32,
    /// Misses tolerated by a confirmed track before deletion
    pub max_age: u32,
    /// Consecutive matches needed to confirm a track
    pub n_init: u32,
    /// Squared Mahalanobis distance above which appearance matches are gated out
    pub gating_threshold: f64,
    /// Sub-region IoU above which a new detection may duplicate a track
    pub duplicate_iou_threshold: f32,
    /// Sub-feature Euclidean distance below which a new detection duplicates a track
    pub duplicate_feature_threshold: f32,
    /// Primary appearance metric
    pub metric: MetricConfig,
    /// Sub-region appearance metric
    pub sub_metric: MetricConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_iou_distance: 0.7,
            max_age: 30,
            n_init: 3,
            gating_threshold: CHI2INV95[3],
            duplicate_iou_threshold: 0.5,
            duplicate_feature_threshold: 0.9,
            metric: MetricConfig::default(),
            sub_metric: MetricConfig::default(),
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_init == 0 {
            return Err(TrackerError::InvalidConfig(
                "n_init must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_iou_distance) {
            return Err(TrackerError::InvalidConfig(format!(
                "max_iou_distance must lie in [0, 1], got {}",
                self.max_iou_distance
            )));
        }
        if !self.gating_threshold.is_finite() || self.gating_threshold < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "gating_threshold must be a non-negative number, got {}",
                self.gating_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.duplicate_iou_threshold) {
            return Err(TrackerError::InvalidConfig(format!(
                "duplicate_iou_threshold must lie in [0, 1], got {}",
                self.duplicate_iou_threshold
            )));
        }
        if !self.duplicate_feature_threshold.is_finite() || self.duplicate_feature_threshold < 0.0
        {
            return Err(TrackerError::InvalidConfig(format!(
                "duplicate_feature_threshold must be a non-negative number, got {}",
                self.duplicate_feature_threshold
            )));
        }
        self.metric.validate()?;
        self.sub_metric.validate()
    }
}

/// Multi-target tracker.
///
/// Call [`predict`](Self::predict) exactly once before every
/// [`update`](Self::update). Identities start at 1 and are never reused.
pub struct Tracker<M = NearestNeighborDistanceMetric, S = LapjvSolver> {
    config: TrackerConfig,
    kalman_filter: KalmanFilter,
    metric: M,
    sub_metric: M,
    solver: S,
    tracks: Vec<Track>,
    next_id: u64,
    frame_id: u64,
}

impl Tracker {
    /// Create a tracker with nearest-neighbor metrics built from `config`
    /// and the optimal assignment solver.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        let metric = NearestNeighborDistanceMetric::new(config.metric);
        let sub_metric = NearestNeighborDistanceMetric::new(config.sub_metric);
        Self::with_components(config, metric, sub_metric, LapjvSolver)
    }
}

impl<M: DistanceMetric, S: AssignmentSolver> Tracker<M, S> {
    /// Create a tracker from explicit metric and solver implementations.
    /// Metric settings in `config` are only validated, not applied.
    pub fn with_components(config: TrackerConfig, metric: M, sub_metric: M, solver: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            kalman_filter: KalmanFilter::default(),
            metric,
            sub_metric,
            solver,
            tracks: Vec::new(),
            next_id: 1,
            frame_id: 0,
        })
    }

    /// Active tracks, in creation order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn confirmed_tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.is_confirmed())
    }

    /// Confirmed tracks matched in the current or previous frame.
    pub fn reportable_tracks(&self) -> impl Iterator<Item = &Track> {
        self.confirmed_tracks().filter(|t| t.time_since_update <= 1)
    }

    /// Number of `update` calls so far.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn metric(&self) -> &M {
        &self.metric
    }

    pub fn sub_metric(&self) -> &M {
        &self.sub_metric
    }

    /// Propagate track state distributions one time step forward.
    pub fn predict(&mut self) {
        for track in self.tracks.iter_mut() {
            track.predict(&self.kalman_filter);
        }
    }

    /// Perform measurement update and track management for one frame.
    pub fn update(&mut self, detections: &[Detection]) {
        self.frame_id += 1;

        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = self.associate(detections);

        for &(track_idx, det_idx) in &matches {
            self.tracks[track_idx].update(&self.kalman_filter, &detections[det_idx]);
        }
        for &track_idx in &unmatched_tracks {
            self.tracks[track_idx].mark_missed();
        }

        let before = self.tracks.len();
        self.tracks.retain(|t| !t.is_deleted());
        let deleted = before - self.tracks.len();

        let mut created = 0;
        for &det_idx in &unmatched_detections {
            let detection = &detections[det_idx];
            if self.is_duplicate(detection) {
                trace!("frame {}: detection {det_idx} duplicates an active track", self.frame_id);
                continue;
            }
            self.initiate_track(detection);
            created += 1;
        }

        self.refit_galleries();

        debug!(
            "frame {}: {} detections, {} matched, {} deleted, {} created, {} active",
            self.frame_id,
            detections.len(),
            matches.len(),
            deleted,
            created,
            self.tracks.len()
        );
    }

    /// Run the three-stage association over the current track set.
    ///
    /// The returned indices refer to `self.tracks` and `detections` and are
    /// only valid until the track set changes.
    fn associate(&self, detections: &[Detection]) -> AssignmentResult {
        let (confirmed_tracks, unconfirmed_tracks): (Vec<usize>, Vec<usize>) =
            (0..self.tracks.len()).partition(|&i| self.tracks[i].is_confirmed());
        let all_detections: Vec<usize> = (0..detections.len()).collect();

        // Stage A: gated appearance cascade over confirmed tracks.
        let gated_metric = |track_indices: &[usize], detection_indices: &[usize]| {
            let features: Vec<&Array1<f32>> = detection_indices
                .iter()
                .map(|&i| &detections[i].feature)
                .collect();
            let targets: Vec<u64> = track_indices
                .iter()
                .map(|&i| self.tracks[i].track_id)
                .collect();
            let mut cost_matrix = self.metric.distance(&features, &targets);
            matching::gate_cost_matrix(
                &self.kalman_filter,
                &mut cost_matrix,
                &self.tracks,
                detections,
                track_indices,
                detection_indices,
                self.config.gating_threshold,
            );
            cost_matrix
        };
        let stage_a = matching::matching_cascade(
            &self.solver,
            gated_metric,
            self.metric.matching_threshold(),
            self.config.max_age,
            &self.tracks,
            &confirmed_tracks,
            &all_detections,
        );

        // Stage B: IoU over tentative tracks and tracks matched last frame.
        let (recent, stale): (Vec<usize>, Vec<usize>) = stage_a
            .unmatched_tracks
            .iter()
            .partition(|&&k| self.tracks[k].time_since_update == 1);
        let iou_candidates: Vec<usize> = unconfirmed_tracks.into_iter().chain(recent).collect();
        let stage_b = matching::min_cost_matching(
            &self.solver,
            |t: &[usize], d: &[usize]| matching::iou_cost(&self.tracks, detections, t, d),
            self.config.max_iou_distance,
            &iou_candidates,
            &stage_a.unmatched_detections,
        );

        // Stage C: sub-feature appearance over whatever is left.
        let mut remaining_tracks: Vec<usize> = stale
            .into_iter()
            .chain(stage_b.unmatched_tracks.iter().copied())
            .collect();
        remaining_tracks.sort_unstable();
        let (sub_track_candidates, mut unmatched_tracks): (Vec<usize>, Vec<usize>) =
            remaining_tracks
                .into_iter()
                .partition(|&k| self.sub_metric.has_samples(self.tracks[k].track_id));
        let (sub_det_candidates, mut unmatched_detections): (Vec<usize>, Vec<usize>) = stage_b
            .unmatched_detections
            .iter()
            .partition(|&&k| detections[k].sub_feature.is_some());

        let sub_metric = |track_indices: &[usize], detection_indices: &[usize]| {
            let features: Vec<&Array1<f32>> = detection_indices
                .iter()
                .filter_map(|&i| detections[i].sub_feature.as_ref().map(|s| &s.feature))
                .collect();
            let targets: Vec<u64> = track_indices
                .iter()
                .map(|&i| self.tracks[i].track_id)
                .collect();
            self.sub_metric.distance(&features, &targets)
        };
        let stage_c = matching::min_cost_matching(
            &self.solver,
            sub_metric,
            self.sub_metric.matching_threshold(),
            &sub_track_candidates,
            &sub_det_candidates,
        );

        trace!(
            "frame {}: stage A {} / stage B {} / stage C {} matches",
            self.frame_id,
            stage_a.matches.len(),
            stage_b.matches.len(),
            stage_c.matches.len()
        );

        unmatched_tracks.extend(stage_c.unmatched_tracks);
        unmatched_detections.extend(stage_c.unmatched_detections);
        let matches = stage_a
            .matches
            .into_iter()
            .chain(stage_b.matches)
            .chain(stage_c.matches)
            .collect();

        AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        }
    }

    /// Whether `detection` repeats the sub-region of an active track's last
    /// detection: overlapping sub-region boxes and a close sub-feature.
    fn is_duplicate(&self, detection: &Detection) -> bool {
        let Some(sub) = &detection.sub_feature else {
            return false;
        };

        self.tracks
            .iter()
            .filter_map(|track| track.detection.sub_feature.as_ref())
            .any(|other| {
                sub.bbox.iou(&other.bbox) > self.config.duplicate_iou_threshold
                    && nn_matching::euclidean(&sub.feature, &other.feature)
                        < self.config.duplicate_feature_threshold
            })
    }

    fn initiate_track(&mut self, detection: &Detection) {
        let (mean, covariance) = self.kalman_filter.initiate(detection.bbox.to_measurement());
        trace!("frame {}: new track {}", self.frame_id, self.next_id);
        self.tracks.push(Track::new(
            mean,
            covariance,
            self.next_id,
            self.config.n_init,
            self.config.max_age,
            detection.clone(),
        ));
        self.next_id += 1;
    }

    /// Rebuild both galleries from the feature history of every confirmed
    /// track, handing each metric at most its budget per track.
    fn refit_galleries(&mut self) {
        fn newest<T>(history: &[T], budget: Option<usize>) -> &[T] {
            let skip = budget.map_or(0, |budget| history.len().saturating_sub(budget));
            &history[skip..]
        }

        let budget = self.metric.budget();
        let sub_budget = self.sub_metric.budget();
        let mut active_targets = Vec::new();
        let mut features = Vec::new();
        let mut targets = Vec::new();
        let mut sub_features = Vec::new();
        let mut sub_targets = Vec::new();

        for track in self.tracks.iter().filter(|t| t.is_confirmed()) {
            active_targets.push(track.track_id);
            for feature in newest(&track.features, budget) {
                features.push(feature);
                targets.push(track.track_id);
            }
            let present: Vec<&Array1<f32>> = track.sub_features.iter().flatten().collect();
            for &sub_feature in newest(&present, sub_budget) {
                sub_features.push(sub_feature);
                sub_targets.push(track.track_id);
            }
        }

        self.metric.partial_fit(&features, &targets, &active_targets);
        self.sub_metric
            .partial_fit(&sub_features, &sub_targets, &active_targets);
    }
}
