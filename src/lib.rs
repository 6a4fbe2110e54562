//! Deep SORT multi-object tracking.
//!
//! The [`tracker`] module holds the association cascade and track lifecycle,
//! the [`integration`] module connects detector/embedder backends to it.

pub mod integration;
pub mod tracker;

mod error;

pub use error::{Result, TrackerError};
pub use integration::{DetectionBuilder, DetectionSource, IntoDetections, TrackerPipeline};
pub use tracker::{
    Detection, DistanceMetric, Metric, MetricConfig, NearestNeighborDistanceMetric, Rect,
    SubFeature, Track, TrackState, Tracker, TrackerConfig,
};
