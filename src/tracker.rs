mod deep_sort_tracker;
mod detection;
mod kalman_filter;
pub mod matching;
mod nn_matching;
mod rect;
mod track;
mod track_state;

pub use deep_sort_tracker::{Tracker, TrackerConfig};
pub use detection::{Detection, SubFeature};
pub use kalman_filter::{CHI2INV95, KalmanFilter};
pub use matching::{AssignmentResult, AssignmentSolver, GreedySolver, LapjvSolver};
pub use nn_matching::{DistanceMetric, Metric, MetricConfig, NearestNeighborDistanceMetric};
pub use rect::Rect;
pub use track::Track;
pub use track_state::TrackState;
