//! Integration module for connecting detection and embedding backends with
//! the tracker.
//!
//! Backends produce [`Detection`](crate::Detection)s carrying an appearance
//! vector (and optionally a sub-region vector); the tracker consumes them.

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, IntoDetections};
pub use pipeline::TrackerPipeline;
