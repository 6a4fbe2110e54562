//! Trait for detection + appearance embedding backends.

use crate::tracker::Detection;

/// Source of per-frame detections with appearance features.
///
/// Implementations usually chain an object detector with a re-identification
/// network that embeds every detected crop.
///
/// # Example
///
/// ```ignore
/// use deepsort_rs::{Detection, DetectionSource};
///
/// struct MyBackend {
///     // detector and embedder here
/// }
///
/// impl DetectionSource for MyBackend {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, input: &[u8], width: u32, height: u32) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference, embed the crops and return detections
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    /// Error type for inference failures.
    type Error;

    /// Run inference on raw image data and return embedded detections.
    ///
    /// # Arguments
    /// * `input` - Raw image bytes (format depends on implementation)
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    fn detect(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, Self::Error>;
}

/// Conversion of model-specific outputs into tracker detections, accepted by
/// [`TrackerPipeline::process_detections`](super::TrackerPipeline::process_detections).
pub trait IntoDetections {
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}
