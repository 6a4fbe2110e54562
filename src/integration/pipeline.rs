//! TrackerPipeline for combining detection with tracking.

use crate::error::Result;
use crate::tracker::{Track, Tracker, TrackerConfig};

use super::{DetectionSource, IntoDetections};

/// Bundles a [`DetectionSource`] with a [`Tracker`] and drives the
/// predict/update cycle once per frame.
pub struct TrackerPipeline<D: DetectionSource> {
    detector: D,
    tracker: Tracker,
}

impl<D: DetectionSource> TrackerPipeline<D> {
    pub fn new(detector: D, config: TrackerConfig) -> Result<Self> {
        Ok(Self {
            detector,
            tracker: Tracker::new(config)?,
        })
    }

    pub fn with_default_config(detector: D) -> Result<Self> {
        Self::new(detector, TrackerConfig::default())
    }

    /// Process a single frame and return the reportable tracks.
    ///
    /// On a detection error the tracker is left untouched for this frame.
    ///
    /// # Arguments
    /// * `input` - Raw image bytes
    /// * `width` - Image width in pixels
    /// * `height` - Image height in pixels
    pub fn process_frame(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> std::result::Result<Vec<Track>, D::Error> {
        let detections = self.detector.detect(input, width, height)?;
        Ok(self.process_detections(detections))
    }

    /// Track detections produced outside the pipeline's own detector and
    /// return the reportable tracks.
    pub fn process_detections(&mut self, detections: impl IntoDetections) -> Vec<Track> {
        let detections = detections.into_detections();
        self.tracker.predict();
        self.tracker.update(&detections);
        self.tracker.reportable_tracks().cloned().collect()
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }
}
