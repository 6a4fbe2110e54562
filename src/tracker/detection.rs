use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;

/// Appearance cue taken from a sub-region of the detected object, with the
/// box it was computed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubFeature {
    /// Sub-region bounding box
    pub bbox: Rect,
    /// Sub-region appearance vector
    pub feature: Array1<f32>,
}

impl SubFeature {
    pub fn new(bbox: Rect, feature: Array1<f32>) -> Self {
        Self { bbox, feature }
    }
}

/// Detection input for the tracker: one object in a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Bounding box
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
    /// Appearance vector of the whole object
    pub feature: Array1<f32>,
    /// Optional finer-grained appearance cue
    pub sub_feature: Option<SubFeature>,
}

impl Detection {
    /// Create a detection from a TLBR box.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32, feature: Array1<f32>) -> Self {
        Self::from_rect(Rect::from_tlbr(x1, y1, x2, y2), score, feature)
    }

    pub fn from_rect(bbox: Rect, score: f32, feature: Array1<f32>) -> Self {
        Self {
            bbox,
            score,
            feature,
            sub_feature: None,
        }
    }

    /// Attach a sub-region appearance cue.
    pub fn with_sub_feature(mut self, bbox: Rect, feature: Array1<f32>) -> Self {
        self.sub_feature = Some(SubFeature::new(bbox, feature));
        self
    }
}
