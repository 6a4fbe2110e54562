//! Builder for creating Detection objects from various input formats.

use log::warn;
use ndarray::Array1;

use crate::tracker::{Detection, Rect, SubFeature};

/// Builder for [`Detection`]s.
///
/// The box defaults to empty, the score to 0 and the feature to an empty
/// vector; set at least the box and the feature before building.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    bbox: Rect,
    score: f32,
    feature: Option<Array1<f32>>,
    sub_feature: Option<SubFeature>,
}

impl DetectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.bbox = Rect::from_tlbr(x1, y1, x2, y2);
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, x: f32, y: f32, w: f32, h: f32) -> Self {
        self.bbox = Rect::new(x, y, w, h);
        self
    }

    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Set the appearance vector.
    pub fn feature(mut self, feature: impl Into<Array1<f32>>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    /// Set the sub-region box (TLBR) and its appearance vector.
    pub fn sub_feature(
        mut self,
        tlbr: [f32; 4],
        feature: impl Into<Array1<f32>>,
    ) -> Self {
        let [x1, y1, x2, y2] = tlbr;
        self.sub_feature = Some(SubFeature::new(
            Rect::from_tlbr(x1, y1, x2, y2),
            feature.into(),
        ));
        self
    }

    /// Build the detection.
    ///
    /// Without a [`feature`](Self::feature) the detection carries an empty
    /// appearance vector: it can still match by IoU but is infeasible for
    /// every appearance comparison. A warning is logged in that case.
    pub fn build(self) -> Detection {
        let feature = self.feature.unwrap_or_else(|| {
            warn!("detection built without an appearance feature");
            Array1::zeros(0)
        });
        Detection {
            bbox: self.bbox,
            score: self.score,
            feature,
            sub_feature: self.sub_feature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .score(0.95)
            .feature(vec![0.1, 0.2, 0.3])
            .build();

        assert_eq!(det.score, 0.95);
        assert_eq!(det.bbox.to_tlwh(), [10.0, 20.0, 40.0, 60.0]);
        assert_eq!(det.feature.len(), 3);
        assert!(det.sub_feature.is_none());
    }

    #[test]
    fn test_missing_feature_builds_empty_vector() {
        let det = DetectionBuilder::new().tlwh(0.0, 0.0, 10.0, 10.0).build();
        assert!(det.feature.is_empty());
        assert_eq!(det.bbox.area(), 100.0);
    }

    #[test]
    fn test_xywh_and_sub_feature() {
        let det = DetectionBuilder::new()
            .xywh(50.0, 50.0, 20.0, 40.0)
            .feature(vec![1.0])
            .sub_feature([45.0, 30.0, 55.0, 40.0], vec![0.5, 0.5])
            .build();

        assert_eq!(det.bbox.to_tlbr(), [40.0, 30.0, 60.0, 70.0]);
        let sub = det.sub_feature.unwrap();
        assert_eq!(sub.bbox.to_tlwh(), [45.0, 30.0, 10.0, 10.0]);
        assert_eq!(sub.feature.len(), 2);
    }
}
