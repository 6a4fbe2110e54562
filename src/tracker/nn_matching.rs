//! Nearest-neighbor appearance metric over per-identity feature galleries.

use std::collections::{HashMap, HashSet};

use log::warn;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::tracker::matching::INFTY_COST;

/// Distance used to compare appearance vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean distance
    Euclidean,
    /// One minus the cosine similarity
    #[default]
    Cosine,
}

/// Configuration of a [`NearestNeighborDistanceMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    pub kind: Metric,
    /// Associations with larger distance are considered invalid
    pub matching_threshold: f32,
    /// Maximum samples kept per identity, `None` for unbounded
    pub budget: Option<usize>,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            kind: Metric::Cosine,
            matching_threshold: 0.2,
            budget: Some(100),
        }
    }
}

impl MetricConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.matching_threshold.is_finite() || self.matching_threshold < 0.0 {
            return Err(TrackerError::InvalidConfig(format!(
                "matching_threshold must be a non-negative number, got {}",
                self.matching_threshold
            )));
        }
        if self.budget == Some(0) {
            return Err(TrackerError::InvalidConfig(
                "budget must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Appearance distance between detections and tracked identities.
pub trait DistanceMetric {
    /// Associations with larger distance are disregarded.
    fn matching_threshold(&self) -> f32;

    /// Cost matrix of shape `(targets.len(), features.len())` where element
    /// `(i, j)` is the smallest distance between `features[j]` and the gallery
    /// of `targets[i]`.
    fn distance(&self, features: &[&Array1<f32>], targets: &[u64]) -> Array2<f32>;

    /// Replace the galleries with `features` labelled by `targets`, then
    /// drop every identity not in `active_targets`.
    fn partial_fit(&mut self, features: &[&Array1<f32>], targets: &[u64], active_targets: &[u64]);

    /// Whether `target` has at least one gallery sample.
    fn has_samples(&self, target: u64) -> bool;

    /// Number of newest samples kept per identity, if bounded. Callers only
    /// need to pass that many samples per target to `partial_fit`.
    fn budget(&self) -> Option<usize> {
        None
    }
}

/// Budgeted nearest-neighbor gallery per identity.
#[derive(Debug, Clone)]
pub struct NearestNeighborDistanceMetric {
    kind: Metric,
    matching_threshold: f32,
    budget: Option<usize>,
    samples: HashMap<u64, Vec<Array1<f32>>>,
}

impl Default for NearestNeighborDistanceMetric {
    fn default() -> Self {
        Self::new(MetricConfig::default())
    }
}

impl NearestNeighborDistanceMetric {
    pub fn new(config: MetricConfig) -> Self {
        Self {
            kind: config.kind,
            matching_threshold: config.matching_threshold,
            budget: config.budget,
            samples: HashMap::new(),
        }
    }

    pub fn kind(&self) -> Metric {
        self.kind
    }

    /// Gallery of `target`, oldest sample first.
    pub fn samples(&self, target: u64) -> Option<&[Array1<f32>]> {
        self.samples.get(&target).map(Vec::as_slice)
    }

    /// Identities with a gallery.
    pub fn targets(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.keys().copied()
    }

    fn nearest(&self, gallery: &[Array1<f32>], feature: &Array1<f32>) -> f32 {
        let distances = gallery.iter().filter_map(|sample| {
            if sample.len() != feature.len() {
                warn!(
                    "feature dimension mismatch: gallery {} vs query {}",
                    sample.len(),
                    feature.len()
                );
                return None;
            }
            Some(match self.kind {
                Metric::Euclidean => squared_euclidean(sample, feature),
                Metric::Cosine => cosine_distance(sample, feature),
            })
        });
        let nearest = distances.fold(f32::INFINITY, f32::min);
        if nearest.is_finite() {
            nearest.max(0.0)
        } else {
            INFTY_COST
        }
    }
}

impl DistanceMetric for NearestNeighborDistanceMetric {
    fn matching_threshold(&self) -> f32 {
        self.matching_threshold
    }

    fn distance(&self, features: &[&Array1<f32>], targets: &[u64]) -> Array2<f32> {
        let mut cost_matrix = Array2::from_elem((targets.len(), features.len()), INFTY_COST);
        for (i, target) in targets.iter().enumerate() {
            let Some(gallery) = self.samples.get(target) else {
                continue;
            };
            for (j, feature) in features.iter().enumerate() {
                cost_matrix[[i, j]] = self.nearest(gallery, feature);
            }
        }
        cost_matrix
    }

    fn partial_fit(&mut self, features: &[&Array1<f32>], targets: &[u64], active_targets: &[u64]) {
        let active: HashSet<u64> = active_targets.iter().copied().collect();
        let mut grouped: HashMap<u64, Vec<&Array1<f32>>> = HashMap::new();
        for (&feature, &target) in features.iter().zip(targets) {
            if active.contains(&target) {
                grouped.entry(target).or_default().push(feature);
            }
        }

        // Only the retained tail is cloned.
        let budget = self.budget;
        self.samples = grouped
            .into_iter()
            .map(|(target, gallery)| {
                let skip = budget.map_or(0, |budget| gallery.len().saturating_sub(budget));
                let kept = gallery[skip..].iter().map(|&f| f.clone()).collect();
                (target, kept)
            })
            .collect();
    }

    fn has_samples(&self, target: u64) -> bool {
        self.samples.get(&target).is_some_and(|gallery| !gallery.is_empty())
    }

    fn budget(&self) -> Option<usize> {
        self.budget
    }
}

fn squared_euclidean(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    let diff = a - b;
    diff.dot(&diff)
}

/// Plain Euclidean distance.
pub(crate) fn euclidean(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    squared_euclidean(a, b).sqrt()
}

fn cosine_distance(a: &Array1<f32>, b: &Array1<f32>) -> f32 {
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - a.dot(b) / (norm_a * norm_b)
}
