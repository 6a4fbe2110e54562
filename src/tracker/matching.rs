//! Matching utilities for multi-object tracking.
//!
//! All functions work on global track/detection indices; cost matrices are
//! indexed by position within the `track_indices` / `detection_indices`
//! subsets passed alongside them.

use log::{trace, warn};
use ndarray::Array2;

use crate::tracker::detection::Detection;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::track::Track;

/// Cost assigned to pairs that must never be matched, whatever the
/// threshold.
pub const INFTY_COST: f32 = f32::INFINITY;

/// Output of a matching round over global indices.
///
/// `matches`, `unmatched_tracks` and `unmatched_detections` partition the
/// track and detection indices the round was given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Rectangular minimum-cost bipartite matching.
pub trait AssignmentSolver {
    /// Returns `(row, col)` pairs of a minimum-cost assignment. Each row and
    /// column appears at most once; with a rectangular matrix the surplus
    /// side stays unassigned.
    fn solve(&self, cost_matrix: &Array2<f32>) -> Vec<(usize, usize)>;
}

/// Optimal assignment through the Jonker-Volgenant algorithm.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapjvSolver;

impl AssignmentSolver for LapjvSolver {
    fn solve(&self, cost_matrix: &Array2<f32>) -> Vec<(usize, usize)> {
        let (num_rows, num_cols) = cost_matrix.dim();
        if num_rows == 0 || num_cols == 0 {
            return Vec::new();
        }

        let size = num_rows.max(num_cols);
        let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
        for ((i, j), &cost) in cost_matrix.indexed_iter() {
            padded[[i, j]] = cost as f64;
        }

        match lapjv::lapjv(&padded) {
            Ok((row_to_col, _)) => row_to_col
                .into_iter()
                .enumerate()
                .filter(|&(row, col)| row < num_rows && col < num_cols)
                .collect(),
            Err(err) => {
                warn!("lapjv failed on a {num_rows}x{num_cols} cost matrix: {err:?}");
                Vec::new()
            }
        }
    }
}

/// Greedy assignment in ascending cost order. Not optimal, but cheap and
/// deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedySolver;

impl AssignmentSolver for GreedySolver {
    fn solve(&self, cost_matrix: &Array2<f32>) -> Vec<(usize, usize)> {
        let (num_rows, num_cols) = cost_matrix.dim();

        let mut pairs: Vec<(f32, usize, usize)> = cost_matrix
            .indexed_iter()
            .filter(|(_, cost)| cost.is_finite())
            .map(|((i, j), &cost)| (cost, i, j))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut used_rows = vec![false; num_rows];
        let mut used_cols = vec![false; num_cols];
        let mut assignment = Vec::new();
        for (_, row, col) in pairs {
            if used_rows[row] || used_cols[col] {
                continue;
            }
            used_rows[row] = true;
            used_cols[col] = true;
            assignment.push((row, col));
        }
        assignment
    }
}

/// Solve one linear assignment round.
///
/// `cost_fn` receives the track and detection subsets and returns their cost
/// matrix. Entries above `max_distance` (or NaN) are infeasible: they are
/// clipped to just above it for the solver and never accepted.
pub fn min_cost_matching<S, F>(
    solver: &S,
    cost_fn: F,
    max_distance: f32,
    track_indices: &[usize],
    detection_indices: &[usize],
) -> AssignmentResult
where
    S: AssignmentSolver + ?Sized,
    F: FnOnce(&[usize], &[usize]) -> Array2<f32>,
{
    if track_indices.is_empty() || detection_indices.is_empty() {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: track_indices.to_vec(),
            unmatched_detections: detection_indices.to_vec(),
        };
    }

    let mut cost_matrix = cost_fn(track_indices, detection_indices);
    debug_assert_eq!(cost_matrix.dim(), (track_indices.len(), detection_indices.len()));
    // Decided before clipping: `max_distance + 1e-5` rounds back to
    // `max_distance` for large thresholds.
    let feasible = cost_matrix.mapv(|cost| cost <= max_distance);
    cost_matrix.mapv_inplace(|cost| {
        if cost > max_distance || cost.is_nan() {
            max_distance + 1e-5
        } else {
            cost
        }
    });

    let mut track_matched = vec![false; track_indices.len()];
    let mut detection_matched = vec![false; detection_indices.len()];
    let mut matches = Vec::new();

    for (row, col) in solver.solve(&cost_matrix) {
        if row >= track_indices.len() || col >= detection_indices.len() {
            continue;
        }
        if track_matched[row] || detection_matched[col] || !feasible[[row, col]] {
            continue;
        }
        track_matched[row] = true;
        detection_matched[col] = true;
        matches.push((track_indices[row], detection_indices[col]));
    }

    AssignmentResult {
        matches,
        unmatched_tracks: unmarked(track_indices, &track_matched),
        unmatched_detections: unmarked(detection_indices, &detection_matched),
    }
}

/// Run the matching cascade over `track_indices`.
///
/// Tracks are matched in buckets of increasing `time_since_update`, starting
/// at 1 and ending at `cascade_depth`; each bucket only sees the detections
/// the previous buckets left over.
pub fn matching_cascade<S, F>(
    solver: &S,
    cost_fn: F,
    max_distance: f32,
    cascade_depth: u32,
    tracks: &[Track],
    track_indices: &[usize],
    detection_indices: &[usize],
) -> AssignmentResult
where
    S: AssignmentSolver + ?Sized,
    F: Fn(&[usize], &[usize]) -> Array2<f32>,
{
    let mut unmatched_detections = detection_indices.to_vec();
    let mut matches = Vec::new();

    for level in 0..cascade_depth {
        if unmatched_detections.is_empty() {
            break;
        }

        let track_indices_l: Vec<usize> = track_indices
            .iter()
            .copied()
            .filter(|&k| tracks[k].time_since_update == level + 1)
            .collect();
        if track_indices_l.is_empty() {
            continue;
        }

        let result = min_cost_matching(
            solver,
            &cost_fn,
            max_distance,
            &track_indices_l,
            &unmatched_detections,
        );
        trace!(
            "cascade level {}: {} tracks, {} matched",
            level + 1,
            track_indices_l.len(),
            result.matches.len()
        );
        matches.extend(result.matches);
        unmatched_detections = result.unmatched_detections;
    }

    let unmatched_tracks = track_indices
        .iter()
        .copied()
        .filter(|&k| !matches.iter().any(|&(t, _)| t == k))
        .collect();

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections,
    }
}

/// Invalidate entries whose squared Mahalanobis distance between the track's
/// predicted state and the detection exceeds `gating_threshold`.
///
/// A track whose covariance cannot be factorised is gated out entirely.
pub fn gate_cost_matrix(
    kalman_filter: &KalmanFilter,
    cost_matrix: &mut Array2<f32>,
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
    gating_threshold: f64,
) {
    let measurements: Vec<[f64; 4]> = detection_indices
        .iter()
        .map(|&i| detections[i].bbox.to_measurement())
        .collect();

    for (row, &track_idx) in track_indices.iter().enumerate() {
        let track = &tracks[track_idx];
        match kalman_filter.gating_distance(&track.mean, &track.covariance, &measurements, false) {
            Ok(distances) => {
                for (col, distance) in distances.into_iter().enumerate() {
                    if distance > gating_threshold || distance.is_nan() {
                        cost_matrix[[row, col]] = INFTY_COST;
                    }
                }
            }
            Err(err) => {
                warn!("track {}: gating disabled this frame: {err}", track.track_id);
                cost_matrix.row_mut(row).fill(INFTY_COST);
            }
        }
    }
}

/// `1 - IoU` between predicted track boxes and detection boxes.
///
/// Tracks not updated in the previous frame get `INFTY_COST` rows.
pub fn iou_cost(
    tracks: &[Track],
    detections: &[Detection],
    track_indices: &[usize],
    detection_indices: &[usize],
) -> Array2<f32> {
    let mut cost_matrix = Array2::zeros((track_indices.len(), detection_indices.len()));
    for (row, &track_idx) in track_indices.iter().enumerate() {
        let track = &tracks[track_idx];
        if track.time_since_update > 1 {
            cost_matrix.row_mut(row).fill(INFTY_COST);
            continue;
        }

        let bbox = track.bbox();
        for (col, &det_idx) in detection_indices.iter().enumerate() {
            cost_matrix[[row, col]] = 1.0 - bbox.iou(&detections[det_idx].bbox);
        }
    }
    cost_matrix
}

fn unmarked(indices: &[usize], marked: &[bool]) -> Vec<usize> {
    indices
        .iter()
        .zip(marked)
        .filter_map(|(&idx, &m)| if m { None } else { Some(idx) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn track_at(kf: &KalmanFilter, track_id: u64, x: f32, time_since_update: u32) -> Track {
        let det = Detection::new(x, 0.0, x + 50.0, 100.0, 0.9, arr1(&[1.0]));
        let (mean, cov) = kf.initiate(det.bbox.to_measurement());
        let mut track = Track::new(mean, cov, track_id, 3, 30, det);
        track.time_since_update = time_since_update;
        track
    }

    fn assert_partition(result: &AssignmentResult, tracks: &[usize], detections: &[usize]) {
        let mut seen_tracks: Vec<usize> = result
            .matches
            .iter()
            .map(|&(t, _)| t)
            .chain(result.unmatched_tracks.iter().copied())
            .collect();
        let mut seen_dets: Vec<usize> = result
            .matches
            .iter()
            .map(|&(_, d)| d)
            .chain(result.unmatched_detections.iter().copied())
            .collect();
        seen_tracks.sort_unstable();
        seen_dets.sort_unstable();

        let mut expected_tracks = tracks.to_vec();
        let mut expected_dets = detections.to_vec();
        expected_tracks.sort_unstable();
        expected_dets.sort_unstable();
        assert_eq!(seen_tracks, expected_tracks);
        assert_eq!(seen_dets, expected_dets);
    }

    #[test]
    fn test_lapjv_is_optimal_where_greedy_is_not() {
        let cost = arr2(&[[0.1, 0.2], [0.15, 0.9]]);

        let mut optimal = LapjvSolver.solve(&cost);
        optimal.sort_unstable();
        assert_eq!(optimal, vec![(0, 1), (1, 0)]);

        let mut greedy = GreedySolver.solve(&cost);
        greedy.sort_unstable();
        assert_eq!(greedy, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn test_lapjv_rectangular() {
        let cost = arr2(&[[0.5, 0.1, 0.9]]);
        assert_eq!(LapjvSolver.solve(&cost), vec![(0, 1)]);

        let tall = arr2(&[[0.5], [0.1], [0.9]]);
        assert_eq!(LapjvSolver.solve(&tall), vec![(1, 0)]);
    }

    #[test]
    fn test_min_cost_matching_rejects_above_threshold() {
        let cost = arr2(&[[0.1, 0.8], [0.8, 0.95]]);
        let result = min_cost_matching(&LapjvSolver, |_, _| cost.clone(), 0.5, &[4, 7], &[2, 3]);

        assert_eq!(result.matches, vec![(4, 2)]);
        assert_eq!(result.unmatched_tracks, vec![7]);
        assert_eq!(result.unmatched_detections, vec![3]);
        assert_partition(&result, &[4, 7], &[2, 3]);
    }

    #[test]
    fn test_min_cost_matching_empty_inputs() {
        let result = min_cost_matching(
            &LapjvSolver,
            |_, _| unreachable!("no cost matrix for empty sets"),
            0.5,
            &[],
            &[0, 1],
        );
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0, 1]);

        let result = min_cost_matching(&GreedySolver, |_, _| unreachable!(), 0.5, &[3], &[]);
        assert_eq!(result.unmatched_tracks, vec![3]);
    }

    #[test]
    fn test_min_cost_matching_treats_nan_as_infeasible() {
        let cost = arr2(&[[f32::NAN, 0.2]]);
        let result = min_cost_matching(&LapjvSolver, |_, _| cost.clone(), 0.5, &[0], &[0, 1]);
        assert_eq!(result.matches, vec![(0, 1)]);
    }

    #[test]
    fn test_infeasible_entries_stay_unmatched_under_large_threshold() {
        let cost = arr2(&[[INFTY_COST, 3e5], [1e5, INFTY_COST]]);
        for result in [
            min_cost_matching(&LapjvSolver, |_, _| cost.clone(), 2e5, &[0, 1], &[0, 1]),
            min_cost_matching(&GreedySolver, |_, _| cost.clone(), 2e5, &[0, 1], &[0, 1]),
        ] {
            assert_eq!(result.matches, vec![(1, 0)]);
            assert_eq!(result.unmatched_tracks, vec![0]);
            assert_eq!(result.unmatched_detections, vec![1]);
        }
    }

    #[test]
    fn test_partition_holds_for_mixed_costs() {
        let tracks: Vec<usize> = (0..5).collect();
        let dets: Vec<usize> = (10..14).collect();
        let cost = Array2::from_shape_fn((5, 4), |(i, j)| ((i * 7 + j * 3) % 10) as f32 / 10.0);

        for result in [
            min_cost_matching(&LapjvSolver, |_, _| cost.clone(), 0.45, &tracks, &dets),
            min_cost_matching(&GreedySolver, |_, _| cost.clone(), 0.45, &tracks, &dets),
        ] {
            assert_partition(&result, &tracks, &dets);
            for &(t, d) in &result.matches {
                assert!(cost[[t, d - 10]] <= 0.45);
            }
        }
    }

    #[test]
    fn test_cascade_prefers_recently_updated_tracks() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 1, 0.0, 2), track_at(&kf, 2, 0.0, 1)];

        // The stale track 1 is the cheaper candidate, the fresh track 2 still
        // claims the detection because its bucket runs first.
        let cost_fn = |track_indices: &[usize], detection_indices: &[usize]| {
            Array2::from_shape_fn((track_indices.len(), detection_indices.len()), |(row, _)| {
                if track_indices[row] == 0 { 0.05f32 } else { 0.15 }
            })
        };

        let result = matching_cascade(&LapjvSolver, cost_fn, 0.2, 30, &tracks, &[0, 1], &[0]);
        assert_eq!(result.matches, vec![(1, 0)]);
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_cascade_skips_tracks_beyond_depth() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 1, 0.0, 3)];
        let result = matching_cascade(
            &LapjvSolver,
            |t: &[usize], d: &[usize]| Array2::zeros((t.len(), d.len())),
            0.2,
            2,
            &tracks,
            &[0],
            &[0],
        );
        assert!(result.matches.is_empty());
        assert_partition(&result, &[0], &[0]);
    }

    #[test]
    fn test_gate_cost_matrix_blocks_distant_detections() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 1, 0.0, 1)];
        let detections = vec![
            Detection::new(1.0, 0.0, 51.0, 100.0, 0.9, arr1(&[1.0])),
            Detection::new(500.0, 0.0, 550.0, 100.0, 0.9, arr1(&[1.0])),
        ];
        let mut cost = Array2::zeros((1, 2));
        gate_cost_matrix(&kf, &mut cost, &tracks, &detections, &[0], &[0, 1], 9.4877);

        assert_eq!(cost[[0, 0]], 0.0);
        assert_eq!(cost[[0, 1]], INFTY_COST);
    }

    #[test]
    fn test_iou_cost() {
        let kf = KalmanFilter::new();
        let tracks = vec![track_at(&kf, 1, 0.0, 1), track_at(&kf, 2, 0.0, 2)];
        let detections = vec![
            Detection::new(0.0, 0.0, 50.0, 100.0, 0.9, arr1(&[1.0])),
            Detection::new(200.0, 0.0, 250.0, 100.0, 0.9, arr1(&[1.0])),
        ];
        let cost = iou_cost(&tracks, &detections, &[0, 1], &[0, 1]);

        assert!(cost[[0, 0]].abs() < 1e-4);
        assert_eq!(cost[[0, 1]], 1.0);
        assert_eq!(cost[[1, 0]], INFTY_COST);
    }
}
