use log::debug;
use serde::Serialize;

use crate::detection::{Keypoint, matcher::Match};

/// Matches that move together: each agrees with the seed match on both endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub matches: Vec<Match>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Mean displacement from query to train over the cluster.
    pub fn mean_offset(&self, keypoints: &[Keypoint]) -> (f64, f64) {
        if self.matches.is_empty() {
            return (0.0, 0.0);
        }

        let (sx, sy) = self.matches.iter().fold((0.0, 0.0), |(sx, sy), m| {
            let (a, b) = (&keypoints[m.query], &keypoints[m.train]);
            (sx + (b.x - a.x) as f64, sy + (b.y - a.y) as f64)
        });
        let n = self.matches.len() as f64;

        (sx / n, sy / n)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    /// Matches that survived the minimum offset filter.
    pub matches: Vec<Match>,
    pub clusters: Vec<Cluster>,
}

pub struct ClusterBuilder {
    distance_threshold: u8,
    min_cluster_size: usize,
}

impl ClusterBuilder {
    pub fn new(distance_threshold: u8, min_cluster_size: usize) -> Self {
        Self {
            distance_threshold,
            min_cluster_size,
        }
    }

    /// `distance_threshold` percent of half the shorter image side.
    pub fn min_distance(&self, width: u32, height: u32) -> f64 {
        self.distance_threshold as f64 / 100.0 * (width.min(height) as f64 / 2.0)
    }

    pub fn build(&self, keypoints: &[Keypoint], matches: &[Match], (width, height): (u32, u32)) -> ClusterOutcome {
        let min_distance = self.min_distance(width, height);

        let retained = matches
            .iter()
            .filter_map(|m| {
                let offset = keypoints[m.query].distance_to(&keypoints[m.train]);
                (offset > min_distance).then_some((*m, offset))
            })
            .collect::<Vec<_>>();

        let near = |p: &Keypoint, q: &Keypoint| {
            let d = p.distance_to(q);
            d > 0.0 && d < min_distance
        };

        let mut clusters = Vec::new();
        for (i, &(seed, seed_offset)) in retained.iter().enumerate() {
            let (a0, b0) = (&keypoints[seed.query], &keypoints[seed.train]);
            let mut group = vec![seed];

            for &(candidate, offset) in &retained[i + 1..] {
                if (seed_offset - offset).abs() > min_distance {
                    continue;
                }

                let (a1, b1) = (&keypoints[candidate.query], &keypoints[candidate.train]);
                let same = near(a0, a1) && near(b0, b1);
                let swapped = near(a0, b1) && near(b0, a1);
                if !same && !swapped {
                    continue;
                }

                if group.iter().any(|m| m.is_reverse_of(&candidate)) {
                    continue;
                }
                group.push(candidate);
            }

            if group.len() >= self.min_cluster_size {
                clusters.push(Cluster { matches: group });
            }
        }

        debug!(
            "clustering: {} of {} matches beyond {:.1}px, {} clusters",
            retained.len(),
            matches.len(),
            min_distance,
            clusters.len()
        );

        ClusterOutcome {
            matches: retained.into_iter().map(|(m, _)| m).collect(),
            clusters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(x: f32, y: f32) -> Keypoint {
        Keypoint { x, y, size: 10.0, angle: 0.0, response: 1.0, octave: 0 }
    }

    // Five source points around (20, 20) copied 60px to the right, plus one stray pair.
    fn scene() -> (Vec<Keypoint>, Vec<Match>) {
        let sources = [(20.0, 20.0), (24.0, 21.0), (18.0, 25.0), (23.0, 24.0), (22.0, 16.0)];
        let mut keypoints = Vec::new();
        let mut matches = Vec::new();

        for (i, &(x, y)) in sources.iter().enumerate() {
            keypoints.push(kp(x, y));
            keypoints.push(kp(x + 60.0, y));
            matches.push(Match { query: 2 * i, train: 2 * i + 1, distance: 3 });
            matches.push(Match { query: 2 * i + 1, train: 2 * i, distance: 3 });
        }

        keypoints.push(kp(5.0, 90.0));
        keypoints.push(kp(95.0, 5.0));
        let n = keypoints.len();
        matches.push(Match { query: n - 2, train: n - 1, distance: 10 });

        (keypoints, matches)
    }

    #[test]
    fn min_distance_scales_with_short_side() {
        let builder = ClusterBuilder::new(15, 5);
        assert!((builder.min_distance(512, 300) - 22.5).abs() < 1e-9);
        assert_eq!(ClusterBuilder::new(0, 5).min_distance(100, 100), 0.0);
    }

    #[test]
    fn consistent_matches_form_one_cluster_per_seed() {
        let (keypoints, matches) = scene();
        let outcome = ClusterBuilder::new(15, 5).build(&keypoints, &matches, (100, 100));

        assert_eq!(outcome.matches.len(), matches.len());
        assert!(!outcome.clusters.is_empty());

        let first = &outcome.clusters[0];
        assert_eq!(first.len(), 5);
        for (i, m) in first.matches.iter().enumerate() {
            for other in &first.matches[i + 1..] {
                assert!(!m.is_reverse_of(other));
            }
        }

        let (dx, dy) = first.mean_offset(&keypoints);
        assert!((dx.abs() - 60.0).abs() < 1e-6 && dy.abs() < 1e-6);
    }

    #[test]
    fn short_offsets_are_discarded() {
        let keypoints = vec![kp(10.0, 10.0), kp(12.0, 10.0)];
        let matches = vec![Match { query: 0, train: 1, distance: 0 }];
        let outcome = ClusterBuilder::new(15, 1).build(&keypoints, &matches, (100, 100));

        assert!(outcome.matches.is_empty());
        assert!(outcome.clusters.is_empty());
    }

    #[test]
    fn coincident_keypoints_do_not_join() {
        let keypoints = vec![kp(10.0, 10.0), kp(70.0, 10.0), kp(10.0, 10.0), kp(70.0, 10.0)];
        let matches = vec![
            Match { query: 0, train: 1, distance: 0 },
            Match { query: 2, train: 3, distance: 0 },
        ];
        let outcome = ClusterBuilder::new(15, 2).build(&keypoints, &matches, (100, 100));

        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome.clusters.is_empty());
    }

    #[test]
    fn min_cluster_size_gates_clusters() {
        let (keypoints, matches) = scene();
        let outcome = ClusterBuilder::new(15, 6).build(&keypoints, &matches, (100, 100));
        assert!(outcome.clusters.is_empty());
    }
}
