use rayon::prelude::*;
use serde::Serialize;

use crate::detection::Descriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

impl Match {
    pub fn is_reverse_of(&self, other: &Match) -> bool {
        self.query == other.train && self.train == other.query
    }
}

/// Hamming radius for a 0-100 matching threshold, on the 0-255 scale.
pub fn matching_radius(matching_threshold: u8) -> f64 {
    matching_threshold as f64 / 100.0 * 255.0
}

/// Brute-force radius matcher of a descriptor set against itself.
pub struct RadiusMatcher {
    radius: f64,
}

impl RadiusMatcher {
    pub fn new(radius: f64) -> Self {
        Self { radius }
    }

    pub fn from_threshold(matching_threshold: u8) -> Self {
        Self::new(matching_radius(matching_threshold))
    }

    /// Every ordered pair `(query, train)` with `query != train` within the radius.
    /// Grouped by query, each group sorted by distance then train index.
    pub fn match_all(&self, descriptors: &[Descriptor]) -> Vec<Match> {
        let per_query: Vec<Vec<Match>> = (0..descriptors.len())
            .into_par_iter()
            .map(|query| {
                let mut row = descriptors
                    .iter()
                    .enumerate()
                    .filter(|&(train, _)| train != query)
                    .filter_map(|(train, candidate)| {
                        let distance = descriptors[query].hamming(candidate);
                        (distance as f64 <= self.radius).then_some(Match { query, train, distance })
                    })
                    .collect::<Vec<_>>();
                row.sort_by_key(|m| (m.distance, m.train));
                row
            })
            .collect();

        per_query.into_iter().flatten().collect()
    }
}
