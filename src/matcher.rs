//! Threshold matcher
//!
//! Decides which photos contain the queried face. A stored face matches when
//! its Euclidean distance to the query is at most the threshold (inclusive),
//! and a photo matches when any of its faces does.

use std::collections::HashSet;

use tracing::debug;

use crate::config::DEFAULT_MATCH_THRESHOLD;
use crate::embedding::{Embedding, FaceRecord, PhotoId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matcher {
    threshold: f32,
}

impl Matcher {
    /// Create a matcher with the given maximum distance
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether two embeddings are considered the same person.
    ///
    /// Embeddings of different dimensionality never match.
    pub fn is_match(&self, query: &Embedding, candidate: &Embedding) -> bool {
        match query.euclidean_distance(candidate) {
            Some(distance) => distance <= self.threshold,
            None => false,
        }
    }

    /// Collect the photos that have at least one face matching `query`
    pub fn match_candidates(&self, query: &Embedding, candidates: &[FaceRecord]) -> HashSet<PhotoId> {
        let mut matched = HashSet::new();
        let mut mismatched_dims = 0usize;

        for candidate in candidates {
            // Membership is all that is reported, so one matching face per photo is enough
            if matched.contains(&candidate.photo_id) {
                continue;
            }

            if candidate.embedding.dim() != query.dim() {
                mismatched_dims += 1;
                continue;
            }

            if self.is_match(query, &candidate.embedding) {
                matched.insert(candidate.photo_id);
            }
        }

        if mismatched_dims > 0 {
            debug!(
                "Ignored {} candidates with dimension != {}",
                mismatched_dims,
                query.dim()
            );
        }

        matched
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}
