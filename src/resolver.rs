//! Identity resolution as an external capability.
//!
//! The store never implements identity resolution. It holds a reference to
//! a [`Resolver`] that maps raw entity ids to canonical ids and ranks
//! duplicate candidates; the ranking algorithm lives on the other side of
//! this trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// External raw-id to canonical-id mapping plus a similarity-ranked
/// candidate generator.
pub trait Resolver: Send + Sync {
    /// Maps a raw entity id to its canonical id. Unknown ids map to
    /// themselves.
    fn canonicalize(&self, entity_id: &str) -> String;

    /// Similarity-ranked duplicate candidates for an id, best first.
    fn candidates(&self, entity_id: &str) -> Vec<(String, f64)>;
}

/// In-process resolver backed by explicit merge and score registrations.
///
/// Suitable for tests and for wiring in resolution decisions computed
/// elsewhere.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    canonical: RwLock<BTreeMap<String, String>>,
    scores: RwLock<BTreeMap<String, Vec<(String, f64)>>>,
}

impl MemoryResolver {
    /// Creates an empty resolver; every id maps to itself.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers that `entity_id` resolves to `canonical_id`.
    pub fn merge(&self, entity_id: impl Into<String>, canonical_id: impl Into<String>) {
        let mut map = self.canonical.write().expect("resolver lock poisoned");
        map.insert(entity_id.into(), canonical_id.into());
    }

    /// Registers a ranked candidate for an id.
    pub fn register_candidate(
        &self,
        entity_id: impl Into<String>,
        candidate_id: impl Into<String>,
        score: f64,
    ) {
        let mut map = self.scores.write().expect("resolver lock poisoned");
        let entry = map.entry(entity_id.into()).or_default();
        entry.push((candidate_id.into(), score));
        entry.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    }
}

impl Resolver for MemoryResolver {
    fn canonicalize(&self, entity_id: &str) -> String {
        let map = self.canonical.read().expect("resolver lock poisoned");
        // follow chains, bounded against registration cycles
        let mut current = entity_id;
        for _ in 0..64 {
            match map.get(current) {
                Some(next) if next != current => current = next,
                _ => break,
            }
        }
        current.to_string()
    }

    fn candidates(&self, entity_id: &str) -> Vec<(String, f64)> {
        let map = self.scores.read().expect("resolver lock poisoned");
        map.get(entity_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_unknown_is_identity() {
        let resolver = MemoryResolver::new();
        assert_eq!(resolver.canonicalize("x"), "x");
    }

    #[test]
    fn test_canonicalize_follows_chain() {
        let resolver = MemoryResolver::new();
        resolver.merge("a", "b");
        resolver.merge("b", "c");
        assert_eq!(resolver.canonicalize("a"), "c");
        assert_eq!(resolver.canonicalize("b"), "c");
        assert_eq!(resolver.canonicalize("c"), "c");
    }

    #[test]
    fn test_candidates_ranked_descending() {
        let resolver = MemoryResolver::new();
        resolver.register_candidate("a", "low", 0.3);
        resolver.register_candidate("a", "high", 0.9);
        resolver.register_candidate("a", "mid", 0.6);
        let ranked: Vec<String> = resolver
            .candidates("a")
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ranked, ["high", "mid", "low"]);
        assert!(resolver.candidates("unknown").is_empty());
    }
}
