//! Meta-learning loop - per-tag thresholds, weights and occurrence counts
//!
//! Adaptive state lives behind the narrow `AdaptiveStore` trait so the router
//! can be driven by an in-memory store in tests. Every mutation goes through
//! `AdaptiveStore::update`, which runs under the store's write lock; two
//! concurrent successes for one tag are serialized, not interleaved.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::LearningConfig;
use crate::types::AdaptiveWeights;

/// Mutable adaptive state for one tag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagState {
    /// `None` means the base threshold applies.
    pub threshold: Option<f64>,
    pub weights: Option<AdaptiveWeights>,
    pub occurrences: u64,
}

/// Point-in-time copy of all adaptive state, in persistence shape
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveSnapshot {
    pub thresholds: HashMap<String, f64>,
    pub occurrences: HashMap<String, u64>,
    pub weights: HashMap<String, AdaptiveWeights>,
}

/// Read-mostly adaptive state shared by all requests
pub trait AdaptiveStore: Send + Sync {
    fn threshold(&self, tag: &str) -> Option<f64>;

    fn weights(&self, tag: &str) -> Option<AdaptiveWeights>;

    fn occurrences(&self, tag: &str) -> u64;

    /// Read-modify-write one tag's state atomically.
    fn update(&self, tag: &str, apply: &mut dyn FnMut(&mut TagState));

    fn snapshot(&self) -> AdaptiveSnapshot;

    /// Replace all state, e.g. from persisted maps at startup.
    fn restore(&self, snapshot: AdaptiveSnapshot);
}

/// `AdaptiveStore` backed by a single `RwLock`ed map
#[derive(Debug, Default)]
pub struct InMemoryAdaptiveStore {
    tags: RwLock<HashMap<String, TagState>>,
}

impl InMemoryAdaptiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: AdaptiveSnapshot) -> Self {
        let store = Self::new();
        store.restore(snapshot);
        store
    }

    pub fn set_threshold(&self, tag: &str, threshold: f64) {
        self.update(tag, &mut |state| state.threshold = Some(threshold));
    }

    pub fn set_weights(&self, tag: &str, weights: AdaptiveWeights) {
        self.update(tag, &mut |state| state.weights = Some(weights.bounded()));
    }
}

impl AdaptiveStore for InMemoryAdaptiveStore {
    fn threshold(&self, tag: &str) -> Option<f64> {
        self.tags.read().get(tag).and_then(|s| s.threshold)
    }

    fn weights(&self, tag: &str) -> Option<AdaptiveWeights> {
        self.tags.read().get(tag).and_then(|s| s.weights)
    }

    fn occurrences(&self, tag: &str) -> u64 {
        self.tags.read().get(tag).map(|s| s.occurrences).unwrap_or(0)
    }

    fn update(&self, tag: &str, apply: &mut dyn FnMut(&mut TagState)) {
        let mut tags = self.tags.write();
        apply(tags.entry(tag.to_string()).or_default());
    }

    fn snapshot(&self) -> AdaptiveSnapshot {
        let tags = self.tags.read();
        let mut snapshot = AdaptiveSnapshot::default();
        for (tag, state) in tags.iter() {
            if let Some(threshold) = state.threshold {
                snapshot.thresholds.insert(tag.clone(), threshold);
            }
            if let Some(weights) = state.weights {
                snapshot.weights.insert(tag.clone(), weights);
            }
            if state.occurrences > 0 {
                snapshot.occurrences.insert(tag.clone(), state.occurrences);
            }
        }
        snapshot
    }

    fn restore(&self, snapshot: AdaptiveSnapshot) {
        let mut tags = HashMap::new();
        for (tag, threshold) in snapshot.thresholds {
            if threshold.is_finite() {
                tags.entry(tag).or_insert_with(TagState::default).threshold = Some(threshold.clamp(0.0, 1.0));
            }
        }
        for (tag, weights) in snapshot.weights {
            tags.entry(tag).or_insert_with(TagState::default).weights = Some(weights.bounded());
        }
        for (tag, count) in snapshot.occurrences {
            tags.entry(tag).or_insert_with(TagState::default).occurrences = count;
        }
        *self.tags.write() = tags;
    }
}

/// Result of counting one occurrence of a tag
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccurrenceOutcome {
    pub count: u64,
    /// True when this occurrence triggered the periodic threshold nudge.
    pub nudged: bool,
    pub threshold: f64,
}

/// Result of an explicit success
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessOutcome {
    pub threshold: f64,
    pub weights: AdaptiveWeights,
}

/// Applies the learning policy to an `AdaptiveStore`
#[derive(Debug, Clone)]
pub struct MetaLearner {
    policy: LearningConfig,
    base_threshold: f64,
    default_weights: AdaptiveWeights,
}

impl MetaLearner {
    pub fn new(policy: LearningConfig, base_threshold: f64, default_weights: AdaptiveWeights) -> Self {
        Self {
            policy,
            base_threshold,
            default_weights,
        }
    }

    /// Effective acceptance threshold for `tag` before length adjustment.
    pub fn threshold(&self, store: &dyn AdaptiveStore, tag: &str) -> f64 {
        store.threshold(tag).unwrap_or(self.base_threshold)
    }

    /// Count one occurrence; every Nth nudges the threshold down.
    pub fn record_occurrence(&self, store: &dyn AdaptiveStore, tag: &str) -> OccurrenceOutcome {
        self.count_occurrence(store, tag, self.policy.occurrence_floor)
    }

    /// A zero period disables the nudge. `floor` bounds the nudged threshold.
    fn count_occurrence(&self, store: &dyn AdaptiveStore, tag: &str, floor: f64) -> OccurrenceOutcome {
        let policy = &self.policy;
        let base = self.base_threshold;
        let mut outcome = OccurrenceOutcome {
            count: 0,
            nudged: false,
            threshold: base,
        };
        store.update(tag, &mut |state| {
            state.occurrences += 1;
            let current = state.threshold.unwrap_or(base);
            let mut threshold = current;
            let nudged = state.occurrences.checked_rem(policy.occurrence_every) == Some(0);
            if nudged {
                threshold = step_down(current, policy.occurrence_step, floor);
                state.threshold = Some(threshold);
            }
            outcome = OccurrenceOutcome {
                count: state.occurrences,
                nudged,
                threshold,
            };
        });
        if outcome.nudged {
            debug!(tag, count = outcome.count, threshold = outcome.threshold, "occurrence threshold nudge");
        }
        outcome
    }

    /// Lower the threshold and shift weights toward keyword evidence.
    pub fn apply_success(&self, store: &dyn AdaptiveStore, tag: &str) -> SuccessOutcome {
        let policy = &self.policy;
        let base = self.base_threshold;
        let defaults = self.default_weights;
        let mut outcome = SuccessOutcome {
            threshold: base,
            weights: defaults,
        };
        store.update(tag, &mut |state| {
            let threshold = step_down(state.threshold.unwrap_or(base), policy.success_step, policy.success_floor);
            let current = state.weights.unwrap_or(defaults);
            let weights = AdaptiveWeights {
                keyword_weight: (current.keyword_weight + policy.keyword_reinforce).min(policy.keyword_cap),
                tfidf_weight: step_down(current.tfidf_weight, policy.tfidf_decay, policy.tfidf_floor),
                pattern_weight: current.pattern_weight,
            }
            .bounded();
            state.threshold = Some(threshold);
            state.weights = Some(weights);
            outcome = SuccessOutcome { threshold, weights };
        });
        debug!(tag, threshold = outcome.threshold, keyword_weight = outcome.weights.keyword_weight, "success reinforced");
        outcome
    }

    /// Occurrence count plus explicit success.
    ///
    /// The occurrence nudge here never takes the threshold below the success
    /// floor, so repeated successes stay at or above it.
    pub fn register_success(&self, store: &dyn AdaptiveStore, tag: &str) -> (OccurrenceOutcome, SuccessOutcome) {
        let floor = self.policy.occurrence_floor.max(self.policy.success_floor);
        let occurrence = self.count_occurrence(store, tag, floor);
        let success = self.apply_success(store, tag);
        (occurrence, success)
    }
}

/// Step `value` down toward `floor` without ever raising it.
fn step_down(value: f64, step: f64, floor: f64) -> f64 {
    if value <= floor {
        value
    } else {
        (value - step).max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResolverConfig, BASE_THRESHOLD};

    fn learner() -> MetaLearner {
        let config = ResolverConfig::default();
        MetaLearner::new(
            config.learning,
            BASE_THRESHOLD,
            AdaptiveWeights::new(0.55, 0.12, 0.20),
        )
    }

    #[test]
    fn test_success_lowers_threshold_and_reinforces_keywords() {
        let store = InMemoryAdaptiveStore::new();
        let outcome = learner().apply_success(&store, "sadness_support");
        assert!((outcome.threshold - 0.38).abs() < 1e-9);
        assert!((outcome.weights.keyword_weight - 0.57).abs() < 1e-9);
        assert!((outcome.weights.tfidf_weight - 0.115).abs() < 1e-9);
        assert_eq!(store.threshold("sadness_support"), Some(outcome.threshold));
        assert_eq!(store.weights("sadness_support"), Some(outcome.weights));
    }

    #[test]
    fn test_explicit_success_floor() {
        let store = InMemoryAdaptiveStore::new();
        let learner = learner();
        let mut previous = learner.threshold(&store, "t");
        for _ in 0..50 {
            let outcome = learner.apply_success(&store, "t");
            assert!(outcome.threshold <= previous);
            assert!(outcome.threshold >= 0.15);
            previous = outcome.threshold;
        }
        assert!((previous - 0.15).abs() < 1e-9);
        let weights = store.weights("t").unwrap();
        assert!((weights.keyword_weight - 0.9).abs() < 1e-9);
        assert!(weights.tfidf_weight >= 0.05);
    }

    #[test]
    fn test_every_tenth_occurrence_nudges() {
        let store = InMemoryAdaptiveStore::new();
        let learner = learner();
        for i in 1..=9 {
            let outcome = learner.record_occurrence(&store, "t");
            assert_eq!(outcome.count, i);
            assert!(!outcome.nudged);
        }
        assert_eq!(store.threshold("t"), None);
        let tenth = learner.record_occurrence(&store, "t");
        assert!(tenth.nudged);
        assert!((tenth.threshold - 0.39).abs() < 1e-9);
    }

    #[test]
    fn test_floor_never_raises_threshold() {
        assert_eq!(step_down(0.13, 0.02, 0.15), 0.13);
        assert_eq!(step_down(0.16, 0.02, 0.15), 0.15);
    }

    #[test]
    fn test_snapshot_restore() {
        let store = InMemoryAdaptiveStore::new();
        let learner = learner();
        learner.register_success(&store, "a");
        learner.record_occurrence(&store, "b");

        let snapshot = store.snapshot();
        assert_eq!(snapshot.occurrences.get("a"), Some(&1));
        assert_eq!(snapshot.occurrences.get("b"), Some(&1));
        assert!(snapshot.thresholds.contains_key("a"));
        assert!(!snapshot.thresholds.contains_key("b"));

        let restored = InMemoryAdaptiveStore::with_snapshot(snapshot.clone());
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_concurrent_successes_do_not_corrupt_state() {
        let store = std::sync::Arc::new(InMemoryAdaptiveStore::new());
        let learner = learner();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let learner = learner.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        learner.register_success(store.as_ref(), "shared");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.occurrences("shared"), 200);
        let threshold = store.threshold("shared").unwrap();
        assert!((0.15..=0.40).contains(&threshold));
    }

    #[test]
    fn test_success_path_respects_success_floor() {
        let store = InMemoryAdaptiveStore::new();
        let learner = learner();
        for _ in 0..30 {
            learner.register_success(&store, "t");
            assert!(store.threshold("t").unwrap() >= 0.15);
        }
        assert_eq!(store.occurrences("t"), 30);
        assert!((store.threshold("t").unwrap() - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_plain_occurrences_use_occurrence_floor() {
        let store = InMemoryAdaptiveStore::new();
        store.set_threshold("t", 0.15);
        let learner = learner();
        for _ in 0..10 {
            learner.record_occurrence(&store, "t");
        }
        assert!((store.threshold("t").unwrap() - 0.14).abs() < 1e-9);
    }

    #[test]
    fn test_zero_occurrence_period_never_nudges() {
        let mut policy = ResolverConfig::default().learning;
        policy.occurrence_every = 0;
        let learner = MetaLearner::new(policy, BASE_THRESHOLD, AdaptiveWeights::new(0.55, 0.12, 0.20));
        let store = InMemoryAdaptiveStore::new();
        for _ in 0..25 {
            let outcome = learner.record_occurrence(&store, "t");
            assert!(!outcome.nudged);
        }
        let (occurrence, success) = learner.register_success(&store, "t");
        assert_eq!(occurrence.count, 26);
        assert!((success.threshold - 0.38).abs() < 1e-9);
    }
}
