//! Decision state machine - accept, clarify or fall back
//!
//! A turn ends in exactly one of `Accepted`, `Clarifying` or `Fallback`. A
//! secondary-topic suggestion is an annotation on `Accepted`, never a state of
//! its own.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::config::DecisionConfig;
use crate::text::normalize;
use crate::types::ScoredCandidate;

/// A different intent that also cleared the multi-intent threshold
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecondarySuggestion {
    pub tag: String,
    pub fused_score: f64,
}

/// One enumerated choice in a clarification prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClarifyOption {
    pub tag: String,
    pub prompt_text: String,
    pub fused_score: f64,
}

/// Diagnostic entry for a fallback turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearMiss {
    pub tag: String,
    pub fused_score: f64,
}

/// An awaiting-clarification state, held by the session between turns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingClarification {
    pub options: Vec<ClarifyOption>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingClarification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Terminal outcome of one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    Accepted {
        tag: String,
        fused_score: f64,
        secondary: Option<SecondarySuggestion>,
    },
    Clarifying {
        options: Vec<ClarifyOption>,
        pending: PendingClarification,
    },
    Fallback {
        near_misses: Vec<NearMiss>,
    },
}

impl Decision {
    /// The committed tag, if any.
    pub fn accepted_tag(&self) -> Option<&str> {
        match self {
            Decision::Accepted { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Accepted { .. } => "accepted",
            Decision::Clarifying { .. } => "clarifying",
            Decision::Fallback { .. } => "fallback",
        }
    }
}

/// Raise `threshold` for terse input, never above the configured ceiling.
pub fn effective_threshold(threshold: f64, token_count: usize, policy: &DecisionConfig) -> f64 {
    let penalty = if token_count <= policy.very_short_tokens {
        policy.very_short_penalty
    } else if token_count <= policy.short_tokens {
        policy.short_penalty
    } else {
        0.0
    };
    if penalty <= 0.0 {
        return threshold;
    }
    (threshold + penalty).min(policy.max_threshold).max(threshold)
}

/// Decide a turn from fused candidates sorted best first.
///
/// `threshold` is the top candidate's stored threshold before length
/// adjustment.
pub fn decide(
    candidates: &[ScoredCandidate],
    threshold: f64,
    token_count: usize,
    now: DateTime<Utc>,
    policy: &DecisionConfig,
) -> Decision {
    let Some(top) = candidates.first() else {
        return Decision::Fallback { near_misses: Vec::new() };
    };
    let effective = effective_threshold(threshold, token_count, policy);

    if top.fused_score < effective {
        return Decision::Fallback {
            near_misses: near_misses(candidates, policy.visibility_floor),
        };
    }

    if let Some(second) = candidates.get(1) {
        if top.fused_score - second.fused_score < policy.ambiguity_margin {
            let options: Vec<ClarifyOption> = [top, second].into_iter().map(clarify_option).collect();
            let pending = PendingClarification {
                options: options.clone(),
                created_at: now,
                expires_at: now + Duration::seconds(policy.clarification_ttl_secs),
            };
            return Decision::Clarifying { options, pending };
        }
    }

    let secondary = candidates
        .iter()
        .skip(1)
        .find(|c| c.tag != top.tag && c.fused_score >= policy.multi_intent_threshold)
        .map(|c| SecondarySuggestion {
            tag: c.tag.clone(),
            fused_score: c.fused_score,
        });

    Decision::Accepted {
        tag: top.tag.clone(),
        fused_score: top.fused_score,
        secondary,
    }
}

fn near_misses(candidates: &[ScoredCandidate], floor: f64) -> Vec<NearMiss> {
    candidates
        .iter()
        .filter(|c| c.fused_score >= floor)
        .map(|c| NearMiss {
            tag: c.tag.clone(),
            fused_score: c.fused_score,
        })
        .collect()
}

fn clarify_option(candidate: &ScoredCandidate) -> ClarifyOption {
    ClarifyOption {
        tag: candidate.tag.clone(),
        prompt_text: candidate.tag.replace(['_', '-'], " "),
        fused_score: candidate.fused_score,
    }
}

/// Map a user's reply to one of the pending options.
///
/// Accepts a 1-based ordinal in ASCII or Arabic-Indic digits, or a reply that
/// names an option. Expired states resolve to nothing.
pub fn resolve_clarification(reply: &str, pending: &PendingClarification, now: DateTime<Utc>) -> Option<String> {
    if pending.is_expired(now) {
        return None;
    }
    let reply = reply.trim();
    if let Some(ordinal) = parse_ordinal(reply) {
        return ordinal
            .checked_sub(1)
            .and_then(|i| pending.options.get(i))
            .map(|o| o.tag.clone());
    }

    let normalized = normalize(reply);
    if normalized.is_empty() {
        return None;
    }
    pending
        .options
        .iter()
        .find(|o| {
            let tag = normalize(&o.tag);
            let prompt = normalize(&o.prompt_text);
            !tag.is_empty() && (normalized == tag || normalized.contains(&prompt) || normalized.contains(&tag))
        })
        .map(|o| o.tag.clone())
}

fn parse_ordinal(reply: &str) -> Option<usize> {
    let digits: String = reply
        .chars()
        .map(|c| match c {
            '\u{0660}'..='\u{0669}' => char::from(b'0' + (c as u32 - 0x0660) as u8),
            '\u{06F0}'..='\u{06F9}' => char::from(b'0' + (c as u32 - 0x06F0) as u8),
            _ => c,
        })
        .collect();
    digits.trim_end_matches(['.', ')']).parse().ok()
}

/// A fallback turn kept for offline review
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReviewItem {
    pub utterance: String,
    pub near_misses: Vec<NearMiss>,
    pub at: DateTime<Utc>,
}

/// Bounded queue of fallback turns; the oldest entry is dropped when full
#[derive(Debug)]
pub struct ReviewQueue {
    items: Mutex<VecDeque<ReviewItem>>,
    capacity: usize,
}

impl ReviewQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, item: ReviewItem) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Take every queued item, oldest first.
    pub fn drain(&self) -> Vec<ReviewItem> {
        self.items.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScoreBreakdown;

    fn candidate(tag: &str, fused: f64) -> ScoredCandidate {
        let mut c = ScoredCandidate::new(tag.to_string(), fused, ScoreBreakdown::default(), Vec::new());
        c.fused_score = fused;
        c
    }

    fn policy() -> DecisionConfig {
        DecisionConfig::default()
    }

    #[test]
    fn test_short_input_raises_threshold() {
        let p = policy();
        assert!((effective_threshold(0.40, 2, &p) - 0.60).abs() < 1e-9);
        assert!((effective_threshold(0.40, 5, &p) - 0.50).abs() < 1e-9);
        assert_eq!(effective_threshold(0.40, 12, &p), 0.40);
        assert!((effective_threshold(0.85, 1, &p) - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_borderline_short_input_falls_back() {
        let now = Utc::now();
        let decision = decide(&[candidate("sadness_support", 0.45)], 0.40, 2, now, &policy());
        match decision {
            Decision::Fallback { near_misses } => {
                assert_eq!(near_misses.len(), 1);
                assert_eq!(near_misses[0].tag, "sadness_support");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        // The same score clears the threshold on a longer utterance.
        let long = decide(&[candidate("sadness_support", 0.45)], 0.40, 8, now, &policy());
        assert_eq!(long.accepted_tag(), Some("sadness_support"));
    }

    #[test]
    fn test_close_second_clarifies() {
        let now = Utc::now();
        let decision = decide(
            &[candidate("sadness_support", 0.72), candidate("loneliness_support", 0.66)],
            0.40,
            8,
            now,
            &policy(),
        );
        match decision {
            Decision::Clarifying { options, pending } => {
                assert_eq!(options.len(), 2);
                assert_eq!(options[0].tag, "sadness_support");
                assert_eq!(pending.expires_at - pending.created_at, Duration::minutes(5));
            }
            other => panic!("expected clarifying, got {other:?}"),
        }
    }

    #[test]
    fn test_secondary_suggestion_annotates_acceptance() {
        let decision = decide(
            &[candidate("sadness_support", 0.85), candidate("sleep_issues", 0.58)],
            0.40,
            8,
            Utc::now(),
            &policy(),
        );
        match decision {
            Decision::Accepted { tag, secondary, .. } => {
                assert_eq!(tag, "sadness_support");
                assert_eq!(secondary.map(|s| s.tag).as_deref(), Some("sleep_issues"));
            }
            other => panic!("expected accepted, got {other:?}"),
        }

        let plain = decide(
            &[candidate("sadness_support", 0.85), candidate("sleep_issues", 0.30)],
            0.40,
            8,
            Utc::now(),
            &policy(),
        );
        assert!(matches!(plain, Decision::Accepted { secondary: None, .. }));
    }

    #[test]
    fn test_no_candidates_is_empty_fallback() {
        let decision = decide(&[], 0.40, 4, Utc::now(), &policy());
        assert_eq!(decision, Decision::Fallback { near_misses: Vec::new() });
    }

    #[test]
    fn test_near_misses_respect_visibility_floor() {
        let decision = decide(
            &[candidate("a", 0.20), candidate("b", 0.04)],
            0.40,
            8,
            Utc::now(),
            &policy(),
        );
        match decision {
            Decision::Fallback { near_misses } => {
                assert_eq!(near_misses.len(), 1);
                assert_eq!(near_misses[0].tag, "a");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
    }

    fn pending(now: DateTime<Utc>) -> PendingClarification {
        match decide(
            &[candidate("sadness_support", 0.72), candidate("loneliness_support", 0.70)],
            0.40,
            8,
            now,
            &policy(),
        ) {
            Decision::Clarifying { pending, .. } => pending,
            other => panic!("expected clarifying, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_clarification_by_ordinal() {
        let now = Utc::now();
        let pending = pending(now);
        assert_eq!(resolve_clarification("1", &pending, now).as_deref(), Some("sadness_support"));
        assert_eq!(resolve_clarification("٢", &pending, now).as_deref(), Some("loneliness_support"));
        assert_eq!(resolve_clarification("3", &pending, now), None);
        assert_eq!(resolve_clarification("0", &pending, now), None);
    }

    #[test]
    fn test_resolve_clarification_by_name() {
        let now = Utc::now();
        let pending = pending(now);
        assert_eq!(
            resolve_clarification("loneliness support please", &pending, now).as_deref(),
            Some("loneliness_support")
        );
        assert_eq!(resolve_clarification("something else", &pending, now), None);
    }

    #[test]
    fn test_expired_clarification_resolves_nothing() {
        let now = Utc::now();
        let pending = pending(now);
        let later = now + Duration::minutes(6);
        assert_eq!(resolve_clarification("1", &pending, later), None);
    }

    #[test]
    fn test_review_queue_drops_oldest() {
        let queue = ReviewQueue::new(2);
        for text in ["a", "b", "c"] {
            queue.push(ReviewItem {
                utterance: text.to_string(),
                near_misses: Vec::new(),
                at: Utc::now(),
            });
        }
        let drained = queue.drain();
        assert_eq!(drained.iter().map(|i| i.utterance.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(queue.is_empty());
    }
}
