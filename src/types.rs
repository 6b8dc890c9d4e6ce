//! Core data types for resolution requests and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A weighted keyword in an intent record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyword {
    pub word: String,
    #[serde(default = "default_keyword_weight")]
    pub weight: f64,
}

fn default_keyword_weight() -> f64 {
    1.0
}

impl Keyword {
    pub fn new(word: impl Into<String>, weight: f64) -> Self {
        Self {
            word: word.into(),
            weight,
        }
    }
}

/// Source form of an intent, before indexing
///
/// `payload` is never inspected by the resolver; it travels with the record to
/// whatever composes the reply.
#[derive(Debug, Clone)]
pub struct IntentSource<P = serde_json::Value> {
    pub tag: String,
    pub keywords: Vec<Keyword>,
    pub patterns: Vec<String>,
    pub priority: f64,
    pub moods: Vec<String>,
    pub related_intents: Vec<String>,
    pub payload: P,
}

impl IntentSource {
    /// A record with a null JSON payload; use `with_payload` for other types.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            keywords: Vec::new(),
            patterns: Vec::new(),
            priority: 0.0,
            moods: Vec::new(),
            related_intents: Vec::new(),
            payload: serde_json::Value::Null,
        }
    }
}

impl<P> IntentSource<P> {
    pub fn with_keyword(mut self, word: impl Into<String>, weight: f64) -> Self {
        self.keywords.push(Keyword::new(word, weight));
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.moods.push(mood.into());
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_related(mut self, tag: impl Into<String>) -> Self {
        self.related_intents.push(tag.into());
        self
    }

    pub fn with_payload<Q>(self, payload: Q) -> IntentSource<Q> {
        IntentSource {
            tag: self.tag,
            keywords: self.keywords,
            patterns: self.patterns,
            priority: self.priority,
            moods: self.moods,
            related_intents: self.related_intents,
            payload,
        }
    }
}

/// Per-feature contributions to a candidate's raw score
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    /// Squashed keyword evidence in [0, 1), before weighting.
    pub keyword: f64,
    /// Squashed pattern evidence in [0, 1), before weighting.
    pub pattern: f64,
    /// Cosine similarity between query TF and intent TF-IDF vectors.
    pub tfidf: f64,
    /// Recency-decayed history boost in [0, 1].
    pub context: f64,
    /// User-affinity boost in [0, 1].
    pub adaptive: f64,
    pub emphasis: f64,
    pub question: f64,
    pub sarcasm: f64,
    pub priority: f64,
    /// Weights actually used for this tag.
    pub weights: FeatureWeights,
}

/// Weights applied to the scorer's features
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureWeights {
    pub keyword: f64,
    pub tfidf: f64,
    pub pattern: f64,
    pub context: f64,
    pub adaptive: f64,
}

/// Boost terms added by the fusion layer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FusionBoosts {
    pub mood: f64,
    pub entity: f64,
    pub context: f64,
    pub user_adaptive: f64,
    pub profile: f64,
    /// Weighted sum after the max-boost cap.
    pub total: f64,
}

/// A candidate intent for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub tag: String,
    pub raw_score: f64,
    pub breakdown: ScoreBreakdown,
    /// Equals `raw_score` until the fusion layer runs.
    pub fused_score: f64,
    pub boosts: FusionBoosts,
    pub matched_terms: Vec<String>,
}

impl ScoredCandidate {
    pub fn new(tag: String, raw_score: f64, breakdown: ScoreBreakdown, matched_terms: Vec<String>) -> Self {
        Self {
            tag,
            raw_score,
            breakdown,
            fused_score: raw_score,
            boosts: FusionBoosts::default(),
            matched_terms,
        }
    }
}

/// Public ranking entry returned by `resolve`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub tag: String,
    pub score: f64,
    pub matched_terms: Vec<String>,
    pub score_breakdown: ScoreBreakdown,
}

impl From<ScoredCandidate> for RankedCandidate {
    fn from(candidate: ScoredCandidate) -> Self {
        Self {
            tag: candidate.tag,
            score: candidate.raw_score,
            matched_terms: candidate.matched_terms,
            score_breakdown: candidate.breakdown,
        }
    }
}

/// One turn of recent conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentTurn {
    pub tag: String,
    pub mood: Option<String>,
    /// Turns ago; 0 is the previous turn.
    pub age: u32,
}

impl RecentTurn {
    pub fn new(tag: impl Into<String>, age: u32) -> Self {
        Self {
            tag: tag.into(),
            mood: None,
            age,
        }
    }
}

/// Short conversation window supplied by the session layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    pub history: Vec<RecentTurn>,
}

impl ConversationContext {
    pub fn new(history: Vec<RecentTurn>) -> Self {
        Self { history }
    }
}

/// Per-user success history used for personalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAffinityState {
    pub success_counts: HashMap<String, u32>,
    pub last_success: HashMap<String, DateTime<Utc>>,
}

impl UserAffinityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed success for `tag` at `now`.
    pub fn register_success(&mut self, tag: &str, now: DateTime<Utc>) {
        *self.success_counts.entry(tag.to_string()).or_insert(0) += 1;
        self.last_success.insert(tag.to_string(), now);
    }

    pub fn successes(&self, tag: &str) -> u32 {
        self.success_counts.get(tag).copied().unwrap_or(0)
    }

    pub fn total_successes(&self) -> u32 {
        self.success_counts.values().sum()
    }

    /// Affinity in [0, 1]: saturating success count decayed by days since the
    /// last success.
    pub fn affinity(&self, tag: &str, now: DateTime<Utc>, saturation: f64, decay_days: f64) -> f64 {
        let count = self.successes(tag);
        if count == 0 || saturation <= 0.0 {
            return 0.0;
        }
        let strength = (count as f64 / saturation).min(1.0);
        let days = self
            .last_success
            .get(tag)
            .map(|last| (now - *last).num_seconds().max(0) as f64 / 86_400.0)
            .unwrap_or(0.0);
        let decay = if decay_days > 0.0 { (-days / decay_days).exp() } else { 1.0 };
        (strength * decay).clamp(0.0, 1.0)
    }
}

/// Signals produced outside this crate by the text-signal extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Signals {
    pub mood: Option<String>,
    pub entities: Vec<String>,
}

impl Signals {
    pub fn new(mood: Option<String>, entities: Vec<String>) -> Self {
        Self { mood, entities }
    }
}

/// Per-tag override of the scorer's keyword/TF-IDF/pattern weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AdaptiveWeights {
    pub keyword_weight: f64,
    pub tfidf_weight: f64,
    pub pattern_weight: f64,
}

impl AdaptiveWeights {
    pub const KEYWORD_RANGE: (f64, f64) = (0.05, 0.9);
    pub const TFIDF_RANGE: (f64, f64) = (0.05, 0.5);
    pub const PATTERN_RANGE: (f64, f64) = (0.05, 0.6);

    pub fn new(keyword_weight: f64, tfidf_weight: f64, pattern_weight: f64) -> Self {
        Self {
            keyword_weight,
            tfidf_weight,
            pattern_weight,
        }
        .bounded()
    }

    /// Clamp every weight into its safe range.
    pub fn bounded(self) -> Self {
        Self {
            keyword_weight: clamp_range(self.keyword_weight, Self::KEYWORD_RANGE),
            tfidf_weight: clamp_range(self.tfidf_weight, Self::TFIDF_RANGE),
            pattern_weight: clamp_range(self.pattern_weight, Self::PATTERN_RANGE),
        }
    }
}

fn clamp_range(value: f64, (low, high): (f64, f64)) -> f64 {
    if value.is_finite() {
        value.clamp(low, high)
    } else {
        low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_keyword_weight_defaults_to_one() {
        let keyword: Keyword = serde_json::from_str(r#"{"word": "حزين"}"#).unwrap();
        assert_eq!(keyword.weight, 1.0);
    }

    #[test]
    fn test_affinity_saturates_and_decays() {
        let now = Utc::now();
        let mut profile = UserAffinityState::new();
        for _ in 0..20 {
            profile.register_success("sadness_support", now);
        }
        assert!((profile.affinity("sadness_support", now, 10.0, 30.0) - 1.0).abs() < 1e-9);

        let later = now + Duration::days(30);
        let decayed = profile.affinity("sadness_support", later, 10.0, 30.0);
        assert!((decayed - (-1.0f64).exp()).abs() < 1e-6);
        assert_eq!(profile.affinity("unknown", now, 10.0, 30.0), 0.0);
    }

    #[test]
    fn test_adaptive_weights_are_bounded() {
        let weights = AdaptiveWeights::new(3.0, -1.0, f64::NAN);
        assert_eq!(weights.keyword_weight, 0.9);
        assert_eq!(weights.tfidf_weight, 0.05);
        assert_eq!(weights.pattern_weight, 0.05);
    }
}
