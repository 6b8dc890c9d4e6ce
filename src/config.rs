//! Tunable constants for scoring, fusion, decision and learning
//!
//! Every section deserializes with `#[serde(default)]`, so a TOML file only
//! needs the keys it overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ResolverError, ResolverResult};

// Default feature weights for the candidate scorer
pub const DEFAULT_KEYWORD_WEIGHT: f64 = 0.55;
pub const DEFAULT_TFIDF_WEIGHT: f64 = 0.12;
pub const DEFAULT_PATTERN_WEIGHT: f64 = 0.20;
pub const DEFAULT_CONTEXT_WEIGHT: f64 = 0.25;
pub const DEFAULT_ADAPTIVE_WEIGHT: f64 = 0.05;

/// Cosine similarity above which two intents are linked as related
pub const RELATION_THRESHOLD: f64 = 0.6;

// Decision policy
pub const BASE_THRESHOLD: f64 = 0.40;
pub const AMBIGUITY_MARGIN: f64 = 0.10;
pub const MULTI_INTENT_THRESHOLD: f64 = 0.55;
pub const VISIBILITY_FLOOR: f64 = 0.05;
pub const MAX_EFFECTIVE_THRESHOLD: f64 = 0.90;
pub const CLARIFICATION_TTL_SECS: i64 = 300;

// Meta-learning policy
pub const SUCCESS_THRESHOLD_STEP: f64 = 0.02;
pub const SUCCESS_THRESHOLD_FLOOR: f64 = 0.15;
pub const OCCURRENCE_NUDGE_EVERY: u64 = 10;
pub const OCCURRENCE_NUDGE_STEP: f64 = 0.01;
pub const OCCURRENCE_THRESHOLD_FLOOR: f64 = 0.12;

/// Top-level configuration for the resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub scoring: ScoringConfig,
    pub fusion: FusionConfig,
    pub decision: DecisionConfig,
    pub learning: LearningConfig,
    pub heuristics: HeuristicsConfig,
}

/// Corpus-wide scorer weights, used when a tag has no adaptive override
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub keyword_weight: f64,
    pub tfidf_weight: f64,
    pub pattern_weight: f64,
    pub context_weight: f64,
    /// Weight of the user-affinity boost inside the raw score.
    pub adaptive_weight: f64,
    /// Decay rate applied per turn of age for context boosts.
    pub context_decay_rate: f64,
    /// Related-tag history counts for this fraction of a same-tag turn.
    pub related_context_factor: f64,
    /// Successes at which the affinity boost saturates.
    pub affinity_saturation: f64,
    /// Days over which the affinity boost decays by a factor of e.
    pub affinity_decay_days: f64,
    pub relation_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keyword_weight: DEFAULT_KEYWORD_WEIGHT,
            tfidf_weight: DEFAULT_TFIDF_WEIGHT,
            pattern_weight: DEFAULT_PATTERN_WEIGHT,
            context_weight: DEFAULT_CONTEXT_WEIGHT,
            adaptive_weight: DEFAULT_ADAPTIVE_WEIGHT,
            context_decay_rate: 0.5,
            related_context_factor: 0.5,
            affinity_saturation: 10.0,
            affinity_decay_days: 30.0,
            relation_threshold: RELATION_THRESHOLD,
        }
    }
}

/// Weights of the auxiliary signals in the fusion layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub top_k: usize,
    pub base_score: f64,
    pub mood_match: f64,
    pub entity_match: f64,
    pub context_match: f64,
    pub user_adaptive: f64,
    pub profile_match: f64,
    /// Cap on the summed boost terms.
    pub max_boost: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            base_score: 0.60,
            mood_match: 0.20,
            entity_match: 0.15,
            context_match: 0.06,
            user_adaptive: 0.05,
            profile_match: 0.18,
            max_boost: 0.45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub base_threshold: f64,
    /// Utterances with at most this many tokens get `very_short_penalty`.
    pub very_short_tokens: usize,
    pub very_short_penalty: f64,
    /// Utterances with at most this many tokens get `short_penalty`.
    pub short_tokens: usize,
    pub short_penalty: f64,
    pub max_threshold: f64,
    pub ambiguity_margin: f64,
    pub multi_intent_threshold: f64,
    pub visibility_floor: f64,
    pub clarification_ttl_secs: i64,
    pub default_top_n: usize,
    pub default_min_score: f64,
    /// Capacity of the offline review queue for fallback turns.
    pub review_capacity: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            base_threshold: BASE_THRESHOLD,
            very_short_tokens: 3,
            very_short_penalty: 0.20,
            short_tokens: 6,
            short_penalty: 0.10,
            max_threshold: MAX_EFFECTIVE_THRESHOLD,
            ambiguity_margin: AMBIGUITY_MARGIN,
            multi_intent_threshold: MULTI_INTENT_THRESHOLD,
            visibility_floor: VISIBILITY_FLOOR,
            clarification_ttl_secs: CLARIFICATION_TTL_SECS,
            default_top_n: 3,
            default_min_score: 0.08,
            review_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub success_step: f64,
    pub success_floor: f64,
    pub occurrence_every: u64,
    pub occurrence_step: f64,
    pub occurrence_floor: f64,
    pub keyword_reinforce: f64,
    pub keyword_cap: f64,
    pub tfidf_decay: f64,
    pub tfidf_floor: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            success_step: SUCCESS_THRESHOLD_STEP,
            success_floor: SUCCESS_THRESHOLD_FLOOR,
            occurrence_every: OCCURRENCE_NUDGE_EVERY,
            occurrence_step: OCCURRENCE_NUDGE_STEP,
            occurrence_floor: OCCURRENCE_THRESHOLD_FLOOR,
            keyword_reinforce: 0.02,
            keyword_cap: 0.9,
            tfidf_decay: 0.005,
            tfidf_floor: 0.05,
        }
    }
}

/// Surface heuristics. These are tuning values and may be recalibrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Tokens before a match searched for a negating word.
    pub negation_window: usize,
    /// Tokens around a match searched for an emphasis word.
    pub emphasis_window: usize,
    pub emphasis_bonus: f64,
    pub question_bonus: f64,
    pub sarcasm_penalty: f64,
    /// Bonus at the maximum priority (10); scales linearly below it.
    pub priority_bonus: f64,
    /// Confidence for a token that only matches after proclitic stripping.
    pub stem_match_confidence: f64,
    /// Lowest confidence a non-canonical synonym member can receive.
    pub synonym_floor: f64,
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            negation_window: 3,
            emphasis_window: 3,
            emphasis_bonus: 0.10,
            question_bonus: 0.05,
            sarcasm_penalty: -0.10,
            priority_bonus: 0.05,
            stem_match_confidence: 0.9,
            synonym_floor: 0.6,
        }
    }
}

impl ResolverConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> ResolverResult<Self> {
        let config: ResolverConfig = toml::from_str(raw).map_err(|e| ResolverError::Config {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ResolverResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would break score boundedness or the decision policy.
    pub fn validate(&self) -> ResolverResult<()> {
        let s = &self.scoring;
        let weights = [
            ("scoring.keyword_weight", s.keyword_weight),
            ("scoring.tfidf_weight", s.tfidf_weight),
            ("scoring.pattern_weight", s.pattern_weight),
            ("scoring.context_weight", s.context_weight),
            ("scoring.adaptive_weight", s.adaptive_weight),
            ("fusion.base_score", self.fusion.base_score),
            ("fusion.mood_match", self.fusion.mood_match),
            ("fusion.entity_match", self.fusion.entity_match),
            ("fusion.context_match", self.fusion.context_match),
            ("fusion.user_adaptive", self.fusion.user_adaptive),
            ("fusion.profile_match", self.fusion.profile_match),
            ("fusion.max_boost", self.fusion.max_boost),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(ResolverError::Config {
                    reason: format!("{name} must be a non-negative number, got {value}"),
                });
            }
        }

        let d = &self.decision;
        let unit = [
            ("decision.base_threshold", d.base_threshold),
            ("decision.max_threshold", d.max_threshold),
            ("decision.ambiguity_margin", d.ambiguity_margin),
            ("decision.multi_intent_threshold", d.multi_intent_threshold),
            ("decision.visibility_floor", d.visibility_floor),
            ("learning.success_floor", self.learning.success_floor),
            ("learning.occurrence_floor", self.learning.occurrence_floor),
            ("scoring.relation_threshold", s.relation_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(ResolverError::Config {
                    reason: format!("{name} must be within [0, 1], got {value}"),
                });
            }
        }

        if self.fusion.top_k == 0 {
            return Err(ResolverError::Config {
                reason: "fusion.top_k must be at least 1".to_string(),
            });
        }
        if self.learning.occurrence_every == 0 {
            return Err(ResolverError::Config {
                reason: "learning.occurrence_every must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
