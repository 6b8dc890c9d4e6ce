//! Candidate scorer - weighted-feature scoring of every intent
//!
//! For each intent: synonym-aware keyword evidence, pattern evidence, TF-IDF
//! cosine, conversation-context boost and user-affinity boost, plus small
//! surface-heuristic terms. The full breakdown is kept for explainability.

use chrono::{DateTime, Utc};

use crate::config::ResolverConfig;
use crate::index::{IndexedKeyword, IntentIndex, IntentRecord};
use crate::learning::AdaptiveStore;
use crate::similarity::{cosine_similarity, l2_norm, term_frequencies, TermVector};
use crate::text::{content_tokens, is_emphasis, light_stem, negated_at, normalize, surface_cues, tokenize, SurfaceCues};
use crate::types::{
    ConversationContext, FeatureWeights, RankedCandidate, ScoreBreakdown, ScoredCandidate, UserAffinityState,
};

/// A normalized, tokenized utterance
#[derive(Debug, Clone)]
pub struct Query {
    pub raw: String,
    pub normalized: String,
    /// All tokens, stopwords and negations included.
    pub tokens: Vec<String>,
    /// Term frequencies over content tokens, no IDF.
    pub tf: TermVector,
    pub tf_norm: f64,
    pub cues: SurfaceCues,
}

impl Query {
    pub fn new(raw: &str) -> Self {
        let normalized = normalize(raw);
        let tokens = tokenize(raw);
        let content = content_tokens(&tokens);
        let tf = term_frequencies(if content.is_empty() { &tokens } else { &content });
        let tf_norm = l2_norm(&tf);
        let cues = surface_cues(raw, &tokens);
        Self {
            raw: raw.to_string(),
            normalized,
            tokens,
            tf,
            tf_norm,
            cues,
        }
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Scores utterances against an index using the current adaptive weights
pub struct Scorer<'a, P> {
    index: &'a IntentIndex<P>,
    store: &'a dyn AdaptiveStore,
    config: &'a ResolverConfig,
}

impl<'a, P> Scorer<'a, P> {
    pub fn new(index: &'a IntentIndex<P>, store: &'a dyn AdaptiveStore, config: &'a ResolverConfig) -> Self {
        Self { index, store, config }
    }

    /// Score every intent with any evidence, highest first.
    ///
    /// Ties keep corpus order.
    pub fn score(
        &self,
        query: &Query,
        context: &ConversationContext,
        profile: &UserAffinityState,
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        if query.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<ScoredCandidate> = self
            .index
            .records()
            .iter()
            .filter_map(|record| self.score_record(record, query, context, profile, now))
            .collect();

        scored.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored
    }

    /// Ranked candidates above `min_score`, at most `top_n`.
    pub fn resolve(
        &self,
        utterance: &str,
        context: &ConversationContext,
        profile: &UserAffinityState,
        top_n: usize,
        min_score: f64,
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate> {
        let query = Query::new(utterance);
        self.score(&query, context, profile, now)
            .into_iter()
            .filter(|c| c.raw_score >= min_score)
            .take(top_n)
            .map(RankedCandidate::from)
            .collect()
    }

    fn weights_for(&self, tag: &str) -> FeatureWeights {
        let scoring = &self.config.scoring;
        let mut weights = FeatureWeights {
            keyword: scoring.keyword_weight,
            tfidf: scoring.tfidf_weight,
            pattern: scoring.pattern_weight,
            context: scoring.context_weight,
            adaptive: scoring.adaptive_weight,
        };
        if let Some(adaptive) = self.store.weights(tag) {
            weights.keyword = adaptive.keyword_weight;
            weights.tfidf = adaptive.tfidf_weight;
            weights.pattern = adaptive.pattern_weight;
        }
        weights
    }

    fn score_record(
        &self,
        record: &IntentRecord<P>,
        query: &Query,
        context: &ConversationContext,
        profile: &UserAffinityState,
        now: DateTime<Utc>,
    ) -> Option<ScoredCandidate> {
        let heuristics = &self.config.heuristics;
        let scoring = &self.config.scoring;

        let keywords = self.keyword_evidence(record, query);
        let patterns = self.pattern_evidence(record, query);
        let tfidf = cosine_similarity(&query.tf, query.tf_norm, &record.tfidf_vector, record.tfidf_norm);
        let context_boost = self.context_boost(record, context);

        let lexical_match = keywords.sum > 0.0 || patterns.count > 0;
        if !lexical_match && tfidf <= 0.0 && context_boost <= 0.0 {
            return None;
        }

        let weights = self.weights_for(&record.tag);
        let mut breakdown = ScoreBreakdown {
            keyword: (keywords.sum / 2.0).tanh(),
            pattern: (patterns.count as f64 / 1.5).tanh(),
            tfidf,
            context: context_boost,
            adaptive: profile.affinity(&record.tag, now, scoring.affinity_saturation, scoring.affinity_decay_days),
            weights,
            ..ScoreBreakdown::default()
        };

        if lexical_match {
            let emphasized = query.cues.repeated_exclamation
                || keywords
                    .positions
                    .iter()
                    .any(|&(start, len)| emphasis_near(&query.tokens, start, len, heuristics.emphasis_window));
            if emphasized {
                breakdown.emphasis = heuristics.emphasis_bonus;
            }
            if query.cues.question {
                breakdown.question = heuristics.question_bonus;
            }
            if query.cues.sarcasm {
                breakdown.sarcasm = heuristics.sarcasm_penalty;
            }
        }
        breakdown.priority = record.priority_score.min(10.0) / 10.0 * heuristics.priority_bonus;

        let raw = breakdown.keyword * weights.keyword
            + breakdown.tfidf * weights.tfidf
            + breakdown.pattern * weights.pattern
            + breakdown.context * weights.context
            + breakdown.adaptive * weights.adaptive
            + breakdown.emphasis
            + breakdown.question
            + breakdown.sarcasm
            + breakdown.priority;

        let mut matched_terms = keywords.terms;
        matched_terms.extend(patterns.terms);

        Some(ScoredCandidate::new(record.tag.clone(), raw.clamp(0.0, 1.0), breakdown, matched_terms))
    }

    fn keyword_evidence(&self, record: &IntentRecord<P>, query: &Query) -> KeywordEvidence {
        let window = self.config.heuristics.negation_window;
        let mut evidence = KeywordEvidence::default();
        for keyword in &record.keywords {
            let best = (0..query.tokens.len())
                .filter_map(|start| {
                    self.phrase_confidence(keyword, &query.tokens, start)
                        .map(|confidence| (start, confidence))
                })
                .filter(|&(start, _)| !negated_at(&query.tokens, start, window))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

            if let Some((start, confidence)) = best {
                evidence.sum += keyword.weight * confidence;
                evidence.terms.push(keyword.text.clone());
                evidence.positions.push((start, keyword.tokens.len()));
            }
        }
        evidence
    }

    /// Confidence that `keyword` occurs in `tokens` starting at `start`.
    ///
    /// Each keyword token matches exactly, through a synonym, or after light
    /// proclitic stripping; the phrase takes its weakest token.
    fn phrase_confidence(&self, keyword: &IndexedKeyword, tokens: &[String], start: usize) -> Option<f64> {
        if start + keyword.tokens.len() > tokens.len() {
            return None;
        }
        let stem_confidence = self.config.heuristics.stem_match_confidence;
        keyword
            .expansions
            .iter()
            .zip(&tokens[start..])
            .map(|(forms, token)| {
                forms.get(token.as_str()).copied().or_else(|| {
                    light_stem(token)
                        .and_then(|stem| forms.get(stem))
                        .map(|c| c * stem_confidence)
                })
            })
            .try_fold(1.0f64, |acc, c| c.map(|c| acc.min(c)))
    }

    fn pattern_evidence(&self, record: &IntentRecord<P>, query: &Query) -> PatternEvidence {
        let window = self.config.heuristics.negation_window;
        let mut evidence = PatternEvidence::default();
        for pattern in &record.patterns {
            let hit = pattern.regex.find_iter(&query.normalized).any(|m| {
                let before = tokenize(&query.normalized[..m.start()]);
                !negated_at(&before, before.len(), window)
            });
            if hit {
                evidence.count += 1;
                evidence.terms.push(pattern.source.clone());
            }
        }
        evidence
    }

    /// Recent same-tag or related-tag turns, decayed by age, capped at 1.
    fn context_boost(&self, record: &IntentRecord<P>, context: &ConversationContext) -> f64 {
        let scoring = &self.config.scoring;
        context
            .history
            .iter()
            .map(|turn| {
                let decay = (-scoring.context_decay_rate * turn.age as f64).exp();
                if turn.tag == record.tag {
                    decay
                } else if record.related_intents.contains(&turn.tag) {
                    decay * scoring.related_context_factor
                } else {
                    0.0
                }
            })
            .sum::<f64>()
            .min(1.0)
    }
}

#[derive(Debug, Default)]
struct KeywordEvidence {
    sum: f64,
    terms: Vec<String>,
    /// (start token, token length) of each counted match.
    positions: Vec<(usize, usize)>,
}

#[derive(Debug, Default)]
struct PatternEvidence {
    count: usize,
    terms: Vec<String>,
}

fn emphasis_near(tokens: &[String], start: usize, len: usize, window: usize) -> bool {
    let from = start.saturating_sub(window);
    let to = (start + len + window).min(tokens.len());
    tokens[from..to]
        .iter()
        .enumerate()
        .any(|(i, t)| !(start..start + len).contains(&(from + i)) && is_emphasis(t))
}
