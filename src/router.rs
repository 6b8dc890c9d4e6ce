//! Intent router - the request path from utterance to decision
//!
//! Holds the current index behind an `Arc` swap, the shared adaptive store and
//! the queued persistence writer. Scoring takes a clone of the index `Arc` and
//! never holds a lock while it works.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::decision::{decide, effective_threshold, resolve_clarification, Decision, PendingClarification, ReviewItem, ReviewQueue};
use crate::error::ResolverResult;
use crate::fusion::fuse;
use crate::index::{load_corpus_dir, IntentIndex};
use crate::learning::{AdaptiveStore, InMemoryAdaptiveStore, MetaLearner, SuccessOutcome};
use crate::lexicon::Lexicon;
use crate::persistence::{load_snapshot, Persistence, PersistenceWriter};
use crate::scorer::{Query, Scorer};
use crate::signals::SignalExtractor;
use crate::types::{
    AdaptiveWeights, ConversationContext, IntentSource, RankedCandidate, ScoredCandidate, Signals, UserAffinityState,
};

/// Everything the reply-composition layer needs from one routed turn
#[derive(Debug, Clone)]
pub struct Routed<P> {
    pub decision: Decision,
    /// Fused candidates, best first.
    pub candidates: Vec<ScoredCandidate>,
    /// Threshold the top candidate was held to, after length adjustment.
    pub effective_threshold: f64,
    /// Payload of the accepted intent.
    pub payload: Option<P>,
    pub mood: Option<String>,
    pub utterance: String,
}

/// Outcome of `IntentRouter::handle_turn`
#[derive(Debug, Clone)]
pub enum TurnOutcome<P> {
    /// The safety check fired; nothing was scored.
    Critical,
    Routed(Routed<P>),
}

/// Routes utterances to intents and learns from the outcomes
pub struct IntentRouter<P = serde_json::Value> {
    config: ResolverConfig,
    lexicon: Lexicon,
    index: RwLock<Arc<IntentIndex<P>>>,
    store: Arc<dyn AdaptiveStore>,
    learner: MetaLearner,
    writer: Option<PersistenceWriter>,
    review: ReviewQueue,
}

impl IntentRouter {
    /// Build from a corpus directory and an optional synonym file.
    pub fn from_corpus_dir(
        dir: impl AsRef<Path>,
        synonyms: Option<&Path>,
        config: ResolverConfig,
    ) -> ResolverResult<Self> {
        config.validate()?;
        let lexicon = match synonyms {
            Some(path) => Lexicon::load(path, config.heuristics.synonym_floor)?,
            None => Lexicon::empty(),
        };
        let sources = load_corpus_dir(dir)?;
        Ok(Self::new(sources, lexicon, config))
    }
}

impl<P: Clone + Send + Sync> IntentRouter<P> {
    pub fn new(sources: Vec<IntentSource<P>>, lexicon: Lexicon, config: ResolverConfig) -> Self {
        let index = IntentIndex::build(sources, &lexicon, &config);
        let scoring = &config.scoring;
        let learner = MetaLearner::new(
            config.learning.clone(),
            config.decision.base_threshold,
            AdaptiveWeights::new(scoring.keyword_weight, scoring.tfidf_weight, scoring.pattern_weight),
        );
        let review = ReviewQueue::new(config.decision.review_capacity);
        Self {
            config,
            lexicon,
            index: RwLock::new(Arc::new(index)),
            store: Arc::new(InMemoryAdaptiveStore::new()),
            learner,
            writer: None,
            review,
        }
    }

    /// Replace the adaptive store, e.g. with one shared across routers.
    pub fn with_store(mut self, store: Arc<dyn AdaptiveStore>) -> Self {
        self.store = store;
        self
    }

    /// Restore adaptive state from `persistence` and queue every later change
    /// back to it. Load failures leave the defaults in place.
    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> ResolverResult<Self> {
        let snapshot = load_snapshot(persistence.as_ref());
        info!(
            thresholds = snapshot.thresholds.len(),
            counters = snapshot.occurrences.len(),
            weights = snapshot.weights.len(),
            "restored adaptive state"
        );
        self.store.restore(snapshot);
        self.writer = Some(PersistenceWriter::new(persistence)?);
        Ok(self)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The current index. Holding the `Arc` keeps it alive across a reload.
    pub fn index(&self) -> Arc<IntentIndex<P>> {
        self.index.read().clone()
    }

    pub fn store(&self) -> &dyn AdaptiveStore {
        self.store.as_ref()
    }

    pub fn review_queue(&self) -> &ReviewQueue {
        &self.review
    }

    /// Rebuild the index from new sources and swap it in atomically.
    pub fn reload(&self, sources: Vec<IntentSource<P>>) {
        let rebuilt = Arc::new(IntentIndex::build(sources, &self.lexicon, &self.config));
        let intents = rebuilt.len();
        *self.index.write() = rebuilt;
        info!(intents, "intent index reloaded");
    }

    /// Ranked candidates for an utterance, without deciding or learning.
    pub fn resolve(
        &self,
        utterance: &str,
        context: &ConversationContext,
        profile: &UserAffinityState,
        top_n: usize,
        min_score: f64,
    ) -> Vec<RankedCandidate> {
        self.resolve_at(utterance, context, profile, top_n, min_score, Utc::now())
    }

    pub fn resolve_at(
        &self,
        utterance: &str,
        context: &ConversationContext,
        profile: &UserAffinityState,
        top_n: usize,
        min_score: f64,
        now: DateTime<Utc>,
    ) -> Vec<RankedCandidate> {
        let index = self.index();
        Scorer::new(&*index, self.store.as_ref(), &self.config).resolve(
            utterance, context, profile, top_n, min_score, now,
        )
    }

    /// `resolve` with the configured default `top_n` and `min_score`.
    pub fn resolve_default(
        &self,
        utterance: &str,
        context: &ConversationContext,
        profile: &UserAffinityState,
    ) -> Vec<RankedCandidate> {
        let decision = &self.config.decision;
        self.resolve(utterance, context, profile, decision.default_top_n, decision.default_min_score)
    }

    /// Score, fuse and decide one turn, then apply the learning policy.
    ///
    /// The top candidate's occurrence is counted after the decision. An
    /// accepted intent runs the success path and is recorded in `profile`.
    /// A fallback turn is queued for review.
    pub fn route(
        &self,
        utterance: &str,
        signals: &Signals,
        context: &ConversationContext,
        profile: &mut UserAffinityState,
        now: DateTime<Utc>,
    ) -> Routed<P> {
        let index = self.index();
        let query = Query::new(utterance);
        let scored = Scorer::new(&*index, self.store.as_ref(), &self.config).score(&query, context, profile, now);
        let candidates = fuse(scored, &*index, signals, context, profile, now, &self.config);

        let (decision, effective) = match candidates.first() {
            Some(top) => {
                let threshold = self.learner.threshold(self.store.as_ref(), &top.tag);
                let effective = effective_threshold(threshold, query.token_count(), &self.config.decision);
                let decision = decide(&candidates, threshold, query.token_count(), now, &self.config.decision);
                debug!(
                    tag = %top.tag,
                    fused_score = top.fused_score,
                    threshold = effective,
                    outcome = decision.label(),
                    "turn decided"
                );
                (decision, effective)
            }
            None => {
                let base = self.config.decision.base_threshold;
                let effective = effective_threshold(base, query.token_count(), &self.config.decision);
                (decide(&[], base, query.token_count(), now, &self.config.decision), effective)
            }
        };

        let mut payload = None;
        match &decision {
            Decision::Accepted { tag, .. } => {
                self.learner.register_success(self.store.as_ref(), tag);
                profile.register_success(tag, now);
                payload = index.get(tag).map(|r| r.payload.clone());
            }
            Decision::Fallback { near_misses } => {
                self.record_top_occurrence(&candidates);
                self.review.push(ReviewItem {
                    utterance: utterance.to_string(),
                    near_misses: near_misses.clone(),
                    at: now,
                });
            }
            Decision::Clarifying { .. } => self.record_top_occurrence(&candidates),
        }
        if candidates.first().is_some() {
            self.persist();
        }

        Routed {
            decision,
            candidates,
            effective_threshold: effective,
            payload,
            mood: signals.mood.clone(),
            utterance: utterance.to_string(),
        }
    }

    /// Full turn handling: safety check, signal extraction, then `route`.
    pub fn handle_turn(
        &self,
        utterance: &str,
        extractor: &dyn SignalExtractor,
        context: &ConversationContext,
        profile: &mut UserAffinityState,
        now: DateTime<Utc>,
    ) -> TurnOutcome<P> {
        if extractor.detect_critical(utterance) {
            info!("critical signal detected, bypassing intent resolution");
            return TurnOutcome::Critical;
        }
        let signals = extractor.signals(utterance);
        TurnOutcome::Routed(self.route(utterance, &signals, context, profile, now))
    }

    /// Commit the option a user picked in reply to a clarification prompt.
    ///
    /// Returns `None` when the reply matches no option or the prompt expired.
    pub fn resolve_pending(
        &self,
        reply: &str,
        pending: &PendingClarification,
        profile: &mut UserAffinityState,
        now: DateTime<Utc>,
    ) -> Option<Decision> {
        let tag = resolve_clarification(reply, pending, now)?;
        let fused_score = pending
            .options
            .iter()
            .find(|o| o.tag == tag)
            .map(|o| o.fused_score)
            .unwrap_or(0.0);
        self.learner.apply_success(self.store.as_ref(), &tag);
        profile.register_success(&tag, now);
        self.persist();
        Some(Decision::Accepted {
            tag,
            fused_score,
            secondary: None,
        })
    }

    /// Explicit success signal from outside a decision, e.g. user feedback.
    ///
    /// Counts an occurrence and runs the success step. Unknown tags are
    /// ignored.
    pub fn confirm_success(
        &self,
        tag: &str,
        profile: &mut UserAffinityState,
        now: DateTime<Utc>,
    ) -> Option<SuccessOutcome> {
        if self.index().get(tag).is_none() {
            warn!(tag, "success confirmed for unknown intent, ignoring");
            return None;
        }
        let (_, success) = self.learner.register_success(self.store.as_ref(), tag);
        profile.register_success(tag, now);
        self.persist();
        Some(success)
    }

    /// Block until queued persistence writes are done.
    pub fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush();
        }
    }

    fn record_top_occurrence(&self, candidates: &[ScoredCandidate]) {
        if let Some(top) = candidates.first() {
            self.learner.record_occurrence(self.store.as_ref(), &top.tag);
        }
    }

    fn persist(&self) {
        if let Some(writer) = &self.writer {
            writer.send(self.store.snapshot());
        }
    }
}
