//! Fusion layer - re-scores the top candidates against auxiliary signals

use chrono::{DateTime, Utc};

use crate::config::ResolverConfig;
use crate::index::{IntentIndex, IntentRecord};
use crate::text::{light_stem, normalize, tokenize};
use crate::types::{ConversationContext, FusionBoosts, ScoredCandidate, Signals, UserAffinityState};

/// Fuse the scorer's top-K candidates with mood, entity, history and profile
/// signals. The result is sorted by fused score; ties keep scorer order.
pub fn fuse<P>(
    mut candidates: Vec<ScoredCandidate>,
    index: &IntentIndex<P>,
    signals: &Signals,
    context: &ConversationContext,
    profile: &UserAffinityState,
    now: DateTime<Utc>,
    config: &ResolverConfig,
) -> Vec<ScoredCandidate> {
    let fusion = &config.fusion;
    candidates.truncate(fusion.top_k);

    let mood = signals.mood.as_deref().map(normalize).filter(|m| !m.is_empty());
    let entities: Vec<Vec<String>> = signals
        .entities
        .iter()
        .map(|e| tokenize(e))
        .filter(|tokens| !tokens.is_empty())
        .collect();

    for candidate in &mut candidates {
        let Some(record) = index.get(&candidate.tag) else {
            continue;
        };
        let scoring = &config.scoring;
        let mut boosts = FusionBoosts {
            mood: mood_match(record, mood.as_deref()),
            entity: entity_match(record, &entities),
            context: history_match(record, context, scoring.context_decay_rate, scoring.related_context_factor),
            user_adaptive: profile.affinity(&record.tag, now, scoring.affinity_saturation, scoring.affinity_decay_days),
            profile: profile_share(profile, &record.tag),
            total: 0.0,
        };
        let weighted = boosts.mood * fusion.mood_match
            + boosts.entity * fusion.entity_match
            + boosts.context * fusion.context_match
            + boosts.user_adaptive * fusion.user_adaptive
            + boosts.profile * fusion.profile_match;
        boosts.total = weighted.min(fusion.max_boost);

        candidate.fused_score = (candidate.raw_score * fusion.base_score + boosts.total).clamp(0.0, 1.0);
        candidate.boosts = boosts;
    }

    // Vec::sort_by is stable.
    candidates.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

fn mood_match<P>(record: &IntentRecord<P>, mood: Option<&str>) -> f64 {
    match mood {
        Some(mood) if record.moods.contains(mood) || record.tag.starts_with(mood) => 1.0,
        _ => 0.0,
    }
}

/// Fraction of detected entities that appear in the intent's vocabulary.
fn entity_match<P>(record: &IntentRecord<P>, entities: &[Vec<String>]) -> f64 {
    if entities.is_empty() {
        return 0.0;
    }
    let hits = entities
        .iter()
        .filter(|tokens| {
            tokens.iter().any(|t| {
                record.vocabulary.contains(t.as_str())
                    || light_stem(t).is_some_and(|stem| record.vocabulary.contains(stem))
            })
        })
        .count();
    hits as f64 / entities.len() as f64
}

/// Decay of the most recent same-tag or related-tag turn.
fn history_match<P>(record: &IntentRecord<P>, context: &ConversationContext, decay_rate: f64, related_factor: f64) -> f64 {
    context
        .history
        .iter()
        .filter_map(|turn| {
            let decay = (-decay_rate * turn.age as f64).exp();
            if turn.tag == record.tag {
                Some(decay)
            } else if record.related_intents.contains(&turn.tag) {
                Some(decay * related_factor)
            } else {
                None
            }
        })
        .fold(0.0, f64::max)
}

/// Share of the user's confirmed successes that went to `tag`.
fn profile_share(profile: &UserAffinityState, tag: &str) -> f64 {
    let total = profile.total_successes();
    if total == 0 {
        return 0.0;
    }
    profile.successes(tag) as f64 / total as f64
}
