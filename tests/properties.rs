//! Property tests for score bounds, determinism and the learning policy

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use resolver_core::config::{DecisionConfig, LearningConfig, BASE_THRESHOLD};
use resolver_core::decision::decide;
use resolver_core::{
    AdaptiveStore, AdaptiveWeights, ConversationContext, Decision, InMemoryAdaptiveStore, IntentRouter, IntentSource,
    Lexicon, MetaLearner, RecentTurn, ResolverConfig, ScoreBreakdown, ScoredCandidate, Signals, UserAffinityState,
};

const WORDS: &[&str] = &[
    "انا", "حزين", "مكتئب", "سعيد", "وحيد", "جدا", "مش", "لا", "ليش", "صباح", "الخير", "نوم", "قلق", "!!", "?",
    "يعني اكيد", "والحزين", "i", "am", "sad", "not", "happy",
];

fn corpus() -> Vec<IntentSource> {
    vec![
        IntentSource::new("sadness_support")
            .with_keyword("حزين", 1.0)
            .with_keyword("مكتئب", 0.8)
            .with_keyword("sad", 1.0)
            .with_mood("sad"),
        IntentSource::new("joy_celebration")
            .with_keyword("سعيد", 1.0)
            .with_keyword("happy", 1.0)
            .with_mood("happy"),
        IntentSource::new("loneliness_support")
            .with_keyword("وحيد", 1.0)
            .with_keyword("حزين", 0.5)
            .with_priority(8.0),
        IntentSource::new("greeting").with_pattern("صباح الخير"),
        IntentSource::new("sleep_issues")
            .with_keyword("نوم", 2.0)
            .with_keyword("قلق", 1.5)
            .with_priority(25.0),
    ]
}

fn router() -> IntentRouter {
    let lexicon = Lexicon::from_groups(vec![("حزين", vec!["مكتئب", "زعلان"])], 0.6);
    IntentRouter::new(corpus(), lexicon, ResolverConfig::default())
}

fn utterance() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::collection::vec(prop::sample::select(WORDS), 0..12).prop_map(|w| w.join(" ")),
        ".{0,80}",
    ]
}

fn signals() -> impl Strategy<Value = Signals> {
    (
        prop::option::of(prop::sample::select(vec!["sad", "happy", "angry"])),
        prop::collection::vec(prop::sample::select(WORDS), 0..4),
    )
        .prop_map(|(mood, entities)| {
            Signals::new(
                mood.map(str::to_string),
                entities.into_iter().map(str::to_string).collect(),
            )
        })
}

fn candidate(tag: &str, fused: f64) -> ScoredCandidate {
    let mut c = ScoredCandidate::new(tag.to_string(), fused, ScoreBreakdown::default(), Vec::new());
    c.fused_score = fused;
    c
}

proptest! {
    #[test]
    fn fused_scores_stay_in_unit_interval(text in utterance(), signals in signals(), age in 0u32..8, wins in 0u32..30) {
        let router = router();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let mut profile = UserAffinityState::new();
        for _ in 0..wins {
            profile.register_success("sadness_support", now);
        }
        let context = ConversationContext::new(vec![RecentTurn::new("sadness_support", age), RecentTurn::new("loneliness_support", age + 1)]);

        let routed = router.route(&text, &signals, &context, &mut profile, now);
        for c in &routed.candidates {
            prop_assert!((0.0..=1.0).contains(&c.raw_score), "raw {} for {}", c.raw_score, c.tag);
            prop_assert!((0.0..=1.0).contains(&c.fused_score), "fused {} for {}", c.fused_score, c.tag);
        }
    }

    #[test]
    fn resolve_is_deterministic(text in utterance()) {
        let router = router();
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let context = ConversationContext::default();
        let profile = UserAffinityState::new();
        let first = router.resolve_at(&text, &context, &profile, 5, 0.0, now);
        let second = router.resolve_at(&text, &context, &profile, 5, 0.0, now);
        prop_assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            prop_assert_eq!(&a.tag, &b.tag);
            prop_assert_eq!(a.score, b.score);
        }
    }

    #[test]
    fn explicit_successes_never_raise_or_cross_floor(n in 1usize..80) {
        let learner = MetaLearner::new(LearningConfig::default(), BASE_THRESHOLD, AdaptiveWeights::new(0.55, 0.12, 0.20));
        let store = InMemoryAdaptiveStore::new();
        let mut previous = BASE_THRESHOLD;
        for _ in 0..n {
            let outcome = learner.apply_success(&store, "t");
            prop_assert!(outcome.threshold <= previous);
            prop_assert!(outcome.threshold >= 0.15);
            prop_assert!(outcome.weights.keyword_weight <= 0.9);
            prop_assert!(outcome.weights.tfidf_weight >= 0.05);
            previous = outcome.threshold;
        }
    }

    #[test]
    fn combined_success_path_is_monotone(n in 1usize..120) {
        let learner = MetaLearner::new(LearningConfig::default(), BASE_THRESHOLD, AdaptiveWeights::new(0.55, 0.12, 0.20));
        let store = InMemoryAdaptiveStore::new();
        let mut previous = BASE_THRESHOLD;
        for _ in 0..n {
            learner.register_success(&store, "t");
            let threshold = store.threshold("t").unwrap();
            prop_assert!(threshold <= previous);
            prop_assert!(threshold >= 0.15);
            previous = threshold;
        }
        prop_assert_eq!(store.occurrences("t"), n as u64);
    }

    #[test]
    fn close_scores_above_threshold_always_clarify(
        top in 0.40f64..1.0,
        gap in 0.0f64..0.0999,
        tokens in 7usize..30,
    ) {
        let second = top - gap;
        prop_assume!(second >= 0.40);
        let now = Utc::now();
        let decision = decide(
            &[candidate("a", top), candidate("b", second)],
            0.40,
            tokens,
            now,
            &DecisionConfig::default(),
        );
        let is_clarifying = matches!(decision, Decision::Clarifying { .. });
        prop_assert!(is_clarifying);
    }
}
