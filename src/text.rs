//! Text normalization and tokenization
//!
//! Arabic-aware normalization (diacritics, alef/ya/ta-marbuta folding) plus the
//! small fixed lexicons the scorer's surface heuristics rely on.

use ahash::AHashSet;
use std::sync::LazyLock;

static STOPWORDS: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    [
        // Arabic pronouns, particles and prepositions (normalized forms)
        "انا", "انت", "انتي", "هو", "هي", "نحن", "احنا", "هم", "في", "من", "على", "عن",
        "الى", "الي", "مع", "و", "او", "ثم", "هذا", "هذه", "هاد", "هاي", "ذلك", "اللي",
        "الذي", "التي", "كان", "كانت", "يا", "بس", "عند", "كل", "قد", "لقد", "ان", "اذا",
        "جدا", "كتير", "كثير", "مره", "شوي", "شويه",
        // English function words
        "i", "im", "me", "my", "you", "your", "we", "it", "is", "am", "are", "was", "the",
        "a", "an", "and", "or", "to", "of", "in", "on", "at", "for", "with", "this", "that",
        "very", "so", "really", "just",
    ]
    .into_iter()
    .collect()
});

static NEGATIONS: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    [
        "مش", "مو", "ما", "لا", "لم", "لن", "ليس", "لست", "ليست", "مب", "موب", "مافي",
        "ماني", "مانيش", "بدون", "غير", "not", "no", "never", "dont", "don't", "isnt",
        "isn't", "without",
    ]
    .into_iter()
    .collect()
});

static EMPHASIS: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    [
        "جدا", "كتير", "كثير", "مره", "مرا", "بجد", "حيل", "وايد", "اوي", "خالص", "تماما",
        "very", "really", "so", "extremely", "totally",
    ]
    .into_iter()
    .collect()
});

static INTERROGATIVES: LazyLock<AHashSet<&'static str>> = LazyLock::new(|| {
    [
        "هل", "ليش", "لماذا", "ليه", "كيف", "كيفك", "شو", "ايش", "وش", "متى", "وين", "اين",
        "مين", "ماذا", "كم", "what", "why", "how", "when", "where", "who", "which",
    ]
    .into_iter()
    .collect()
});

static SARCASM_MARKERS: &[&str] = &["يعني اكيد", "اكيد طبعا", "ولا يهمك", "yeah right", "sure sure", "🙄", "😒"];

/// Proclitics stripped for the light-stem fallback match, longest first
const PROCLITICS: &[&str] = &["وال", "بال", "فال", "كال", "لل", "ال", "و", "ف", "ب", "ل"];

/// Normalize text for matching.
///
/// Strips tashkeel and tatweel, folds alef/ya/waw/ta-marbuta variants, maps
/// general punctuation to spaces, lowercases Latin and collapses whitespace.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().filter_map(fold_letter) {
        match c {
            '\u{2000}'..='\u{206F}' | '\u{2E00}'..='\u{2E7F}' => out.push(' '),
            _ => out.extend(c.to_lowercase()),
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Apply only the Arabic letter folding of `normalize`.
///
/// Leaves ASCII, case and spacing alone, so it is safe on regex source.
pub fn fold_arabic(text: &str) -> String {
    text.chars().filter_map(fold_letter).collect()
}

fn fold_letter(c: char) -> Option<char> {
    match c {
        '\u{064B}'..='\u{0652}' | '\u{0640}' => None,
        'إ' | 'أ' | 'آ' | 'ٱ' => Some('ا'),
        'ى' | 'ئ' => Some('ي'),
        'ؤ' => Some('و'),
        'ة' => Some('ه'),
        _ => Some(c),
    }
}

/// Split normalized text into word tokens.
///
/// Anything that is not alphanumeric separates tokens, except apostrophes
/// inside Latin contractions ("don't").
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokens with stopwords removed, used for TF-IDF vectors.
pub fn content_tokens(tokens: &[String]) -> Vec<String> {
    tokens
        .iter()
        .filter(|t| !is_stopword(t))
        .cloned()
        .collect()
}

pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

pub fn is_negation(token: &str) -> bool {
    NEGATIONS.contains(token)
}

pub fn is_emphasis(token: &str) -> bool {
    EMPHASIS.contains(token)
}

pub fn is_interrogative(token: &str) -> bool {
    INTERROGATIVES.contains(token)
}

/// Strip one leading proclitic, keeping at least two letters of stem.
pub fn light_stem(token: &str) -> Option<&str> {
    PROCLITICS.iter().find_map(|prefix| {
        token
            .strip_prefix(prefix)
            .filter(|rest| rest.chars().count() >= 2)
    })
}

/// True when any of the `window` tokens before `position` negates it.
pub fn negated_at(tokens: &[String], position: usize, window: usize) -> bool {
    let start = position.saturating_sub(window);
    tokens[start..position.min(tokens.len())]
        .iter()
        .any(|t| is_negation(t))
}

/// Surface cues read from the raw utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurfaceCues {
    pub repeated_exclamation: bool,
    pub question: bool,
    pub sarcasm: bool,
}

pub fn surface_cues(raw: &str, tokens: &[String]) -> SurfaceCues {
    let lowered = normalize(raw);
    SurfaceCues {
        repeated_exclamation: raw.contains("!!"),
        question: raw.contains('?')
            || raw.contains('؟')
            || tokens.first().is_some_and(|t| is_interrogative(t)),
        sarcasm: SARCASM_MARKERS.iter().any(|m| lowered.contains(&normalize(m))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_folds_arabic_variants() {
        assert_eq!(normalize("أنا  حزينٌ"), "انا حزين");
        assert_eq!(normalize("مكتئب"), "مكتيب");
        assert_eq!(normalize("مدرسة"), "مدرسه");
        assert_eq!(normalize("Hello World"), "hello world");
    }

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("أنا حزين، جدا!"), vec!["انا", "حزين", "جدا"]);
        assert_eq!(tokenize("I don't know?"), vec!["i", "don't", "know"]);
    }

    #[test]
    fn test_content_tokens_drop_stopwords() {
        let tokens = tokenize("أنا حزين جدا");
        assert_eq!(content_tokens(&tokens), vec!["حزين"]);
    }

    #[test]
    fn test_negation_window() {
        let tokens = tokenize("مش حزين");
        assert!(negated_at(&tokens, 1, 3));
        let tokens = tokenize("مش عارف ليش انا كتير حزين");
        assert!(!negated_at(&tokens, 5, 3));
    }

    #[test]
    fn test_light_stem() {
        assert_eq!(light_stem("والحزين"), Some("حزين"));
        assert_eq!(light_stem("حزين"), None);
        assert_eq!(light_stem("ال"), None);
    }

    #[test]
    fn test_surface_cues() {
        let tokens = tokenize("ليش كذا؟");
        let cues = surface_cues("ليش كذا؟", &tokens);
        assert!(cues.question);
        assert!(!cues.sarcasm);
        assert!(surface_cues("great!!", &tokenize("great!!")).repeated_exclamation);
    }

    #[test]
    fn test_leading_min_is_not_a_question() {
        let text = "من الشغل رجعت تعبان";
        assert!(!surface_cues(text, &tokenize(text)).question);
        assert!(surface_cues("مين انت", &tokenize("مين انت")).question);
        assert!(surface_cues("من انت؟", &tokenize("من انت؟")).question);
    }

    #[test]
    fn test_fold_arabic_keeps_regex_syntax() {
        assert_eq!(fold_arabic(r"^أنا\s+(زعلانة|حزينٌ)$"), r"^انا\s+(زعلانه|حزين)$");
        assert_eq!(fold_arabic(r"\S+ Word"), r"\S+ Word");
    }
}
