//! Corpus indexer - builds the immutable intent index
//!
//! Tokenizes every record's keyword and pattern text, computes corpus IDF as
//! `ln((N+1)/(df+1)) + 1`, stores a TF-IDF vector per intent and compiles the
//! patterns. The index is built wholesale and never mutated afterwards; hot
//! reload means building a new one and swapping it in.

use ahash::{AHashMap, AHashSet};
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{ResolverError, ResolverResult};
use crate::lexicon::Lexicon;
use crate::relations::link_related;
use crate::similarity::{l2_norm, TermVector};
use crate::text::{content_tokens, fold_arabic, normalize, tokenize};
use crate::types::{IntentSource, Keyword};

/// Prefix marking a pattern as a raw regular expression instead of a literal
pub const RAW_PATTERN_PREFIX: &str = "re:";

/// Keyword weights are kept within (0, MAX_KEYWORD_WEIGHT]
pub const MAX_KEYWORD_WEIGHT: f64 = 2.0;

/// A keyword with its tokens pre-expanded through the synonym table
#[derive(Debug, Clone)]
pub struct IndexedKeyword {
    pub text: String,
    pub weight: f64,
    pub tokens: Vec<String>,
    /// Per token: every form that matches it, with confidence.
    pub expansions: Vec<AHashMap<String, f64>>,
}

/// A compiled, case-insensitive match pattern
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub regex: Regex,
}

/// An indexed intent. Immutable once the index is built.
#[derive(Debug, Clone)]
pub struct IntentRecord<P = serde_json::Value> {
    pub tag: String,
    pub keywords: Vec<IndexedKeyword>,
    pub patterns: Vec<CompiledPattern>,
    pub priority_score: f64,
    pub moods: AHashSet<String>,
    /// Symmetric; seeded from the source and extended by the relation linker.
    pub related_intents: BTreeSet<String>,
    pub tfidf_vector: TermVector,
    /// L2 norm of `tfidf_vector`; 1.0 for an empty vector, never zero.
    pub tfidf_norm: f64,
    /// Every keyword token plus its synonym expansions.
    pub vocabulary: AHashSet<String>,
    pub payload: P,
}

/// Immutable index over the intent corpus
#[derive(Debug, Clone)]
pub struct IntentIndex<P = serde_json::Value> {
    records: Vec<IntentRecord<P>>,
    idf: AHashMap<String, f64>,
    by_tag: AHashMap<String, usize>,
}

impl<P> Default for IntentIndex<P> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            idf: AHashMap::new(),
            by_tag: AHashMap::new(),
        }
    }
}

impl<P> IntentIndex<P> {
    /// Build an index from source records.
    ///
    /// Duplicate tags keep the first record. Bad patterns are dropped with a
    /// warning; the intent keeps the rest.
    pub fn build(sources: Vec<IntentSource<P>>, lexicon: &Lexicon, config: &ResolverConfig) -> Self {
        if sources.is_empty() {
            warn!("building intent index from an empty corpus; every turn will fall back");
            return Self::default();
        }

        let mut seen = AHashSet::new();
        let sources: Vec<IntentSource<P>> = sources
            .into_iter()
            .filter(|s| {
                let fresh = seen.insert(s.tag.clone());
                if !fresh {
                    warn!(tag = %s.tag, "duplicate intent tag, keeping the first record");
                }
                fresh
            })
            .collect();

        // Document frequency over each record's keyword + pattern text.
        let documents: Vec<Vec<String>> = sources.iter().map(document_tokens).collect();
        let mut df: AHashMap<&str, usize> = AHashMap::new();
        for tokens in &documents {
            let unique: AHashSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *df.entry(term).or_insert(0) += 1;
            }
        }
        let n = documents.len() as f64;
        let idf: AHashMap<String, f64> = df
            .iter()
            .map(|(term, count)| (term.to_string(), ((n + 1.0) / (*count as f64 + 1.0)).ln() + 1.0))
            .collect();

        let mut records: Vec<IntentRecord<P>> = sources
            .into_iter()
            .zip(documents.iter())
            .map(|(source, tokens)| index_record(source, tokens, &idf, lexicon))
            .collect();

        let edges = link_related(&mut records, config.scoring.relation_threshold);

        let by_tag = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.tag.clone(), i))
            .collect();

        info!(intents = records.len(), terms = idf.len(), relation_edges = edges, "intent index built");

        Self { records, idf, by_tag }
    }

    pub fn records(&self) -> &[IntentRecord<P>] {
        &self.records
    }

    pub fn get(&self, tag: &str) -> Option<&IntentRecord<P>> {
        self.by_tag.get(tag).map(|&i| &self.records[i])
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when `a` and `b` are the same tag or linked as related.
    pub fn are_related(&self, a: &str, b: &str) -> bool {
        a == b || self.get(a).is_some_and(|r| r.related_intents.contains(b))
    }
}

/// Tokens that make up a record's TF-IDF document.
///
/// Stopwords are dropped unless that would leave nothing.
fn document_tokens<P>(source: &IntentSource<P>) -> Vec<String> {
    let mut tokens = Vec::new();
    for keyword in &source.keywords {
        tokens.extend(tokenize(&keyword.word));
    }
    for pattern in &source.patterns {
        if !pattern.starts_with(RAW_PATTERN_PREFIX) {
            tokens.extend(tokenize(pattern));
        }
    }
    let content = content_tokens(&tokens);
    if content.is_empty() {
        tokens
    } else {
        content
    }
}

fn index_record<P>(
    source: IntentSource<P>,
    tokens: &[String],
    idf: &AHashMap<String, f64>,
    lexicon: &Lexicon,
) -> IntentRecord<P> {
    let mut tfidf_vector = TermVector::new();
    if !tokens.is_empty() {
        let len = tokens.len() as f64;
        for token in tokens {
            *tfidf_vector.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for (term, weight) in tfidf_vector.iter_mut() {
            *weight = *weight / len * idf.get(term).copied().unwrap_or(1.0);
        }
    }
    let norm = l2_norm(&tfidf_vector);
    let tfidf_norm = if norm > 0.0 { norm } else { 1.0 };

    let keywords: Vec<IndexedKeyword> = source
        .keywords
        .iter()
        .filter_map(|k| index_keyword(&source.tag, k, lexicon))
        .collect();

    let vocabulary = keywords
        .iter()
        .flat_map(|k| k.expansions.iter().flat_map(|e| e.keys().cloned()))
        .collect();

    let patterns = source
        .patterns
        .iter()
        .filter_map(|p| match compile_pattern(&source.tag, p) {
            Ok(compiled) => Some(compiled),
            Err(e) => {
                warn!(error = %e, "dropping intent pattern");
                None
            }
        })
        .collect();

    let related_intents = source
        .related_intents
        .iter()
        .filter(|t| **t != source.tag)
        .cloned()
        .collect();

    IntentRecord {
        tag: source.tag,
        keywords,
        patterns,
        priority_score: source.priority.max(0.0),
        moods: source.moods.iter().map(|m| normalize(m)).collect(),
        related_intents,
        tfidf_vector,
        tfidf_norm,
        vocabulary,
        payload: source.payload,
    }
}

fn index_keyword(tag: &str, keyword: &Keyword, lexicon: &Lexicon) -> Option<IndexedKeyword> {
    if !keyword.weight.is_finite() || keyword.weight <= 0.0 {
        warn!(tag, keyword = %keyword.word, weight = keyword.weight, "dropping keyword with non-positive weight");
        return None;
    }
    let tokens = tokenize(&keyword.word);
    if tokens.is_empty() {
        return None;
    }
    let expansions = tokens
        .iter()
        .map(|t| lexicon.expansions(t).into_iter().collect())
        .collect();
    Some(IndexedKeyword {
        text: tokens.join(" "),
        weight: keyword.weight.min(MAX_KEYWORD_WEIGHT),
        tokens,
        expansions,
    })
}

/// Compile a pattern string into a case-insensitive regex.
///
/// Literal patterns are normalized and escaped. `re:` patterns only get the
/// Arabic letter folding, since they run against normalized text too.
pub fn compile_pattern(tag: &str, pattern: &str) -> ResolverResult<CompiledPattern> {
    let expression = match pattern.strip_prefix(RAW_PATTERN_PREFIX) {
        Some(raw) => fold_arabic(raw),
        None => regex::escape(&normalize(pattern)),
    };
    let regex = RegexBuilder::new(&expression)
        .case_insensitive(true)
        .build()
        .map_err(|e| ResolverError::PatternCompile {
            tag: tag.to_string(),
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
    Ok(CompiledPattern {
        source: pattern.to_string(),
        regex,
    })
}

#[derive(Debug, Deserialize)]
struct RecordFields {
    tag: String,
    #[serde(default)]
    nlu: NluFields,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    priority: f64,
    #[serde(default)]
    moods: Vec<String>,
    #[serde(default)]
    related_intents: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NluFields {
    #[serde(default)]
    keywords: Vec<Keyword>,
}

/// Parse one JSON intent record; the whole object becomes the payload.
pub fn parse_record(value: serde_json::Value) -> Result<IntentSource, String> {
    let fields: RecordFields = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    if fields.tag.trim().is_empty() {
        return Err("empty tag".to_string());
    }
    if fields.nlu.keywords.is_empty() && fields.patterns.is_empty() {
        return Err(format!("intent {} has neither keywords nor patterns", fields.tag));
    }
    Ok(IntentSource {
        tag: fields.tag,
        keywords: fields.nlu.keywords,
        patterns: fields.patterns,
        priority: fields.priority,
        moods: fields.moods,
        related_intents: fields.related_intents,
        payload: value,
    })
}

/// Read every `*.json` file in `dir` as one record or an array of records.
///
/// Malformed files and records are skipped with a warning. Only an unreadable
/// directory is an error.
pub fn load_corpus_dir(dir: impl AsRef<Path>) -> ResolverResult<Vec<IntentSource>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir).map_err(|e| ResolverError::CorpusUnreadable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut sources = Vec::new();
    for path in paths {
        match load_corpus_file(&path) {
            Ok(mut records) => sources.append(&mut records),
            Err(e) => warn!(error = %e, "skipping corpus file"),
        }
    }
    debug!(dir = %dir.display(), records = sources.len(), "corpus directory loaded");
    Ok(sources)
}

fn load_corpus_file(path: &Path) -> ResolverResult<Vec<IntentSource>> {
    let malformed = |reason: String| ResolverError::MalformedRecord {
        path: path.to_path_buf(),
        reason,
    };
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw).map_err(|e| malformed(e.to_string()))?;

    match value {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| match parse_record(item) {
                Ok(source) => Some(source),
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "skipping intent record");
                    None
                }
            })
            .collect()),
        other => parse_record(other).map(|s| vec![s]).map_err(malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(tag: &str, words: &[&str]) -> IntentSource {
        words
            .iter()
            .fold(IntentSource::new(tag), |s, w| s.with_keyword(*w, 1.0))
    }

    #[test]
    fn test_idf_is_positive_for_terms_in_every_document() {
        let index = IntentIndex::build(
            vec![source("a", &["مشاعر", "حزين"]), source("b", &["مشاعر", "سعيد"])],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        let shared = index.idf("مشاعر").unwrap();
        let unique = index.idf("حزين").unwrap();
        assert!((shared - 1.0).abs() < 1e-9);
        assert!(unique > shared);
    }

    #[test]
    fn test_norm_floor_for_empty_vectors() {
        let index = IntentIndex::build(
            vec![IntentSource::new("patterns_only").with_pattern("re:^\\d+$")],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        let record = index.get("patterns_only").unwrap();
        assert!(record.tfidf_vector.is_empty());
        assert_eq!(record.tfidf_norm, 1.0);
        assert_eq!(record.patterns.len(), 1);
    }

    #[test]
    fn test_bad_pattern_is_dropped_not_fatal() {
        let index = IntentIndex::build(
            vec![IntentSource::new("greeting")
                .with_keyword("مرحبا", 1.0)
                .with_pattern("re:(unclosed")
                .with_pattern("صباح الخير")],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        let record = index.get("greeting").unwrap();
        assert_eq!(record.patterns.len(), 1);
        assert!(record.patterns[0].regex.is_match("صباح الخير يا صديقي"));
    }

    #[test]
    fn test_literal_patterns_are_escaped_and_case_insensitive() {
        let pattern = compile_pattern("t", "How are you?").unwrap();
        assert!(pattern.regex.is_match("hey, HOW ARE YOU? fine"));
        assert!(!pattern.regex.is_match("how are you"));
    }

    #[test]
    fn test_raw_patterns_match_normalized_arabic() {
        let pattern = compile_pattern("t", r"re:^أنا\s+(زعلانة|حزينٌ)").unwrap();
        assert!(pattern.regex.is_match(&normalize("أنا زعلانة اليوم")));
        assert!(pattern.regex.is_match(&normalize("انا حزين")));
    }

    #[test]
    fn test_duplicate_tags_keep_first() {
        let index = IntentIndex::build(
            vec![source("dup", &["اول"]), source("dup", &["ثاني"])],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("dup").unwrap().keywords[0].text, "اول");
    }

    #[test]
    fn test_keyword_weights_are_bounded() {
        let index = IntentIndex::build(
            vec![IntentSource::new("w")
                .with_keyword("كبير", 5.0)
                .with_keyword("صفر", 0.0)],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        let record = index.get("w").unwrap();
        assert_eq!(record.keywords.len(), 1);
        assert_eq!(record.keywords[0].weight, MAX_KEYWORD_WEIGHT);
    }

    #[test]
    fn test_empty_corpus_builds_empty_index() {
        let index: IntentIndex = IntentIndex::build(Vec::new(), &Lexicon::empty(), &ResolverConfig::default());
        assert!(index.is_empty());
    }

    #[test]
    fn test_parse_record_requires_keywords_or_patterns() {
        let ok = parse_record(serde_json::json!({
            "tag": "sadness_support",
            "nlu": {"keywords": [{"word": "حزين", "weight": 1.0}]},
            "responses": ["انا هنا معك"]
        }))
        .unwrap();
        assert_eq!(ok.keywords.len(), 1);
        assert_eq!(ok.payload["responses"][0], "انا هنا معك");

        assert!(parse_record(serde_json::json!({"tag": "empty"})).is_err());
        assert!(parse_record(serde_json::json!({"nlu": {}})).is_err());
    }
}
