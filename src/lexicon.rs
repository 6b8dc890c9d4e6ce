//! Synonym groups and token-level match confidence
//!
//! A group maps a canonical key to its member tokens. Each member carries a
//! confidence in (0, 1] derived from its edit distance to the canonical form,
//! so "مكتئب" can stand in for "حزين" at less than full strength.

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::ResolverResult;
use crate::similarity::synonym_confidence;
use crate::text::normalize;

/// One synonym group with per-member confidence
#[derive(Debug, Clone)]
pub struct SynonymGroup {
    pub canonical: String,
    pub members: AHashMap<String, f64>,
}

/// Normalized-token → synonym-group index
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    groups: Vec<SynonymGroup>,
    token_index: AHashMap<String, Vec<(usize, f64)>>,
}

impl Lexicon {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(canonical, members)` pairs.
    ///
    /// Keys and members are normalized; the canonical form is always a member
    /// of its own group. Multi-word members are dropped since matching is
    /// token by token.
    pub fn from_groups<I, S>(groups: I, floor: f64) -> Self
    where
        I: IntoIterator<Item = (S, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut lexicon = Self::default();
        for (canonical, members) in groups {
            let canonical = normalize(canonical.as_ref());
            if canonical.is_empty() || canonical.contains(' ') {
                warn!(group = %canonical, "skipping synonym group with empty or multi-word key");
                continue;
            }

            let mut group = SynonymGroup {
                canonical: canonical.clone(),
                members: AHashMap::new(),
            };
            group.members.insert(canonical.clone(), 1.0);
            for member in members {
                let member = normalize(member.as_ref());
                if member.is_empty() || member.contains(' ') {
                    continue;
                }
                let confidence = synonym_confidence(&member, &canonical, floor);
                group.members.insert(member, confidence);
            }

            let id = lexicon.groups.len();
            for (member, confidence) in &group.members {
                lexicon
                    .token_index
                    .entry(member.clone())
                    .or_default()
                    .push((id, *confidence));
            }
            lexicon.groups.push(group);
        }
        lexicon
    }

    /// Parse a JSON object of `{ "canonical": ["member", ...] }`.
    pub fn from_json_str(raw: &str, floor: f64) -> ResolverResult<Self> {
        let table: BTreeMap<String, Vec<String>> = serde_json::from_str(raw)?;
        Ok(Self::from_groups(table, floor))
    }

    /// Load the synonym table from disk. A missing file yields an empty table.
    pub fn load(path: impl AsRef<Path>, floor: f64) -> ResolverResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "synonym table not found, continuing without synonyms");
            return Ok(Self::empty());
        }
        let raw = std::fs::read_to_string(path)?;
        let lexicon = Self::from_json_str(&raw, floor)?;
        info!(groups = lexicon.groups.len(), tokens = lexicon.token_index.len(), "synonym table loaded");
        Ok(lexicon)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[SynonymGroup] {
        &self.groups
    }

    /// Confidence that two normalized tokens denote the same thing.
    ///
    /// Exact equality is 1.0. Tokens sharing a group match at the product of
    /// their member confidences, taking the best shared group.
    pub fn match_confidence(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        let a_groups = self.token_index.get(a)?;
        let b_groups = self.token_index.get(b)?;
        a_groups
            .iter()
            .flat_map(|(ga, ca)| {
                b_groups
                    .iter()
                    .filter(move |(gb, _)| gb == ga)
                    .map(move |(_, cb)| ca * cb)
            })
            .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))))
    }

    /// Every token reachable from `token` through its groups, with confidence.
    pub fn expansions(&self, token: &str) -> Vec<(String, f64)> {
        let mut out: AHashMap<String, f64> = AHashMap::new();
        out.insert(token.to_string(), 1.0);
        if let Some(groups) = self.token_index.get(token) {
            for (id, own) in groups {
                for (member, conf) in &self.groups[*id].members {
                    let c = own * conf;
                    let entry = out.entry(member.clone()).or_insert(0.0);
                    if c > *entry {
                        *entry = c;
                    }
                }
            }
        }
        let mut expanded: Vec<(String, f64)> = out.into_iter().collect();
        expanded.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        expanded
    }
}
