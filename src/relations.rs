//! Relation linker - auto-populates related intents
//!
//! Pairwise cosine similarity over the TF-IDF vectors; pairs above the
//! threshold are linked in both directions. Quadratic in corpus size, run once
//! per index build.

use crate::index::IntentRecord;
use crate::similarity::cosine_similarity;

/// Link every pair of records whose vectors are more similar than
/// `threshold`. Returns the number of new undirected edges.
pub fn link_related<P>(records: &mut [IntentRecord<P>], threshold: f64) -> usize {
    let mut pairs = Vec::new();
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            let (a, b) = (&records[i], &records[j]);
            let similarity = cosine_similarity(&a.tfidf_vector, a.tfidf_norm, &b.tfidf_vector, b.tfidf_norm);
            if similarity > threshold {
                pairs.push((i, j));
            }
        }
    }

    let mut edges = 0;
    for (i, j) in pairs {
        let tag_i = records[i].tag.clone();
        let tag_j = records[j].tag.clone();
        let inserted = records[i].related_intents.insert(tag_j);
        records[j].related_intents.insert(tag_i);
        if inserted {
            edges += 1;
        }
    }

    // Seeded relations from the source records are made symmetric too.
    let seeded: Vec<(usize, String)> = records
        .iter()
        .enumerate()
        .flat_map(|(i, r)| r.related_intents.iter().map(move |t| (i, t.clone())))
        .collect();
    for (i, target) in seeded {
        let source_tag = records[i].tag.clone();
        if let Some(other) = records.iter_mut().find(|r| r.tag == target) {
            if other.related_intents.insert(source_tag) {
                edges += 1;
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use crate::config::ResolverConfig;
    use crate::index::IntentIndex;
    use crate::lexicon::Lexicon;
    use crate::types::IntentSource;

    #[test]
    fn test_similar_intents_are_linked_symmetrically() {
        let index = IntentIndex::build(
            vec![
                IntentSource::new("sadness_support")
                    .with_keyword("حزين", 1.0)
                    .with_keyword("دموع", 1.0)
                    .with_keyword("وحيد", 1.0),
                IntentSource::new("loneliness_support")
                    .with_keyword("حزين", 1.0)
                    .with_keyword("دموع", 1.0)
                    .with_keyword("وحيد", 1.0)
                    .with_keyword("وحده", 1.0),
                IntentSource::new("joy_celebration").with_keyword("سعيد", 1.0),
            ],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );

        let sad = index.get("sadness_support").unwrap();
        let lonely = index.get("loneliness_support").unwrap();
        let joy = index.get("joy_celebration").unwrap();
        assert!(sad.related_intents.contains("loneliness_support"));
        assert!(lonely.related_intents.contains("sadness_support"));
        assert!(joy.related_intents.is_empty());
        assert!(index.are_related("sadness_support", "loneliness_support"));
    }

    #[test]
    fn test_seeded_relations_become_symmetric() {
        let index = IntentIndex::build(
            vec![
                IntentSource::new("a").with_keyword("قلق", 1.0).with_related("b"),
                IntentSource::new("b").with_keyword("نوم", 1.0),
            ],
            &Lexicon::empty(),
            &ResolverConfig::default(),
        );
        assert!(index.get("b").unwrap().related_intents.contains("a"));
    }
}
