//! Vector and string similarity
//!
//! Sparse cosine similarity for TF-IDF vectors and edit distance for synonym
//! confidence.

use ahash::AHashMap;

/// Sparse term → weight vector
pub type TermVector = AHashMap<String, f64>;

/// L2 norm of a sparse vector
pub fn l2_norm(vector: &TermVector) -> f64 {
    vector.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Cosine similarity between two sparse vectors with precomputed norms.
///
/// Iterates the smaller vector. Returns 0.0 when either norm is zero.
pub fn cosine_similarity(a: &TermVector, norm_a: f64, b: &TermVector, norm_b: f64) -> f64 {
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(term, w)| large.get(term).map(|v| w * v))
        .sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Term-frequency vector (count / length) with no IDF weighting
pub fn term_frequencies(tokens: &[String]) -> TermVector {
    let mut tf = TermVector::new();
    if tokens.is_empty() {
        return tf;
    }
    let len = tokens.len() as f64;
    for token in tokens {
        *tf.entry(token.clone()).or_insert(0.0) += 1.0;
    }
    for count in tf.values_mut() {
        *count /= len;
    }
    tf
}

/// Confidence of a synonym group member relative to its canonical form.
///
/// Exact match is 1.0; otherwise the normalized edit distance is mapped onto
/// `[floor, 1.0)` so a member never reaches full confidence.
pub fn synonym_confidence(member: &str, canonical: &str, floor: f64) -> f64 {
    if member == canonical {
        return 1.0;
    }
    let max_len = member.chars().count().max(canonical.chars().count());
    if max_len == 0 {
        return floor;
    }
    let distance = levenshtein(member, canonical).max(1);
    let proximity = 1.0 - distance as f64 / max_len as f64;
    floor + (1.0 - floor) * proximity.max(0.0)
}

/// Levenshtein edit distance over chars
///
/// Two-row dynamic programming, same shape as a space-optimized LCS.
pub fn levenshtein(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    let m = s1_chars.len();
    let n = s2_chars.len();
    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if s1_chars[i - 1] == s2_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
