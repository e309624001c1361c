//! Candidate ranking: sitelink popularity, label similarity, context overlap.

use std::cmp::Ordering;

use super::Candidate;
use crate::config::ResolverConfig;

/// Levenshtein distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1]: 1 - distance / longer length, case-folded
pub fn label_similarity(query: &str, label: &str) -> f64 {
    let query = fold(query);
    let label = fold(label);
    let longest = query.chars().count().max(label.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&query, &label) as f64 / longest as f64
}

/// Best similarity of the query against a label and its aliases
pub fn best_label_similarity<'a>(query: &str, labels: impl IntoIterator<Item = &'a str>) -> f64 {
    labels
        .into_iter()
        .map(|l| label_similarity(query, l))
        .fold(0.0, f64::max)
}

/// Share of context terms found among the candidate's label/description tokens
pub fn context_overlap(terms: &[String], label: &str, description: Option<&str>) -> f64 {
    let terms: Vec<String> = terms.iter().map(|t| fold(t)).filter(|t| !t.is_empty()).collect();
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", label, description.unwrap_or_default());
    let tokens: Vec<String> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(fold)
        .collect();

    let found = terms
        .iter()
        .filter(|term| {
            // Multi-word terms match as a contiguous token run
            let words: Vec<&str> = term.split_whitespace().collect();
            tokens.windows(words.len()).any(|w| w.iter().zip(&words).all(|(a, b)| a == b))
        })
        .count();
    found as f64 / terms.len() as f64
}

/// `ln(1 + n) / ln(1 + max)`
pub fn sitelinks_norm(count: usize, max: usize) -> f64 {
    if max == 0 {
        return 0.0;
    }
    (1.0 + count as f64).ln() / (1.0 + max as f64).ln()
}

/// Fill in composite ranks and sort best first
pub fn rank(candidates: &mut [Candidate], config: &ResolverConfig) {
    let max_sitelinks = candidates.iter().map(|c| c.sitelink_count).max().unwrap_or(0);
    for candidate in candidates.iter_mut() {
        candidate.composite_rank = config.sitelink_weight * sitelinks_norm(candidate.sitelink_count, max_sitelinks)
            + config.label_weight * candidate.label_match_score
            + config.context_weight * candidate.context_overlap_score;
    }
    candidates.sort_by(compare);
}

/// Composite desc, then sitelinks desc, then shorter label, then identifier
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.composite_rank
        .partial_cmp(&a.composite_rank)
        .unwrap_or(Ordering::Equal)
        .then(b.sitelink_count.cmp(&a.sitelink_count))
        .then(a.display_label.chars().count().cmp(&b.display_label.chars().count()))
        .then_with(|| numeric_id(&a.identifier).cmp(&numeric_id(&b.identifier)))
}

fn numeric_id(id: &str) -> (u64, &str) {
    (id.get(1..).and_then(|n| n.parse().ok()).unwrap_or(u64::MAX), id)
}

fn fold(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
