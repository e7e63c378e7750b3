//! Lexical memory retrieval: episodic summaries and overlap ranking.
//!
//! Pure functions over caller-supplied snippets. The logs themselves are
//! owned by the run store; these helpers only score and summarize.

use std::collections::{BTreeSet, HashMap};

fn tokenize(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| ".,:;!?()[]{}\"'".contains(c))
                .to_lowercase()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Summarize episodic events as their `limit` most frequent tokens,
/// comma-joined. Ties keep first-seen order so the summary is deterministic.
pub fn episodic_summary(events: &[String], limit: usize) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for event in events {
        for token in tokenize(event) {
            let count = counts.entry(token.clone()).or_insert(0);
            if *count == 0 {
                order.push(token);
            }
            *count += 1;
        }
    }

    let mut ranked: Vec<(usize, &String)> = order.iter().enumerate().collect();
    ranked.sort_by(|a, b| counts[b.1].cmp(&counts[a.1]).then(a.0.cmp(&b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(_, token)| token.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Rank `docs` against `query` by Jaccard similarity of their token sets and
/// return the top `k` with a nonzero score.
///
/// The sort is stable: ties preserve the original document order. The union
/// size is floored at 1 so empty inputs never divide by zero.
pub fn semantic_rank(query: &str, docs: &[String], k: usize) -> Vec<String> {
    let query_tokens = tokenize(query);
    let mut scored: Vec<(f64, &String)> = docs
        .iter()
        .map(|doc| {
            let doc_tokens = tokenize(doc);
            let intersection = query_tokens.intersection(&doc_tokens).count();
            let union = query_tokens.union(&doc_tokens).count().max(1);
            (intersection as f64 / union as f64, doc)
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored
        .into_iter()
        .filter(|(score, _)| *score > 0.0)
        .take(k)
        .map(|(_, doc)| doc.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rank_prefers_overlapping_document() {
        let corpus = docs(&[
            "gpu pricing and market trends",
            "gardening and flowers",
            "browser automation reliability",
        ]);
        let ranked = semantic_rank("gpu market pricing", &corpus, 2);
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0], "gpu pricing and market trends");
    }

    #[test]
    fn rank_drops_zero_scores() {
        let corpus = docs(&["completely unrelated words", "gpu pricing"]);
        let ranked = semantic_rank("gpu", &corpus, 5);
        assert_eq!(ranked, vec!["gpu pricing".to_string()]);
    }

    #[test]
    fn rank_is_stable_on_ties() {
        let corpus = docs(&["alpha report one", "alpha report two", "alpha report three"]);
        let ranked = semantic_rank("alpha report", &corpus, 3);
        assert_eq!(ranked, corpus);
    }

    #[test]
    fn rank_handles_empty_inputs() {
        assert!(semantic_rank("", &docs(&["anything"]), 3).is_empty());
        assert!(semantic_rank("query", &[], 3).is_empty());
    }

    #[test]
    fn summary_orders_by_frequency_then_first_seen() {
        let events = docs(&["login failed twice", "login timeout", "timeout again"]);
        let summary = episodic_summary(&events, 2);
        assert_eq!(summary, "login, timeout");
    }

    #[test]
    fn summary_strips_punctuation_and_lowercases() {
        let events = docs(&["Failure: Timeout!", "failure (timeout)"]);
        let summary = episodic_summary(&events, 3);
        assert_eq!(summary, "failure, timeout");
    }

    #[test]
    fn summary_of_no_events_is_empty() {
        assert_eq!(episodic_summary(&[], 5), "");
    }
}
