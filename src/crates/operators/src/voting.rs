//! Shared normalization and majority-vote logic used by `self-consistency`
//! and `voting`'s `majority` method.

use std::collections::HashMap;

/// Trims, collapses internal whitespace runs, and lowercases.
pub fn normalize_answer(s: &str) -> String {
    s.trim().split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Picks the representative of the largest equivalence class under
/// `normalize_answer`, breaking ties by earliest completion order.
/// `samples` must be in completion order.
pub fn majority_vote(samples: &[String]) -> String {
    let mut groups: HashMap<String, (usize, String)> = HashMap::new();
    for (order, sample) in samples.iter().enumerate() {
        let key = normalize_answer(sample);
        groups
            .entry(key)
            .and_modify(|(count, _)| *count += 1)
            .or_insert((1, sample.clone()));
        let _ = order;
    }

    // Earliest-completion tie-break: among max-count groups, prefer the
    // one whose representative appears first in `samples`.
    let max_count = groups.values().map(|(c, _)| *c).max().unwrap_or(0);
    for sample in samples {
        let key = normalize_answer(sample);
        if let Some((count, _)) = groups.get(&key) {
            if *count == max_count {
                return sample.clone();
            }
        }
    }
    samples.first().cloned().unwrap_or_default()
}
