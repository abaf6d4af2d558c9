use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    pipeline::RetrievalTuning,
    planner::DedupeMode,
    scoring::{sort_by_score_desc, Scored},
};

/// Collapses near-duplicate or same-source chunks using the plan-selected
/// strategy. Input must be score-sorted; output remains score-sorted.
pub fn dedupe(
    candidates: Vec<Scored>,
    mode: DedupeMode,
    tuning: &RetrievalTuning,
) -> Vec<Scored> {
    let before = candidates.len();
    let mut survivors = match mode {
        DedupeMode::BySku => dedupe_by_key(candidates, |candidate| {
            candidate
                .chunk
                .metadata
                .product_sku
                .clone()
                .filter(|sku| !sku.is_empty())
                .or_else(|| non_empty(&candidate.chunk.metadata.source_url))
                .unwrap_or_else(|| candidate.chunk.id.clone())
        }),
        DedupeMode::ByUrl => dedupe_by_key(candidates, |candidate| {
            non_empty(&candidate.chunk.metadata.source_url)
                .unwrap_or_else(|| candidate.chunk.id.clone())
        }),
        DedupeMode::Similarity => dedupe_by_similarity(candidates, tuning),
    };

    sort_by_score_desc(&mut survivors);
    if survivors.len() < before {
        debug!(
            mode = %mode,
            before,
            after = survivors.len(),
            "Deduplicated candidates"
        );
    }
    survivors
}

// Keeps the highest-scoring chunk per key. The input walk is in descending
// score order, so first-seen wins.
fn dedupe_by_key<F>(candidates: Vec<Scored>, key_of: F) -> Vec<Scored>
where
    F: Fn(&Scored) -> String,
{
    let mut seen: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .filter(|candidate| seen.insert(key_of(candidate)))
        .collect()
}

// Greedy walk over the score-sorted list: textual near-duplicates of an
// already-selected chunk are dropped; distinct passages from an already
// selected source are kept but demoted, discouraging source monopolization
// without excluding legitimately different content.
fn dedupe_by_similarity(candidates: Vec<Scored>, tuning: &RetrievalTuning) -> Vec<Scored> {
    let mut selected: Vec<Scored> = Vec::new();
    let mut selected_words: Vec<HashSet<String>> = Vec::new();
    let mut selected_sources: HashMap<String, usize> = HashMap::new();

    for mut candidate in candidates {
        let words = word_set(&candidate.chunk.text);
        let duplicate = selected_words
            .iter()
            .any(|existing| jaccard(&words, existing) > tuning.similarity_dedupe_threshold);
        if duplicate {
            continue;
        }

        let source = candidate.chunk.metadata.source_url.clone();
        if !source.is_empty() {
            let count = selected_sources.entry(source).or_insert(0);
            if *count > 0 {
                candidate.apply_factor(1.0 - tuning.same_source_reduction);
            }
            *count += 1;
        }

        selected.push(candidate);
        selected_words.push(words);
    }

    selected
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_owned())
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}
