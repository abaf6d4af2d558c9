use std::collections::HashMap;

use tracing::debug;

use crate::{
    pipeline::RetrievalTuning,
    scoring::{sort_by_score_desc, Scored},
};

/// Caps how many chunks any single source page or category may contribute,
/// so one document cannot dominate the final context. Chunks over a cap are
/// deferred rather than dropped; if the capped walk accepts fewer than
/// `min(diversity_min_results, total)` chunks, deferred chunks backfill in
/// score order. Pools small enough not to usefully diversify pass through
/// untouched.
pub fn enforce_diversity(candidates: Vec<Scored>, tuning: &RetrievalTuning) -> Vec<Scored> {
    let total = candidates.len();
    if total <= tuning.diversity_skip_at_or_below {
        return candidates;
    }

    let mut accepted: Vec<Scored> = Vec::new();
    let mut deferred: Vec<Scored> = Vec::new();
    let mut source_counts: HashMap<String, usize> = HashMap::new();
    let mut category_counts: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        let source = candidate.chunk.metadata.source_url.clone();
        let category = candidate.chunk.metadata.category().to_owned();

        let source_count = source_counts.get(&source).copied().unwrap_or(0);
        let category_count = category_counts.get(&category).copied().unwrap_or(0);

        if source_count >= tuning.source_cap || category_count >= tuning.category_cap {
            deferred.push(candidate);
            continue;
        }

        *source_counts.entry(source).or_insert(0) += 1;
        *category_counts.entry(category).or_insert(0) += 1;
        accepted.push(candidate);
    }

    let min_target = tuning.diversity_min_results.min(total);
    if accepted.len() < min_target {
        let needed = min_target - accepted.len();
        debug!(
            accepted = accepted.len(),
            backfilled = needed.min(deferred.len()),
            "Diversity caps left too few chunks; backfilling from deferred"
        );
        accepted.extend(deferred.into_iter().take(needed));
    }

    sort_by_score_desc(&mut accepted);
    accepted
}
