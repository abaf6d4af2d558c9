use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use common::retrieval::{RagChunk, UserContext};
use tracing::debug;

use crate::{conflicts::conflicting_phrases, pipeline::RetrievalTuning};

/// A candidate chunk moving through the ranking pipeline.
///
/// The raw index similarity is kept immutable as `base`; every ranking pass
/// contributes to an accumulated `multiplier` instead of mutating scores in
/// place, so a candidate can always be traced back to its retrieval score.
#[derive(Debug, Clone)]
pub struct Scored {
    pub chunk: RagChunk,
    base: f32,
    multiplier: f32,
}

impl Scored {
    pub fn new(chunk: RagChunk) -> Self {
        let base = chunk.score;
        Self {
            chunk,
            base,
            multiplier: 1.0,
        }
    }

    pub const fn base(&self) -> f32 {
        self.base
    }

    pub fn score(&self) -> f32 {
        self.base * self.multiplier
    }

    pub fn apply_factor(&mut self, factor: f32) {
        self.multiplier *= factor;
    }

    /// Final chunk for assembly, carrying the pipeline score.
    pub fn into_chunk(self) -> RagChunk {
        let score = self.score();
        let mut chunk = self.chunk;
        chunk.score = score;
        chunk
    }
}

/// Descending score order with a stable id tiebreak, so equal-scoring
/// candidates never reorder between runs.
pub fn sort_by_score_desc(items: &mut [Scored]) {
    items.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Drops candidates below the plan's relevance threshold. Runs first to
/// bound the cost of the remaining passes.
pub fn apply_relevance_threshold(candidates: Vec<Scored>, threshold: f32) -> Vec<Scored> {
    let before = candidates.len();
    let survivors: Vec<Scored> = candidates
        .into_iter()
        .filter(|candidate| candidate.base() >= threshold)
        .collect();

    debug!(
        before,
        after = survivors.len(),
        threshold,
        "Applied relevance threshold"
    );
    survivors
}

/// Multiplies each candidate by a freshness factor derived from its
/// `indexed_at` age: 1.0 when fresh, linearly decaying to the configured
/// floor. Unknown or unparseable timestamps never look stale.
pub fn apply_freshness_decay(
    candidates: &mut [Scored],
    tuning: &RetrievalTuning,
    now: DateTime<Utc>,
) {
    for candidate in candidates.iter_mut() {
        let factor = candidate
            .chunk
            .metadata
            .indexed_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or(1.0, |indexed_at| {
                let age_days = (now - indexed_at.with_timezone(&Utc)).num_days().max(0) as f32;
                (1.0 - age_days / tuning.freshness_divisor_days).max(tuning.freshness_floor)
            });
        candidate.apply_factor(factor);
    }
    sort_by_score_desc(candidates);
}

/// Boosts candidates whose text mentions boost terms: plan terms first,
/// then must-use and merely-available ingredients and cuisine preferences.
/// The uplift is `1 + min(per_term * matches, cap)`.
pub fn apply_term_boost(candidates: &mut [Scored], terms: &[String], tuning: &RetrievalTuning) {
    if terms.is_empty() {
        return;
    }

    for candidate in candidates.iter_mut() {
        let text = candidate.chunk.text.to_lowercase();
        let matches = terms
            .iter()
            .filter(|term| !term.is_empty() && text.contains(term.as_str()))
            .count();

        if matches > 0 {
            let uplift = (tuning.boost_per_term * matches as f32).min(tuning.boost_cap);
            candidate.apply_factor(1.0 + uplift);
        }
    }
    sort_by_score_desc(candidates);
}

/// Combined boost-term list: the plan's terms, then must-use ingredients
/// ahead of merely-available ones, then cuisine and regional preferences.
/// Lowercased, order-preserving dedupe.
pub fn collect_boost_terms(plan_terms: &[String], user_context: Option<&UserContext>) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |value: &str| {
        let value = value.trim().to_lowercase();
        if !value.is_empty() && !terms.contains(&value) {
            terms.push(value);
        }
    };

    for term in plan_terms {
        push(term);
    }
    if let Some(ctx) = user_context {
        for term in &ctx.must_use {
            push(term);
        }
        for term in &ctx.available {
            push(term);
        }
        for term in &ctx.cultural.cuisines {
            push(term);
        }
        for term in &ctx.cultural.regions {
            push(term);
        }
    }
    terms
}

/// Demotes candidates whose text contradicts a stated constraint or goal
/// (a "quick" request against an overnight recipe). Never removes a chunk:
/// embedding similarity can be close while practically conflicting, and a
/// demoted chunk remains a fallback if the safety filter empties the set.
pub fn apply_conflict_penalty(
    candidates: &mut [Scored],
    user_context: Option<&UserContext>,
    tuning: &RetrievalTuning,
) {
    let Some(ctx) = user_context else {
        return;
    };

    let phrases = conflicting_phrases(
        ctx.constraints
            .iter()
            .chain(ctx.health.goals.iter())
            .map(String::as_str),
    );
    if phrases.is_empty() {
        return;
    }

    let mut demoted = 0usize;
    for candidate in candidates.iter_mut() {
        let text = candidate.chunk.text.to_lowercase();
        if phrases.iter().any(|phrase| text.contains(phrase)) {
            candidate.apply_factor(tuning.conflict_penalty);
            demoted += 1;
        }
    }

    if demoted > 0 {
        debug!(demoted, "Demoted candidates conflicting with user constraints");
        sort_by_score_desc(candidates);
    }
}
