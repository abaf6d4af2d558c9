use serde::{Deserialize, Serialize};
use std::fmt;

use common::retrieval::RagChunk;

use crate::{pipeline::RetrievalTuning, scoring::Scored};

/// Coarse confidence label summarizing how trustworthy the retrieved
/// context is for grounding downstream generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextQuality {
    High,
    Medium,
    Low,
}

impl fmt::Display for ContextQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ContextQuality::High => "high",
            ContextQuality::Medium => "medium",
            ContextQuality::Low => "low",
        };
        f.write_str(label)
    }
}

/// The engine's sole output artifact: the ordered, filtered context set
/// plus summary signals for the generation collaborator. Created fresh per
/// request; never mutated after assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagContext {
    pub chunks: Vec<RagChunk>,
    pub total_relevance: f32,
    pub has_product_info: bool,
    pub has_recipes: bool,
    pub source_urls: Vec<String>,
    pub quality: ContextQuality,
}

impl RagContext {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            total_relevance: 0.0,
            has_product_info: false,
            has_recipes: false,
            source_urls: Vec::new(),
            quality: ContextQuality::Low,
        }
    }
}

/// Classifies result quality from the final scores. A pure function of the
/// chunk set: recomputing over the same chunks is deterministic.
pub fn assess_quality(scores: &[f32], tuning: &RetrievalTuning) -> ContextQuality {
    if scores.is_empty() {
        return ContextQuality::Low;
    }

    let top = scores.iter().copied().fold(f32::MIN, f32::max);
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    let strong_support = scores
        .iter()
        .filter(|score| **score > tuning.quality_high_support)
        .count();

    if top > tuning.quality_high_top && mean > tuning.quality_high_mean && strong_support >= 2 {
        ContextQuality::High
    } else if top > tuning.quality_medium_top || mean > tuning.quality_medium_mean {
        ContextQuality::Medium
    } else {
        ContextQuality::Low
    }
}

/// Builds the final context from the surviving candidates, truncated to the
/// plan's result cap. Chunks arrive score-sorted and leave score-sorted.
pub fn assemble_context(
    candidates: Vec<Scored>,
    max_results: usize,
    tuning: &RetrievalTuning,
) -> RagContext {
    let chunks: Vec<RagChunk> = candidates
        .into_iter()
        .take(max_results.max(1))
        .map(Scored::into_chunk)
        .collect();

    if chunks.is_empty() {
        return RagContext::empty();
    }

    let scores: Vec<f32> = chunks.iter().map(|chunk| chunk.score).collect();
    let total_relevance = scores.iter().sum::<f32>() / scores.len() as f32;

    let has_product_info = chunks.iter().any(|chunk| {
        chunk.metadata.content_type == "product" || chunk.metadata.product_sku.is_some()
    });
    let has_recipes = chunks.iter().any(|chunk| {
        chunk.metadata.content_type == "recipe" || chunk.metadata.recipe_category.is_some()
    });

    let mut source_urls: Vec<String> = Vec::new();
    for chunk in &chunks {
        let url = &chunk.metadata.source_url;
        if !url.is_empty() && !source_urls.contains(url) {
            source_urls.push(url.clone());
        }
    }

    let quality = assess_quality(&scores, tuning);

    RagContext {
        chunks,
        total_relevance,
        has_product_info,
        has_recipes,
        source_urls,
        quality,
    }
}
