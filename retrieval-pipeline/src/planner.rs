use common::retrieval::{IntentClassification, IntentType};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::pipeline::RetrievalTuning;

/// Strategy selecting which chunks count as duplicates of one another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DedupeMode {
    /// One chunk per product; catalog and comparison answers.
    BySku,
    /// One chunk per source page; recipe collections.
    ByUrl,
    /// Textual near-duplicate collapse; the general case.
    #[default]
    Similarity,
}

impl fmt::Display for DedupeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DedupeMode::BySku => "by-sku",
            DedupeMode::ByUrl => "by-url",
            DedupeMode::Similarity => "similarity",
        };
        f.write_str(label)
    }
}

/// Advisory metadata filters forwarded to the vector index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlanFilters {
    pub content_types: Option<Vec<String>>,
    pub product_category: Option<String>,
    pub recipe_category: Option<String>,
}

/// The retrieval strategy derived once per request. Immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalPlan {
    pub semantic_query: String,
    pub top_k: usize,
    pub relevance_threshold: f32,
    pub filters: PlanFilters,
    pub dedupe_mode: DedupeMode,
    pub max_results: usize,
    pub boost_terms: Vec<String>,
}

// Query stems signalling an ingredient-driven search even when the
// classifier extracted no ingredient entities.
const INGREDIENT_QUERY_STEMS: &[&str] = &[
    "what can i make with",
    "what to make with",
    "recipes with",
    "recipe with",
    "using up",
    "leftover",
];

/// Derives the retrieval strategy from the raw query and its intent
/// classification. Pure and deterministic; a malformed classification falls
/// back to the generic plan rather than failing the request.
pub fn build_plan(
    query: &str,
    intent: &IntentClassification,
    tuning: &RetrievalTuning,
) -> RetrievalPlan {
    let intent = if intent.confidence.is_finite() && (0.0..=1.0).contains(&intent.confidence) {
        intent.clone()
    } else {
        warn!(
            confidence = intent.confidence,
            "Malformed intent classification; using generic retrieval plan"
        );
        IntentClassification::generic()
    };

    let dedupe_mode = match intent.intent_type {
        IntentType::Comparison => DedupeMode::BySku,
        IntentType::RecipeCollection => DedupeMode::ByUrl,
        _ => DedupeMode::Similarity,
    };

    // Key-based dedupe collapses aggressively, so fetch a wider candidate
    // pool for those modes.
    let top_k = match dedupe_mode {
        DedupeMode::Similarity => tuning.vector_take,
        DedupeMode::BySku | DedupeMode::ByUrl => tuning.vector_take * 2,
    };

    let boost_terms = ingredient_boost_terms(query, &intent);

    let content_types = if intent.content_types.is_empty() {
        None
    } else {
        Some(intent.content_types.clone())
    };

    RetrievalPlan {
        semantic_query: query.trim().to_owned(),
        top_k,
        relevance_threshold: tuning.relevance_threshold,
        filters: PlanFilters {
            content_types,
            product_category: None,
            recipe_category: None,
        },
        dedupe_mode,
        max_results: tuning.max_results,
        boost_terms,
    }
}

fn ingredient_boost_terms(query: &str, intent: &IntentClassification) -> Vec<String> {
    let query_lower = query.to_lowercase();
    let ingredient_driven = !intent.entities.ingredients.is_empty()
        || INGREDIENT_QUERY_STEMS
            .iter()
            .any(|stem| query_lower.contains(stem));

    if !ingredient_driven {
        return Vec::new();
    }

    let mut terms: Vec<String> = Vec::new();
    for ingredient in &intent.entities.ingredients {
        let term = ingredient.trim().to_lowercase();
        if !term.is_empty() && !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}
