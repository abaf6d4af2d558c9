use serde::{Deserialize, Serialize};

/// Tunable parameters that govern each retrieval stage.
///
/// Every heuristic constant in the pipeline lives here; nothing is
/// hard-coded at a use site, so deployments can re-tune ranking behavior
/// without a code change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalTuning {
    /// Candidates requested from the vector index.
    pub vector_take: usize,
    /// Final context size cap.
    pub max_results: usize,
    /// Minimum raw similarity a candidate needs to enter the pipeline.
    pub relevance_threshold: f32,
    /// Lower bound on the freshness decay factor.
    pub freshness_floor: f32,
    /// Days of age over which the linear decay is spread.
    pub freshness_divisor_days: f32,
    /// Score uplift contributed by each matched boost term.
    pub boost_per_term: f32,
    /// Upper bound on the accumulated term-boost uplift.
    pub boost_cap: f32,
    /// Multiplier applied to chunks conflicting with a stated constraint.
    pub conflict_penalty: f32,
    /// Word-set Jaccard similarity above which two chunks are duplicates.
    pub similarity_dedupe_threshold: f32,
    /// Score reduction for extra chunks sharing an already-selected source.
    pub same_source_reduction: f32,
    /// Diversity cap on chunks per source URL.
    pub source_cap: usize,
    /// Diversity cap on chunks per category.
    pub category_cap: usize,
    /// Minimum chunks the diversity stage tries to keep.
    pub diversity_min_results: usize,
    /// Pools at or below this size skip diversity enforcement.
    pub diversity_skip_at_or_below: usize,
    /// Maximum terms the query augmenter may append.
    pub augment_term_cap: usize,
    /// TTL for memoized query embeddings.
    pub embedding_cache_ttl_seconds: i64,
    /// Attempts for the embedding call before surfacing an upstream error.
    pub embed_retry_attempts: usize,
    /// Quality band boundaries.
    pub quality_high_top: f32,
    pub quality_high_mean: f32,
    pub quality_high_support: f32,
    pub quality_medium_top: f32,
    pub quality_medium_mean: f32,
}

impl Default for RetrievalTuning {
    fn default() -> Self {
        Self {
            vector_take: 12,
            max_results: 8,
            relevance_threshold: 0.70,
            freshness_floor: 0.85,
            freshness_divisor_days: 600.0,
            boost_per_term: 0.15,
            boost_cap: 0.6,
            conflict_penalty: 0.7,
            similarity_dedupe_threshold: 0.8,
            same_source_reduction: 0.1,
            source_cap: 2,
            category_cap: 3,
            diversity_min_results: 5,
            diversity_skip_at_or_below: 3,
            augment_term_cap: 6,
            embedding_cache_ttl_seconds: 86_400,
            embed_retry_attempts: 3,
            quality_high_top: 0.85,
            quality_high_mean: 0.75,
            quality_high_support: 0.75,
            quality_medium_top: 0.70,
            quality_medium_mean: 0.65,
        }
    }
}

/// Wrapper containing tuning plus room for per-request overrides.
#[derive(Debug, Clone, Default)]
pub struct RetrievalConfig {
    pub tuning: RetrievalTuning,
}

impl RetrievalConfig {
    pub fn new(tuning: RetrievalTuning) -> Self {
        Self { tuning }
    }
}
