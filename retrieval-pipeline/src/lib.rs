pub mod augment;
pub mod conflicts;
pub mod dedupe;
pub mod diversity;
pub mod filtering;
pub mod pipeline;
pub mod planner;
pub mod quality;
pub mod scoring;

use common::{
    error::AppError,
    retrieval::{EmbeddingCache, IntentClassification, UserContext, VectorIndex},
    utils::embedding::EmbeddingProvider,
};
use tracing::instrument;

pub use pipeline::{PipelineStageTimings, RetrievalConfig, RetrievalTuning, StageKind};
pub use planner::{DedupeMode, PlanFilters, RetrievalPlan};
pub use quality::{ContextQuality, RagContext};

/// One retrieval request for the batch entry point.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub intent: IntentClassification,
    pub user_context: Option<UserContext>,
}

/// Runs the full retrieval pipeline for one query: plan, augment, embed
/// (memoized), vector query, score, safety-filter, dedupe, diversify,
/// assemble.
///
/// Upstream faults (embedding, vector index) propagate as errors; an
/// emptied result set is a successful low-quality context, so callers can
/// tell "nothing relevant" apart from "retrieval broke".
#[instrument(skip_all, fields(intent = %intent.intent_type))]
pub async fn retrieve_context(
    index: &dyn VectorIndex,
    embedder: &EmbeddingProvider,
    cache: &dyn EmbeddingCache,
    query: &str,
    intent: &IntentClassification,
    user_context: Option<&UserContext>,
    config: RetrievalConfig,
) -> Result<RagContext, AppError> {
    pipeline::run_pipeline(index, embedder, cache, query, intent, user_context, config).await
}

/// Fans out independent retrieval requests concurrently. The invocations
/// share no mutable state, so they parallelize freely; the first upstream
/// failure fails the batch.
pub async fn retrieve_context_batch(
    index: &dyn VectorIndex,
    embedder: &EmbeddingProvider,
    cache: &dyn EmbeddingCache,
    requests: &[RetrievalRequest],
    config: &RetrievalConfig,
) -> Result<Vec<RagContext>, AppError> {
    futures::future::try_join_all(requests.iter().map(|request| {
        retrieve_context(
            index,
            embedder,
            cache,
            &request.query,
            &request.intent,
            request.user_context.as_ref(),
            config.clone(),
        )
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::retrieval::{
        user_context::DietaryContext, ChunkMetadata, IntentEntities, IntentType, MemoryCache,
        QueryOptions, RagChunk,
    };

    /// Stable in-memory index: returns its canned chunks for every query.
    struct FakeIndex {
        chunks: Vec<RagChunk>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(
            &self,
            _embedding: &[f32],
            options: &QueryOptions,
        ) -> Result<Vec<RagChunk>, AppError> {
            Ok(self.chunks.iter().take(options.top_k).cloned().collect())
        }
    }

    /// Index whose upstream is down.
    struct FailingIndex;

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn query(
            &self,
            _embedding: &[f32],
            _options: &QueryOptions,
        ) -> Result<Vec<RagChunk>, AppError> {
            Err(AppError::Upstream("vector index unavailable".to_string()))
        }
    }

    /// Cache that fails every operation; retrieval must shrug it off.
    struct BrokenCache;

    #[async_trait]
    impl EmbeddingCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<f32>>, AppError> {
            Err(AppError::InternalError("cache offline".to_string()))
        }

        async fn put(&self, _key: &str, _value: &[f32], _ttl: i64) -> Result<(), AppError> {
            Err(AppError::InternalError("cache offline".to_string()))
        }
    }

    fn embedder() -> EmbeddingProvider {
        EmbeddingProvider::new_hashed(32).expect("hashed provider")
    }

    fn chunk(id: &str, score: f32, text: &str, meta: ChunkMetadata) -> RagChunk {
        RagChunk {
            id: id.into(),
            score,
            text: text.into(),
            metadata: meta,
        }
    }

    fn recipe_meta(url: &str, category: &str) -> ChunkMetadata {
        ChunkMetadata {
            content_type: "recipe".into(),
            source_url: url.into(),
            page_title: format!("Recipes from {url}"),
            recipe_category: Some(category.into()),
            ..ChunkMetadata::default()
        }
    }

    fn intent(intent_type: IntentType) -> IntentClassification {
        IntentClassification {
            intent_type,
            confidence: 0.9,
            content_types: Vec::new(),
            entities: IntentEntities::default(),
        }
    }

    fn vegan_context() -> UserContext {
        UserContext {
            dietary: DietaryContext {
                avoid: Vec::new(),
                preferences: vec!["vegan".into()],
            },
            ..UserContext::default()
        }
    }

    #[tokio::test]
    async fn smoothie_scenario_excludes_dairy_but_keeps_substitutes() {
        let index = FakeIndex {
            chunks: vec![
                chunk(
                    "dairy",
                    0.80,
                    "blend banana with milk and honey",
                    recipe_meta("https://brand.example/smoothies", "drinks"),
                ),
                chunk(
                    "substitute",
                    0.78,
                    "blend banana with almond milk",
                    recipe_meta("https://brand.example/vegan-smoothies", "drinks"),
                ),
            ],
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "smoothie recipe",
            &intent(IntentType::Recipe),
            Some(&vegan_context()),
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        let ids: Vec<&str> = context.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["substitute"]);
    }

    #[tokio::test]
    async fn safety_invariant_holds_with_strict_word_boundaries() {
        let index = FakeIndex {
            chunks: vec![
                chunk(
                    "violating",
                    0.9,
                    "A salad with fresh carrots and herbs",
                    recipe_meta("https://brand.example/salads", "sides"),
                ),
                chunk(
                    "boundary-safe",
                    0.85,
                    "Best car rental tips for your carrotized road trip",
                    ChunkMetadata {
                        content_type: "editorial".into(),
                        source_url: "https://brand.example/travel".into(),
                        ..ChunkMetadata::default()
                    },
                ),
            ],
        };
        let ctx = UserContext {
            dietary: DietaryContext {
                avoid: vec!["carrots".into()],
                preferences: Vec::new(),
            },
            ..UserContext::default()
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "crunchy snacks",
            &intent(IntentType::General),
            Some(&ctx),
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        let ids: Vec<&str> = context.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["boundary-safe"]);
    }

    #[tokio::test]
    async fn identical_inputs_return_identical_contexts() {
        let index = FakeIndex {
            chunks: (0..8)
                .map(|i| {
                    chunk(
                        &format!("c{i}"),
                        0.9 - 0.02 * i as f32,
                        &format!("unique passage number {i} about baking"),
                        recipe_meta(
                            &format!("https://brand.example/{}", i % 4),
                            ["mains", "sides", "desserts", "drinks"][i % 4],
                        ),
                    )
                })
                .collect(),
        };
        let ctx = vegan_context();
        let provider = embedder();
        let classified = intent(IntentType::Recipe);

        let first = retrieve_context(
            &index,
            &provider,
            &MemoryCache::new(),
            "weeknight baking ideas",
            &classified,
            Some(&ctx),
            RetrievalConfig::default(),
        )
        .await
        .expect("first retrieval");
        let second = retrieve_context(
            &index,
            &provider,
            &MemoryCache::new(),
            "weeknight baking ideas",
            &classified,
            Some(&ctx),
            RetrievalConfig::default(),
        )
        .await
        .expect("second retrieval");

        let first_json = serde_json::to_string(&first).expect("serialize first");
        let second_json = serde_json::to_string(&second).expect("serialize second");
        assert_eq!(first_json, second_json);
    }

    #[tokio::test]
    async fn final_chunks_are_sorted_descending() {
        let index = FakeIndex {
            chunks: (0..10)
                .map(|i| {
                    chunk(
                        &format!("c{i}"),
                        0.72 + 0.02 * (i % 5) as f32,
                        &format!("a distinct passage about topic {i}"),
                        recipe_meta(
                            &format!("https://brand.example/{}", i % 5),
                            ["mains", "sides", "desserts", "drinks", "snacks"][i % 5],
                        ),
                    )
                })
                .collect(),
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "dinner inspiration",
            &intent(IntentType::General),
            None,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        assert!(!context.chunks.is_empty());
        for pair in context.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score, "scores must be descending");
        }
    }

    #[tokio::test]
    async fn comparison_intent_never_returns_duplicate_skus() {
        let mut chunks = Vec::new();
        for i in 0..6 {
            let sku = format!("SKU-{}", i % 3);
            chunks.push(chunk(
                &format!("c{i}"),
                0.9 - 0.01 * i as f32,
                &format!("product spec variant {i}"),
                ChunkMetadata {
                    content_type: "product".into(),
                    source_url: format!("https://brand.example/products/{sku}"),
                    product_sku: Some(sku),
                    product_category: Some("flours".into()),
                    ..ChunkMetadata::default()
                },
            ));
        }
        let index = FakeIndex { chunks };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "compare our flours",
            &intent(IntentType::Comparison),
            None,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        let mut skus: Vec<&str> = context
            .chunks
            .iter()
            .filter_map(|c| c.metadata.product_sku.as_deref())
            .collect();
        let before = skus.len();
        skus.sort_unstable();
        skus.dedup();
        assert_eq!(before, skus.len(), "duplicate SKU in comparison context");
        assert!(context.has_product_info);
    }

    #[tokio::test]
    async fn diversity_caps_hold_for_wide_candidate_pools() {
        let index = FakeIndex {
            chunks: (0..12)
                .map(|i| {
                    // Three sources, four categories, all distinct text.
                    chunk(
                        &format!("c{i}"),
                        0.92 - 0.01 * i as f32,
                        &format!("entirely different passage body number {i}"),
                        recipe_meta(
                            &format!("https://brand.example/{}", i % 3),
                            ["mains", "sides", "desserts", "drinks"][i % 4],
                        ),
                    )
                })
                .collect(),
        };

        let mut config = RetrievalConfig::default();
        config.tuning.vector_take = 12;

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "variety platter",
            &intent(IntentType::General),
            None,
            config,
        )
        .await
        .expect("retrieval should succeed");

        let mut per_source = std::collections::HashMap::new();
        let mut per_category = std::collections::HashMap::new();
        for c in &context.chunks {
            *per_source
                .entry(c.metadata.source_url.clone())
                .or_insert(0usize) += 1;
            *per_category
                .entry(c.metadata.category().to_owned())
                .or_insert(0usize) += 1;
        }
        assert!(context.chunks.len() >= 5);
        assert!(per_source.values().all(|count| *count <= 2));
        assert!(per_category.values().all(|count| *count <= 3));
    }

    #[tokio::test]
    async fn upstream_index_failure_propagates() {
        let result = retrieve_context(
            &FailingIndex,
            &embedder(),
            &MemoryCache::new(),
            "anything",
            &intent(IntentType::General),
            None,
            RetrievalConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    async fn empty_after_filter_is_a_successful_low_quality_context() {
        let index = FakeIndex {
            chunks: vec![
                chunk(
                    "a",
                    0.9,
                    "creamy milk pudding",
                    recipe_meta("https://brand.example/puddings", "desserts"),
                ),
                chunk(
                    "b",
                    0.85,
                    "cheese omelette with butter",
                    recipe_meta("https://brand.example/eggs", "breakfast"),
                ),
            ],
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "breakfast ideas",
            &intent(IntentType::Recipe),
            Some(&vegan_context()),
            RetrievalConfig::default(),
        )
        .await
        .expect("an emptied result set is not an error");

        assert!(context.chunks.is_empty());
        assert_eq!(context.quality, ContextQuality::Low);
        assert_eq!(context.total_relevance, 0.0);
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_recomputation() {
        let index = FakeIndex {
            chunks: vec![chunk(
                "a",
                0.9,
                "a perfectly fine passage",
                recipe_meta("https://brand.example/fine", "mains"),
            )],
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &BrokenCache,
            "fine passage",
            &intent(IntentType::General),
            None,
            RetrievalConfig::default(),
        )
        .await
        .expect("cache failures must not fail retrieval");

        assert_eq!(context.chunks.len(), 1);
    }

    #[tokio::test]
    async fn embeddings_are_memoized_through_the_cache() {
        let index = FakeIndex {
            chunks: vec![chunk(
                "a",
                0.9,
                "a cached passage",
                recipe_meta("https://brand.example/cached", "mains"),
            )],
        };
        let cache = MemoryCache::new();
        let provider = embedder();

        retrieve_context(
            &index,
            &provider,
            &cache,
            "golden oat bars",
            &intent(IntentType::General),
            None,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        let key = common::utils::embedding::embedding_cache_key("golden oat bars");
        let cached = cache.get(&key).await.expect("cache get");
        let expected = provider.embed("golden oat bars").await.expect("embed");
        assert_eq!(cached, Some(expected));
    }

    #[tokio::test]
    async fn batch_retrieval_returns_one_context_per_request() {
        let index = FakeIndex {
            chunks: vec![
                chunk(
                    "r",
                    0.9,
                    "roasted squash with sage",
                    recipe_meta("https://brand.example/squash", "mains"),
                ),
                chunk(
                    "s",
                    0.85,
                    "citrus salad with fennel",
                    recipe_meta("https://brand.example/salads", "sides"),
                ),
            ],
        };

        let requests = vec![
            RetrievalRequest {
                query: "autumn dinner".into(),
                intent: intent(IntentType::Recipe),
                user_context: None,
            },
            RetrievalRequest {
                query: "bright salad".into(),
                intent: intent(IntentType::Recipe),
                user_context: None,
            },
        ];

        let contexts = retrieve_context_batch(
            &index,
            &embedder(),
            &MemoryCache::new(),
            &requests,
            &RetrievalConfig::default(),
        )
        .await
        .expect("batch retrieval should succeed");

        assert_eq!(contexts.len(), 2);
        for context in &contexts {
            assert!(!context.chunks.is_empty());
        }
    }

    #[tokio::test]
    async fn low_scoring_candidates_never_reach_the_context() {
        let index = FakeIndex {
            chunks: vec![
                chunk(
                    "relevant",
                    0.88,
                    "sourdough starter care",
                    recipe_meta("https://brand.example/sourdough", "baking"),
                ),
                chunk(
                    "irrelevant",
                    0.42,
                    "unrelated newsletter footer",
                    ChunkMetadata::default(),
                ),
            ],
        };

        let context = retrieve_context(
            &index,
            &embedder(),
            &MemoryCache::new(),
            "sourdough help",
            &intent(IntentType::Support),
            None,
            RetrievalConfig::default(),
        )
        .await
        .expect("retrieval should succeed");

        let ids: Vec<&str> = context.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["relevant"]);
    }
}
