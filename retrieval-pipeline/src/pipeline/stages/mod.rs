use async_trait::async_trait;
use chrono::Utc;
use common::{
    error::AppError,
    retrieval::{EmbeddingCache, IntentClassification, QueryOptions, UserContext, VectorIndex},
    utils::embedding::{embedding_cache_key, EmbeddingProvider},
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, instrument, warn};

use crate::{
    augment::augment_query,
    dedupe::dedupe,
    diversity::enforce_diversity,
    filtering::filter_avoided,
    planner::{build_plan, RetrievalPlan},
    quality::{assemble_context, RagContext},
    scoring::{
        apply_conflict_penalty, apply_freshness_decay, apply_relevance_threshold,
        apply_term_boost, collect_boost_terms, sort_by_score_desc, Scored,
    },
};

use super::{PipelineStage, PipelineStageTimings, RetrievalConfig, StageKind};

/// Mutable state threaded through the stage sequence, borrowing the
/// injected collaborators so fakes drop in for tests.
pub struct PipelineContext<'a> {
    pub index: &'a dyn VectorIndex,
    pub embedder: &'a EmbeddingProvider,
    pub cache: &'a dyn EmbeddingCache,
    pub query: String,
    pub intent: IntentClassification,
    pub user_context: Option<UserContext>,
    pub config: RetrievalConfig,
    pub plan: Option<RetrievalPlan>,
    pub augmented_query: Option<String>,
    pub query_embedding: Option<Vec<f32>>,
    pub candidates: Vec<Scored>,
    pub context_result: Option<RagContext>,
    stage_timings: PipelineStageTimings,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        index: &'a dyn VectorIndex,
        embedder: &'a EmbeddingProvider,
        cache: &'a dyn EmbeddingCache,
        query: String,
        intent: IntentClassification,
        user_context: Option<UserContext>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            cache,
            query,
            intent,
            user_context,
            config,
            plan: None,
            augmented_query: None,
            query_embedding: None,
            candidates: Vec::new(),
            context_result: None,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    fn ensure_plan(&self) -> Result<&RetrievalPlan, AppError> {
        self.plan.as_ref().ok_or_else(|| {
            AppError::InternalError("retrieval plan missing before dependent stage".to_string())
        })
    }

    fn ensure_embedding(&self) -> Result<&Vec<f32>, AppError> {
        self.query_embedding.as_ref().ok_or_else(|| {
            AppError::InternalError("query embedding missing before vector query".to_string())
        })
    }

    pub fn record_stage_duration(&mut self, kind: StageKind, duration: std::time::Duration) {
        self.stage_timings.record(kind, duration);
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    pub fn take_context(&mut self) -> Option<RagContext> {
        self.context_result.take()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanStage;

#[async_trait]
impl PipelineStage for PlanStage {
    fn kind(&self) -> StageKind {
        StageKind::Plan
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        plan(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AugmentStage;

#[async_trait]
impl PipelineStage for AugmentStage {
    fn kind(&self) -> StageKind {
        StageKind::Augment
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        augment(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EmbedStage;

#[async_trait]
impl PipelineStage for EmbedStage {
    fn kind(&self) -> StageKind {
        StageKind::Embed
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        embed(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VectorQueryStage;

#[async_trait]
impl PipelineStage for VectorQueryStage {
    fn kind(&self) -> StageKind {
        StageKind::VectorQuery
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        vector_query(ctx).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreStage;

#[async_trait]
impl PipelineStage for ScoreStage {
    fn kind(&self) -> StageKind {
        StageKind::Score
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        score(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SafetyFilterStage;

#[async_trait]
impl PipelineStage for SafetyFilterStage {
    fn kind(&self) -> StageKind {
        StageKind::SafetyFilter
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        safety_filter(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupeStage;

#[async_trait]
impl PipelineStage for DedupeStage {
    fn kind(&self) -> StageKind {
        StageKind::Dedupe
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        dedupe_candidates(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiversityStage;

#[async_trait]
impl PipelineStage for DiversityStage {
    fn kind(&self) -> StageKind {
        StageKind::Diversity
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        diversity(ctx)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AssembleStage;

#[async_trait]
impl PipelineStage for AssembleStage {
    fn kind(&self) -> StageKind {
        StageKind::Assemble
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        assemble(ctx)
    }
}

#[instrument(level = "trace", skip_all)]
pub fn plan(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let plan = build_plan(&ctx.query, &ctx.intent, &ctx.config.tuning);
    debug!(
        dedupe_mode = %plan.dedupe_mode,
        top_k = plan.top_k,
        boost_terms = plan.boost_terms.len(),
        "Derived retrieval plan"
    );
    ctx.plan = Some(plan);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn augment(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let plan = ctx.ensure_plan()?;
    let augmented = augment_query(
        &plan.semantic_query,
        ctx.user_context.as_ref(),
        ctx.config.tuning.augment_term_cap,
    );
    ctx.augmented_query = Some(augmented);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn embed(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let text = ctx
        .augmented_query
        .clone()
        .unwrap_or_else(|| ctx.query.clone());
    let key = embedding_cache_key(&text);

    match ctx.cache.get(&key).await {
        Ok(Some(cached)) => {
            debug!("Reusing cached query embedding");
            ctx.query_embedding = Some(cached);
            return Ok(());
        }
        Ok(None) => {}
        Err(err) => {
            // Cache faults are recoverable; recompute instead of failing.
            warn!(error = %err, "Embedding cache read failed; recomputing");
        }
    }

    debug!("Generating query embedding");
    let retry_strategy = ExponentialBackoff::from_millis(100)
        .map(jitter)
        .take(ctx.config.tuning.embed_retry_attempts.max(1));
    let embedder = ctx.embedder;
    let embedding = Retry::spawn(retry_strategy, || embedder.embed(&text))
        .await
        .map_err(|err| AppError::Upstream(format!("embedding generation failed: {err}")))?;

    if let Err(err) = ctx
        .cache
        .put(&key, &embedding, ctx.config.tuning.embedding_cache_ttl_seconds)
        .await
    {
        warn!(error = %err, "Embedding cache write failed; continuing uncached");
    }

    ctx.query_embedding = Some(embedding);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub async fn vector_query(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let plan = ctx.ensure_plan()?;
    let options = QueryOptions {
        top_k: plan.top_k,
        content_types: plan.filters.content_types.clone(),
    };
    let embedding = ctx.ensure_embedding()?;

    let matches = ctx.index.query(embedding, &options).await?;
    debug!(candidates = matches.len(), "Collected vector index candidates");

    let mut candidates: Vec<Scored> = matches.into_iter().map(Scored::new).collect();
    sort_by_score_desc(&mut candidates);
    ctx.candidates = candidates;
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn score(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let plan = ctx.ensure_plan()?.clone();
    let tuning = ctx.config.tuning.clone();

    let candidates = std::mem::take(&mut ctx.candidates);
    let mut candidates = apply_relevance_threshold(candidates, plan.relevance_threshold);

    apply_freshness_decay(&mut candidates, &tuning, Utc::now());

    let boost_terms = collect_boost_terms(&plan.boost_terms, ctx.user_context.as_ref());
    apply_term_boost(&mut candidates, &boost_terms, &tuning);

    apply_conflict_penalty(&mut candidates, ctx.user_context.as_ref(), &tuning);

    ctx.candidates = candidates;
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn safety_filter(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let candidates = std::mem::take(&mut ctx.candidates);
    ctx.candidates = filter_avoided(candidates, ctx.user_context.as_ref());
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn dedupe_candidates(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let mode = ctx.ensure_plan()?.dedupe_mode;
    let candidates = std::mem::take(&mut ctx.candidates);
    ctx.candidates = dedupe(candidates, mode, &ctx.config.tuning);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn diversity(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let candidates = std::mem::take(&mut ctx.candidates);
    ctx.candidates = enforce_diversity(candidates, &ctx.config.tuning);
    Ok(())
}

#[instrument(level = "trace", skip_all)]
pub fn assemble(ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
    let max_results = ctx.ensure_plan()?.max_results;
    let candidates = std::mem::take(&mut ctx.candidates);
    let context = assemble_context(candidates, max_results, &ctx.config.tuning);
    debug!(
        chunks = context.chunks.len(),
        quality = %context.quality,
        total_relevance = context.total_relevance,
        "Assembled retrieval context"
    );
    ctx.context_result = Some(context);
    Ok(())
}
