mod config;
pub mod stages;

pub use config::{RetrievalConfig, RetrievalTuning};

use async_trait::async_trait;
use common::{
    error::AppError,
    retrieval::{EmbeddingCache, IntentClassification, UserContext, VectorIndex},
    utils::embedding::EmbeddingProvider,
};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::quality::RagContext;
use stages::{
    AssembleStage, AugmentStage, DedupeStage, DiversityStage, EmbedStage, PipelineContext,
    PlanStage, SafetyFilterStage, ScoreStage, VectorQueryStage,
};

// Stage type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Plan,
    Augment,
    Embed,
    VectorQuery,
    Score,
    SafetyFilter,
    Dedupe,
    Diversity,
    Assemble,
}

// Pipeline stage trait
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

// Type alias for boxed stages
pub type BoxedStage = Box<dyn PipelineStage>;

// Pipeline stage timings tracker
#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, duration)| *duration).sum()
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }

    pub fn embed_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Embed)
    }

    pub fn vector_query_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::VectorQuery)
    }

    pub fn score_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Score)
    }
}

// The fixed stage sequence: every request flows through the same pipeline;
// per-request variation lives in the plan, not in the stage list.
fn build_stages() -> Vec<BoxedStage> {
    vec![
        Box::new(PlanStage),
        Box::new(AugmentStage),
        Box::new(EmbedStage),
        Box::new(VectorQueryStage),
        Box::new(ScoreStage),
        Box::new(SafetyFilterStage),
        Box::new(DedupeStage),
        Box::new(DiversityStage),
        Box::new(AssembleStage),
    ]
}

#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    index: &dyn VectorIndex,
    embedder: &EmbeddingProvider,
    cache: &dyn EmbeddingCache,
    query: &str,
    intent: &IntentClassification,
    user_context: Option<&UserContext>,
    config: RetrievalConfig,
) -> Result<RagContext, AppError> {
    let input_chars = query.chars().count();
    let input_preview: String = query.chars().take(120).collect();
    let input_preview_clean = input_preview.replace('\n', " ");
    info!(
        input_chars,
        preview = %input_preview_clean,
        intent = %intent.intent_type,
        personalized = user_context.is_some(),
        "Starting retrieval pipeline"
    );

    let mut ctx = PipelineContext::new(
        index,
        embedder,
        cache,
        query.to_owned(),
        intent.clone(),
        user_context.cloned(),
        config,
    );

    for stage in build_stages() {
        let start = Instant::now();
        stage.execute(&mut ctx).await?;
        ctx.record_stage_duration(stage.kind(), start.elapsed());
    }

    let timings = ctx.take_stage_timings();
    debug!(
        total_ms = timings.total().as_millis(),
        embed_ms = timings.embed_ms(),
        vector_query_ms = timings.vector_query_ms(),
        score_ms = timings.score_ms(),
        "Retrieval pipeline finished"
    );

    ctx.take_context().ok_or_else(|| {
        AppError::InternalError("pipeline finished without assembling a context".to_string())
    })
}
