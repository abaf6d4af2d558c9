use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::AppError,
    retrieval::index::{distance_to_similarity, ChunkMetadata, QueryOptions, RagChunk, VectorIndex},
    storage::{db::SurrealDbClient, types::content_chunk::deserialize_flexible_id},
};

// Search breadth for the HNSW index; trades recall against latency.
const KNN_EF: usize = 40;

/// `VectorIndex` adapter backed by the SurrealDB HNSW index over
/// `content_chunk.embedding`.
#[derive(Clone)]
pub struct SurrealVectorIndex {
    db: Arc<SurrealDbClient>,
}

impl SurrealVectorIndex {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[derive(Debug, Deserialize)]
struct ScoredChunkRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    text: String,
    #[serde(default)]
    metadata: ChunkMetadata,
    distance: Option<f32>,
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn query(
        &self,
        embedding: &[f32],
        options: &QueryOptions,
    ) -> Result<Vec<RagChunk>, AppError> {
        if embedding.is_empty() {
            return Err(AppError::Validation(
                "query embedding must not be empty".to_string(),
            ));
        }

        let take = options.top_k.max(1);

        let filter_clause = if options.content_types.is_some() {
            "AND metadata.content_type IN $content_types"
        } else {
            ""
        };

        let sql = format!(
            "SELECT id, text, metadata, vector::distance::knn() AS distance \
             FROM content_chunk \
             WHERE embedding <|{take},{KNN_EF}|> {embedding:?} {filter_clause} \
             ORDER BY distance"
        );

        let mut response = self
            .db
            .query(sql)
            .bind((
                "content_types",
                options.content_types.clone().unwrap_or_default(),
            ))
            .await?;

        let rows: Vec<ScoredChunkRow> = response.take(0)?;

        debug!(
            candidates = rows.len(),
            top_k = take,
            "Vector index query completed"
        );

        Ok(rows
            .into_iter()
            .map(|row| RagChunk {
                id: row.id,
                score: distance_to_similarity(row.distance.unwrap_or(f32::MAX)),
                text: row.text,
                metadata: row.metadata,
            })
            .collect())
    }
}
