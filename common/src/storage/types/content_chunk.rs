use crate::{error::AppError, retrieval::index::ChunkMetadata, storage::db::SurrealDbClient, stored_object};
use uuid::Uuid;

stored_object!(ContentChunk, "content_chunk", {
    text: String,
    embedding: Vec<f32>,
    metadata: ChunkMetadata
});

impl ContentChunk {
    pub fn new(text: String, embedding: Vec<f32>, metadata: ChunkMetadata) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            text,
            embedding,
            metadata,
        }
    }

    /// Removes every chunk indexed from the given source page. Used when a
    /// page is re-ingested.
    pub async fn delete_by_source_url(
        source_url: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .query(format!(
                "DELETE {} WHERE metadata.source_url = $source_url",
                Self::table_name()
            ))
            .bind(("source_url", source_url.to_owned()))
            .await?;

        Ok(())
    }
}
