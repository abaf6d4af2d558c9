use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::debug;

use crate::{
    error::AppError,
    retrieval::cache::EmbeddingCache,
    storage::{
        db::SurrealDbClient,
        types::{cached_embedding::CachedEmbedding, StoredObject},
    },
};

/// `EmbeddingCache` adapter persisting entries in the `embedding_cache`
/// table, keyed by record id. Expiry is enforced on read; expired rows are
/// lazily overwritten by the next `put` for the same key.
#[derive(Clone)]
pub struct SurrealEmbeddingCache {
    db: Arc<SurrealDbClient>,
}

impl SurrealEmbeddingCache {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EmbeddingCache for SurrealEmbeddingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, AppError> {
        let entry: Option<CachedEmbedding> = self
            .db
            .select((CachedEmbedding::table_name(), key))
            .await?;

        match entry {
            Some(cached) if !cached.is_expired(Utc::now()) => Ok(Some(cached.value)),
            Some(_) => {
                debug!(key, "Cached embedding expired; treating as miss");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[f32], ttl_seconds: i64) -> Result<(), AppError> {
        let expires_at = Utc::now() + Duration::seconds(ttl_seconds.max(0));
        let entry = CachedEmbedding::new(key.to_owned(), value.to_vec(), expires_at);

        let _: Option<CachedEmbedding> = self
            .db
            .upsert((CachedEmbedding::table_name(), key))
            .content(entry)
            .await?;

        Ok(())
    }
}
