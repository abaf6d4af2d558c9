use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::error::AppError;

/// Key-value store used only for embedding memoization.
///
/// Entries are immutable once written (same key, same value), so concurrent
/// writers can only produce redundant recomputation. Callers treat every
/// error as a miss; a cache fault never aborts a retrieval.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, AppError>;
    async fn put(&self, key: &str, value: &[f32], ttl_seconds: i64) -> Result<(), AppError>;
}

#[derive(Debug, Clone)]
struct CachedVector {
    value: Vec<f32>,
    expires_at: DateTime<Utc>,
}

/// In-process embedding cache for tests and cache-less deployments.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CachedVector>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<f32>>, AppError> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &[f32], ttl_seconds: i64) -> Result<(), AppError> {
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_owned(),
            CachedVector {
                value: value.to_vec(),
                expires_at: Utc::now() + Duration::seconds(ttl_seconds.max(0)),
            },
        );
        Ok(())
    }
}
