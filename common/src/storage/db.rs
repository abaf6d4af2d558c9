use crate::error::AppError;

use super::types::StoredObject;
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl SurrealDbClient {
    /// Connects to a remote SurrealDB instance and selects the namespace
    /// and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        if !address.starts_with("mem:") {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// (Re)creates the runtime indexes: the HNSW index over chunk
    /// embeddings, sized to the active embedding dimension, and the lookup
    /// index for the embedding cache.
    pub async fn ensure_indexes(&self, embedding_dimension: usize) -> Result<(), AppError> {
        self.client
            .query(format!(
                "BEGIN TRANSACTION;
                 REMOVE INDEX IF EXISTS idx_embedding_content_chunk ON TABLE content_chunk;
                 DEFINE INDEX idx_embedding_content_chunk ON TABLE content_chunk FIELDS embedding HNSW DIMENSION {embedding_dimension};
                 COMMIT TRANSACTION;"
            ))
            .await?;

        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_cache_key ON TABLE embedding_cache FIELDS key UNIQUE")
            .await?;

        Ok(())
    }

    /// Stores an item in the table named by its `StoredObject` impl.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, AppError>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let created: Option<T> = self
            .client
            .create((T::table_name(), item.get_id().to_owned()))
            .content(item)
            .await?;

        Ok(created)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory instance for tests and local experimentation.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_instance_accepts_queries() {
        let db = SurrealDbClient::memory("test_ns", "db_smoke")
            .await
            .expect("failed to start in-memory surrealdb");

        db.ensure_indexes(3)
            .await
            .expect("failed to define indexes");

        let mut response = db
            .query("RETURN 1 + 1")
            .await
            .expect("query should succeed");
        let value: Option<i64> = response.take(0).expect("take result");
        assert_eq!(value, Some(2));
    }
}
