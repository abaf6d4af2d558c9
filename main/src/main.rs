use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{
    retrieval::{ChunkMetadata, IntentClassification, UserContext},
    storage::{
        db::SurrealDbClient, embedding_cache::SurrealEmbeddingCache,
        types::content_chunk::ContentChunk, vector_index::SurrealVectorIndex,
    },
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use retrieval_pipeline::{retrieve_context, RetrievalConfig};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Brand content retrieval engine: load pre-chunked content into the
/// vector index and run personalized retrievals against it.
#[derive(Parser)]
#[command(name = "retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load pre-chunked content from a JSON file into the vector index.
    Index {
        /// JSON array of `{ "text": ..., "metadata": { ... } }` records.
        file: PathBuf,
        /// Re-ingest: drop existing chunks for each source URL first.
        #[arg(long)]
        replace: bool,
    },
    /// Run one retrieval and print the resulting context as JSON.
    Query {
        query: String,
        /// Intent classification JSON; defaults to a generic intent.
        #[arg(long)]
        intent_file: Option<PathBuf>,
        /// User context JSON for personalization.
        #[arg(long)]
        context_file: Option<PathBuf>,
        /// Retrieval tuning overrides as JSON.
        #[arg(long)]
        tuning_file: Option<PathBuf>,
    },
}

// Input shape for the `index` subcommand: already-chunked passages with
// their provenance metadata. Chunking itself happens upstream.
#[derive(Debug, Deserialize)]
struct ChunkRecord {
    text: String,
    #[serde(default)]
    metadata: ChunkMetadata,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await
        .context("connecting to SurrealDB")?,
    );

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = EmbeddingProvider::from_config(&config, Some(openai_client))
        .await
        .context("initializing embedding provider")?;
    info!(
        backend = embedding_provider.backend_label(),
        dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    db.ensure_indexes(embedding_provider.dimension())
        .await
        .context("defining runtime indexes")?;

    match cli.command {
        Command::Index { file, replace } => {
            index_chunks(&db, &embedding_provider, &file, replace).await
        }
        Command::Query {
            query,
            intent_file,
            context_file,
            tuning_file,
        } => {
            run_query(
                db,
                &embedding_provider,
                &config,
                &query,
                intent_file.as_deref(),
                context_file.as_deref(),
                tuning_file.as_deref(),
            )
            .await
        }
    }
}

async fn index_chunks(
    db: &Arc<SurrealDbClient>,
    embedding_provider: &EmbeddingProvider,
    file: &PathBuf,
    replace: bool,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let records: Vec<ChunkRecord> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;

    if records.is_empty() {
        warn!("No chunk records found in input; nothing to index");
        return Ok(());
    }

    if replace {
        let mut sources: Vec<&str> = records
            .iter()
            .map(|record| record.metadata.source_url.as_str())
            .filter(|url| !url.is_empty())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        for source in sources {
            ContentChunk::delete_by_source_url(source, db)
                .await
                .with_context(|| format!("removing existing chunks for {source}"))?;
        }
    }

    let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
    let embeddings = embedding_provider
        .embed_batch(texts)
        .await
        .context("embedding chunk batch")?;

    let total = records.len();
    for (record, embedding) in records.into_iter().zip(embeddings) {
        let chunk = ContentChunk::new(record.text, embedding, record.metadata);
        db.store_item(chunk).await.context("storing chunk")?;
    }

    info!(total, "Indexed content chunks");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_query(
    db: Arc<SurrealDbClient>,
    embedding_provider: &EmbeddingProvider,
    config: &common::utils::config::AppConfig,
    query: &str,
    intent_file: Option<&std::path::Path>,
    context_file: Option<&std::path::Path>,
    tuning_file: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let intent: IntentClassification = match intent_file {
        Some(path) => read_json(path).await?,
        None => IntentClassification::generic(),
    };
    let user_context: Option<UserContext> = match context_file {
        Some(path) => Some(read_json(path).await?),
        None => None,
    };
    let mut retrieval_config = RetrievalConfig::default();
    if let Some(path) = tuning_file {
        retrieval_config.tuning = read_json(path).await?;
    }
    retrieval_config.tuning.embedding_cache_ttl_seconds = config.embedding_cache_ttl_seconds;

    let index = SurrealVectorIndex::new(Arc::clone(&db));
    let cache = SurrealEmbeddingCache::new(db);

    let context = retrieve_context(
        &index,
        embedding_provider,
        &cache,
        query,
        &intent,
        user_context.as_ref(),
        retrieval_config,
    )
    .await?;

    println!("{}", serde_json::to_string_pretty(&context)?);
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::retrieval::{EmbeddingCache, MemoryCache};
    use retrieval_pipeline::ContextQuality;
    use uuid::Uuid;

    async fn seeded_db(provider: &EmbeddingProvider) -> Arc<SurrealDbClient> {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_indexes(provider.dimension())
            .await
            .expect("failed to define indexes");

        let passages = [
            (
                "Blend frozen banana with oat milk for a quick smoothie.",
                "https://brand.example/smoothies",
                "drinks",
            ),
            (
                "Roast the squash until caramelized at the edges.",
                "https://brand.example/squash",
                "mains",
            ),
            (
                "Fold grated carrot into the spiced batter.",
                "https://brand.example/carrot-cake",
                "desserts",
            ),
        ];
        for (text, url, category) in passages {
            let embedding = provider.embed(text).await.expect("embed passage");
            let chunk = ContentChunk::new(
                text.to_owned(),
                embedding,
                ChunkMetadata {
                    content_type: "recipe".into(),
                    source_url: url.into(),
                    page_title: format!("Page at {url}"),
                    recipe_category: Some(category.into()),
                    ..ChunkMetadata::default()
                },
            );
            db.store_item(chunk).await.expect("store chunk");
        }

        db
    }

    #[tokio::test]
    async fn end_to_end_query_against_surreal_backed_index() {
        let provider = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        let db = seeded_db(&provider).await;

        let index = SurrealVectorIndex::new(Arc::clone(&db));
        let cache = SurrealEmbeddingCache::new(db);

        let mut config = RetrievalConfig::default();
        // Hashed-embedding similarities are lower than production cosine
        // scores; relax the threshold for the smoke test.
        config.tuning.relevance_threshold = 0.0;

        let context = retrieve_context(
            &index,
            &provider,
            &cache,
            "banana smoothie",
            &IntentClassification::generic(),
            None,
            config,
        )
        .await
        .expect("retrieval should succeed");

        assert!(!context.chunks.is_empty(), "expected seeded chunks back");
        for pair in context.chunks.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert!(matches!(
            context.quality,
            ContextQuality::High | ContextQuality::Medium | ContextQuality::Low
        ));
    }

    #[tokio::test]
    async fn safety_filter_applies_over_the_surreal_index_too() {
        let provider = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        let db = seeded_db(&provider).await;

        let index = SurrealVectorIndex::new(Arc::clone(&db));
        let cache = MemoryCache::new();
        let user_context: UserContext = serde_json::from_str(
            r#"{"dietary": {"avoid": ["carrots"]}}"#,
        )
        .expect("context json");

        let mut config = RetrievalConfig::default();
        config.tuning.relevance_threshold = 0.0;

        let context = retrieve_context(
            &index,
            &provider,
            &cache,
            "spiced cake",
            &IntentClassification::generic(),
            Some(&user_context),
            config,
        )
        .await
        .expect("retrieval should succeed");

        assert!(
            context
                .chunks
                .iter()
                .all(|chunk| !chunk.text.to_lowercase().contains("carrot")),
            "avoided term leaked into the context"
        );
    }

    #[tokio::test]
    async fn surreal_cache_memoizes_between_runs() {
        let provider = EmbeddingProvider::new_hashed(64).expect("hashed provider");
        let db = seeded_db(&provider).await;

        let index = SurrealVectorIndex::new(Arc::clone(&db));
        let cache = SurrealEmbeddingCache::new(db);

        let mut config = RetrievalConfig::default();
        config.tuning.relevance_threshold = 0.0;

        retrieve_context(
            &index,
            &provider,
            &cache,
            "roasted squash",
            &IntentClassification::generic(),
            None,
            config,
        )
        .await
        .expect("retrieval should succeed");

        let key = common::utils::embedding::embedding_cache_key("roasted squash");
        let cached = cache.get(&key).await.expect("cache read");
        assert!(cached.is_some(), "query embedding should be memoized");
    }

    #[test]
    fn chunk_records_parse_with_sparse_metadata() {
        let records: Vec<ChunkRecord> = serde_json::from_str(
            r#"[{"text": "A passage"}, {"text": "Another", "metadata": {"source_url": "https://x"}}]"#,
        )
        .expect("records should parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metadata.content_type, "editorial");
        assert_eq!(records[1].metadata.source_url, "https://x");
    }
}
