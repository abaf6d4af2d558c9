use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Content type assigned to chunks whose source metadata carried none.
pub const DEFAULT_CONTENT_TYPE: &str = "editorial";

/// Provenance and typing metadata attached to an indexed chunk.
///
/// Absent fields are defaulted here, at the deserialization boundary, so the
/// pipeline never has to reason about missing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkMetadata {
    #[serde(deserialize_with = "default_content_type_on_empty")]
    pub content_type: String,
    pub source_url: String,
    pub page_title: String,
    pub product_sku: Option<String>,
    pub product_category: Option<String>,
    pub recipe_category: Option<String>,
    pub image_url: Option<String>,
    /// RFC 3339 timestamp of when the chunk was indexed. Kept as a raw
    /// string; parse failures downgrade to "unknown freshness" downstream.
    pub indexed_at: Option<String>,
}

impl Default for ChunkMetadata {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            source_url: String::new(),
            page_title: String::new(),
            product_sku: None,
            product_category: None,
            recipe_category: None,
            image_url: None,
            indexed_at: None,
        }
    }
}

fn default_content_type_on_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => DEFAULT_CONTENT_TYPE.to_owned(),
    })
}

impl ChunkMetadata {
    /// Category bucket used by diversity enforcement.
    pub fn category(&self) -> &str {
        self.recipe_category
            .as_deref()
            .or(self.product_category.as_deref())
            .filter(|category| !category.is_empty())
            .unwrap_or("other")
    }
}

/// A retrievable passage with its similarity score and provenance.
///
/// `score` starts as the raw index similarity in [0, 1]; the ranking engine
/// replaces it with the final pipeline score before assembly. `id`, `text`
/// and `metadata` are never modified after the index returns them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagChunk {
    pub id: String,
    pub score: f32,
    pub text: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
}

/// Knobs for a single nearest-neighbour query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub top_k: usize,
    /// Advisory content-type filter; implementations may ignore it.
    pub content_types: Option<Vec<String>>,
}

/// Approximate nearest-neighbour search over the brand content index.
///
/// The engine treats this as an external collaborator: failures propagate as
/// retrieval failures, they are never masked as empty result sets.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        embedding: &[f32],
        options: &QueryOptions,
    ) -> Result<Vec<RagChunk>, AppError>;
}

/// Maps a knn distance onto a similarity score in [0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 / (1.0 + distance.max(0.0))).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similarity_is_bounded_and_monotonic() {
        assert!((distance_to_similarity(0.0) - 1.0).abs() < f32::EPSILON);
        assert!(distance_to_similarity(0.5) > distance_to_similarity(2.0));
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
        assert_eq!(distance_to_similarity(-3.0), 1.0);
    }

    #[test]
    fn missing_metadata_fields_default() {
        let chunk: RagChunk = serde_json::from_str(
            r#"{"id": "c1", "score": 0.9, "text": "Some passage"}"#,
        )
        .expect("chunk without metadata should deserialize");
        assert_eq!(chunk.metadata.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(chunk.metadata.source_url, "");
        assert!(chunk.metadata.indexed_at.is_none());
    }

    #[test]
    fn empty_content_type_defaults_to_editorial() {
        let metadata: ChunkMetadata =
            serde_json::from_str(r#"{"content_type": "  ", "source_url": "https://a"}"#)
                .expect("metadata should deserialize");
        assert_eq!(metadata.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn category_prefers_recipe_over_product() {
        let metadata = ChunkMetadata {
            recipe_category: Some("desserts".into()),
            product_category: Some("baking".into()),
            ..ChunkMetadata::default()
        };
        assert_eq!(metadata.category(), "desserts");

        let metadata = ChunkMetadata {
            product_category: Some("baking".into()),
            ..ChunkMetadata::default()
        };
        assert_eq!(metadata.category(), "baking");

        assert_eq!(ChunkMetadata::default().category(), "other");
    }
}
