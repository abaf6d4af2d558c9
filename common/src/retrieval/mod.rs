pub mod cache;
pub mod index;
pub mod intent;
pub mod user_context;

pub use cache::{EmbeddingCache, MemoryCache};
pub use index::{ChunkMetadata, QueryOptions, RagChunk, VectorIndex};
pub use intent::{IntentClassification, IntentEntities, IntentType};
pub use user_context::UserContext;
