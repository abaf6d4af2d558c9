pub mod db;
pub mod embedding_cache;
pub mod types;
pub mod vector_index;
