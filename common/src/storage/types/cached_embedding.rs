use crate::stored_object;

stored_object!(CachedEmbedding, "embedding_cache", {
    key: String,
    value: Vec<f32>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    expires_at: DateTime<Utc>
});

impl CachedEmbedding {
    pub fn new(key: String, value: Vec<f32>, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: key.clone(),
            created_at: now,
            updated_at: now,
            key,
            value,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
