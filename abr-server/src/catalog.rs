//! Stored-ladder source of truth
//!
//! The catalog persists operator-configured variant ladders. The session
//! core reads a ladder at start time and never writes enable/disable
//! toggles back; those live only in the in-memory session snapshot.

use std::collections::HashMap;

use abr_policy::QualityVariant;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AbrError;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Stored ladder for a stream, or `None` if the stream is unknown.
    async fn load_ladder(&self, stream_id: &str) -> Result<Option<Vec<QualityVariant>>, AbrError>;
}

/// In-memory catalog, used by tests and the standalone daemon.
#[derive(Default)]
pub struct MemoryCatalog {
    ladders: RwLock<HashMap<String, Vec<QualityVariant>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, stream_id: &str, ladder: Vec<QualityVariant>) {
        self.ladders
            .write()
            .await
            .insert(stream_id.to_string(), ladder);
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn load_ladder(&self, stream_id: &str) -> Result<Option<Vec<QualityVariant>>, AbrError> {
        Ok(self.ladders.read().await.get(stream_id).cloned())
    }
}
