/// In-memory storage backend for development and tests
use super::{QueryRequest, Storage, StorageConfig};
use crate::{
    did::{Identifier, ProofLd},
    error::{AgentError, AgentResult},
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Mutex-guarded map from `method:subject` to the stored identifier and proof.
/// Nothing survives a restart; `close` drops every entry.
#[derive(Default)]
pub struct Ephemeral {
    entries: Mutex<HashMap<String, (Identifier, ProofLd)>>,
}

impl Ephemeral {
    pub fn open() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl Storage for Ephemeral {
    async fn connect(_config: &StorageConfig) -> AgentResult<Self> {
        Ok(Self::open())
    }

    async fn close(&self) -> AgentResult<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    fn description(&self) -> String {
        "Ephemeral in-memory data store".to_string()
    }

    async fn exists(&self, id: &Identifier) -> AgentResult<bool> {
        Ok(self.entries.lock().await.contains_key(&id.key()))
    }

    async fn get(&self, req: &QueryRequest) -> AgentResult<(Identifier, ProofLd)> {
        self.entries
            .lock()
            .await
            .get(&req.key())
            .cloned()
            .ok_or_else(|| AgentError::NotFound("no information available".to_string()))
    }

    async fn save(&self, id: &Identifier, proof: &ProofLd) -> AgentResult<String> {
        // Keep only the public view, like every other backend
        let mut stored = Identifier::from_document(&id.document(true))?;
        stored.set_metadata(id.metadata().clone());

        self.entries
            .lock()
            .await
            .insert(id.key(), (stored, proof.clone()));
        Ok(String::new())
    }

    async fn delete(&self, id: &Identifier) -> AgentResult<()> {
        self.entries.lock().await.remove(&id.key());
        Ok(())
    }
}
