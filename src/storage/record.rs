/// Serialized form shared by the persistent backends
use crate::{
    did::{Document, DocumentMetadata, Identifier, ProofLd},
    error::{AgentError, AgentResult},
};
use serde::{Deserialize, Serialize};

/// Stored document, proof and metadata for one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub document: Document,
    pub proof: ProofLd,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
}

impl StoredRecord {
    /// Capture the safe document of `id`; private keys never reach storage
    pub fn new(id: &Identifier, proof: &ProofLd) -> Self {
        let metadata = if id.metadata().is_empty() {
            None
        } else {
            Some(id.metadata().clone())
        };
        Self {
            document: id.document(true),
            proof: proof.clone(),
            metadata,
        }
    }

    /// Restore the identifier (with metadata) and proof
    pub fn into_parts(self) -> AgentResult<(Identifier, ProofLd)> {
        let mut id = Identifier::from_document(&self.document)
            .map_err(|e| AgentError::Storage(format!("invalid record contents: {}", e)))?;
        if let Some(metadata) = self.metadata {
            id.set_metadata(metadata);
        }
        Ok((id, self.proof))
    }

    pub fn to_json(&self) -> AgentResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| AgentError::Internal(format!("failed to encode record: {}", e)))
    }

    pub fn from_json(data: &[u8]) -> AgentResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| AgentError::Storage(format!("invalid record contents: {}", e)))
    }
}
