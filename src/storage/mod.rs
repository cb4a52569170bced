/// Persistence for published DID documents
///
/// Every backend stores one record per `(method, subject)` pair holding the
/// safe document, its proof and (when known) the document metadata.
/// Backends are selected at startup from configuration and shared behind an
/// `Arc<dyn Storage>`.
pub mod ephemeral;
pub mod ipfs;
pub mod record;
pub mod sql;

pub use ephemeral::Ephemeral;
pub use ipfs::IpfsStore;
pub use record::StoredRecord;
pub use sql::SqlStore;

use crate::{
    did::{Identifier, ProofLd},
    error::{AgentError, AgentResult},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Lookup key for read operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub method: String,
    pub subject: String,
}

impl QueryRequest {
    pub fn new(method: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            subject: subject.into(),
        }
    }

    /// Storage key `method:subject`
    pub fn key(&self) -> String {
        format!("{}:{}", self.method, self.subject)
    }
}

/// Storage backend trait
///
/// Backends are opened from a [`StorageConfig`] through `connect` and are
/// responsible for their own internal synchronization.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepare the backend for use, connecting to whatever it needs
    async fn connect(config: &StorageConfig) -> AgentResult<Self>
    where
        Self: Sized;

    /// Free resources and finish processing
    async fn close(&self) -> AgentResult<()>;

    /// Brief summary of the backend
    fn description(&self) -> String;

    /// Check if a record exists for the identifier
    async fn exists(&self, id: &Identifier) -> AgentResult<bool>;

    /// Return a previously stored identifier and its proof
    async fn get(&self, req: &QueryRequest) -> AgentResult<(Identifier, ProofLd)>;

    /// Create or update the record, returning an opaque locator (may be empty)
    async fn save(&self, id: &Identifier, proof: &ProofLd) -> AgentResult<String>;

    /// Remove any existing record for the identifier
    async fn delete(&self, id: &Identifier) -> AgentResult<()>;
}

/// Available storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Ephemeral,
    Sqlite,
    Ipfs,
}

impl StorageKind {
    /// Whether the backend needs a connection address
    pub fn requires_address(&self) -> bool {
        !matches!(self, StorageKind::Ephemeral)
    }
}

impl FromStr for StorageKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ephemeral" | "memory" => Ok(StorageKind::Ephemeral),
            "sqlite" | "sql" => Ok(StorageKind::Sqlite),
            "ipfs" => Ok(StorageKind::Ipfs),
            other => Err(AgentError::Validation(format!(
                "unknown storage kind: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Ephemeral => write!(f, "ephemeral"),
            StorageKind::Sqlite => write!(f, "sqlite"),
            StorageKind::Ipfs => write!(f, "ipfs"),
        }
    }
}

/// Configuration for the storage backend
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// Connection info: database URL, IPFS API endpoint or local directory
    pub address: String,

    /// Naming record for the content-addressed index
    pub index_name: String,

    /// Daemon keystore entry the index is published with
    pub publish_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Ephemeral,
            address: String::new(),
            index_name: ipfs::DEFAULT_INDEX_NAME.to_string(),
            publish_key: ipfs::DEFAULT_PUBLISH_KEY.to_string(),
        }
    }
}

/// Open the configured backend
pub async fn connect(config: &StorageConfig) -> AgentResult<Arc<dyn Storage>> {
    let store: Arc<dyn Storage> = match config.kind {
        StorageKind::Ephemeral => Arc::new(Ephemeral::connect(config).await?),
        StorageKind::Sqlite => Arc::new(SqlStore::connect(config).await?),
        StorageKind::Ipfs => Arc::new(IpfsStore::connect(config).await?),
    };
    tracing::info!(backend = %store.description(), "storage ready");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parsing() {
        assert_eq!("ephemeral".parse::<StorageKind>().unwrap(), StorageKind::Ephemeral);
        assert_eq!("SQLite".parse::<StorageKind>().unwrap(), StorageKind::Sqlite);
        assert_eq!(" ipfs ".parse::<StorageKind>().unwrap(), StorageKind::Ipfs);
        assert!("mongodb".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_query_key() {
        assert_eq!(QueryRequest::new("algo", "abc").key(), "algo:abc");
    }

    #[tokio::test]
    async fn test_connect_ephemeral() {
        let store = connect(&StorageConfig::default()).await.unwrap();
        assert_eq!(store.description(), "Ephemeral in-memory data store");
    }
}
