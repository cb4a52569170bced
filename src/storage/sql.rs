/// Document-database backend over SQLite
///
/// Each record is a flattened row keyed by `(method, subject)`; the document,
/// proof and metadata columns hold unpadded base64 of their JSON encodings.
use super::{QueryRequest, Storage, StorageConfig};
use crate::{
    did::{Document, DocumentMetadata, Identifier, ProofLd},
    error::{AgentError, AgentResult},
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    FromRow, SqlitePool,
};
use std::{str::FromStr, time::Duration};

/// Row layout of the `identifiers` table
#[derive(Debug, Clone, FromRow)]
struct IdentifierRow {
    document: String,
    proof: String,
    metadata: Option<String>,
}

impl IdentifierRow {
    fn encode(id: &Identifier, proof: &ProofLd) -> AgentResult<Self> {
        let document = serde_json::to_vec(&id.document(true))
            .map_err(|e| AgentError::Internal(format!("failed to encode document: {}", e)))?;
        let proof = serde_json::to_vec(proof)
            .map_err(|e| AgentError::Internal(format!("failed to encode proof: {}", e)))?;
        let metadata = if id.metadata().is_empty() {
            None
        } else {
            let raw = serde_json::to_vec(id.metadata())
                .map_err(|e| AgentError::Internal(format!("failed to encode metadata: {}", e)))?;
            Some(STANDARD_NO_PAD.encode(raw))
        };

        Ok(Self {
            document: STANDARD_NO_PAD.encode(document),
            proof: STANDARD_NO_PAD.encode(proof),
            metadata,
        })
    }

    fn decode(self) -> AgentResult<(Identifier, ProofLd)> {
        let document: Document = decode_column(&self.document)?;
        let proof: ProofLd = decode_column(&self.proof)?;

        let mut id = Identifier::from_document(&document)?;
        if let Some(raw) = self.metadata.as_deref() {
            let metadata: DocumentMetadata = decode_column(raw)?;
            id.set_metadata(metadata);
        }
        Ok((id, proof))
    }
}

fn decode_column<T: serde::de::DeserializeOwned>(value: &str) -> AgentResult<T> {
    let raw = STANDARD_NO_PAD
        .decode(value)
        .map_err(|_| AgentError::Storage("invalid record contents".to_string()))?;
    serde_json::from_slice(&raw).map_err(|_| AgentError::Storage("invalid record contents".to_string()))
}

/// SQLite-backed store
pub struct SqlStore {
    db: SqlitePool,
    address: String,
}

impl SqlStore {
    /// Connect and run migrations. `info` is either a `sqlite:` URL or a file path.
    pub async fn open(info: &str) -> AgentResult<Self> {
        let options = if info.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(info)?
        } else {
            let path = std::path::Path::new(info);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            SqliteConnectOptions::new().filename(path)
        };

        let in_memory = info.contains(":memory:");
        let options = options
            .create_if_missing(true)
            .journal_mode(if in_memory {
                SqliteJournalMode::Memory
            } else {
                SqliteJournalMode::Wal
            })
            .busy_timeout(Duration::from_secs(5));

        let db = SqlitePoolOptions::new()
            // each in-memory connection is its own database
            .max_connections(if in_memory { 1 } else { 10 })
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations")
            .run(&db)
            .await
            .map_err(|e| AgentError::Internal(format!("Migration failed: {}", e)))?;

        Ok(Self {
            db,
            address: info.to_string(),
        })
    }

    /// Number of stored rows
    pub async fn count(&self) -> AgentResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM identifiers")
            .fetch_one(&self.db)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl Storage for SqlStore {
    async fn connect(config: &StorageConfig) -> AgentResult<Self> {
        Self::open(&config.address).await
    }

    async fn close(&self) -> AgentResult<()> {
        self.db.close().await;
        Ok(())
    }

    fn description(&self) -> String {
        format!("SQLite data store [{}]", self.address)
    }

    async fn exists(&self, id: &Identifier) -> AgentResult<bool> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM identifiers WHERE method = ?1 AND subject = ?2",
        )
        .bind(id.method())
        .bind(id.subject())
        .fetch_one(&self.db)
        .await?;
        Ok(n > 0)
    }

    async fn get(&self, req: &QueryRequest) -> AgentResult<(Identifier, ProofLd)> {
        let row: Option<IdentifierRow> = sqlx::query_as(
            "SELECT document, proof, metadata FROM identifiers WHERE method = ?1 AND subject = ?2",
        )
        .bind(&req.method)
        .bind(&req.subject)
        .fetch_optional(&self.db)
        .await?;

        row.ok_or_else(|| AgentError::NotFound("no information available".to_string()))?
            .decode()
    }

    async fn save(&self, id: &Identifier, proof: &ProofLd) -> AgentResult<String> {
        let row = IdentifierRow::encode(id, proof)?;

        sqlx::query(
            r#"
            INSERT INTO identifiers (method, subject, document, proof, metadata, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(method, subject) DO UPDATE SET
                document = excluded.document,
                proof = excluded.proof,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.method())
        .bind(id.subject())
        .bind(&row.document)
        .bind(&row.proof)
        .bind(&row.metadata)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(String::new())
    }

    async fn delete(&self, id: &Identifier) -> AgentResult<()> {
        sqlx::query("DELETE FROM identifiers WHERE method = ?1 AND subject = ?2")
            .bind(id.method())
            .bind(id.subject())
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
