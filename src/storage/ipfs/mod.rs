/// Content-addressed storage backend
///
/// Records are immutable blobs on a content node. A mutable index maps each
/// `method:subject` key to its latest record address, and the index itself is
/// published under a naming record after every update. Publication runs in
/// the background; until the naming record catches up the freshly uploaded
/// index is kept as `pending` and used for reads.
pub mod index;
pub mod node;

pub use index::Index;
pub use node::{ContentNode, KuboNode, LocalNode, DEFAULT_PUBLISH_KEY};

use super::{QueryRequest, Storage, StorageConfig, StoredRecord};
use crate::{
    did::{Identifier, ProofLd},
    error::{AgentError, AgentResult},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

/// Default naming record for the index
pub const DEFAULT_INDEX_NAME: &str = "did-agent.index";

#[derive(Debug, Default)]
struct IndexPointer {
    /// Last address obtained from the naming record
    resolved: Option<String>,
    /// Uploaded but not yet visible through the naming record
    pending: Option<String>,
    /// Naming record value the pending chain was built on
    base: Option<String>,
    /// Every index uploaded since `base`
    uploads: Vec<String>,
    /// Incremented for every uploaded index
    generation: u64,
}

impl IndexPointer {
    /// Whether `resolved` is `base` or one of our own uploads, i.e. nobody
    /// else has published since the pending chain started
    fn follows(&self, resolved: &Option<String>) -> bool {
        *resolved == self.base
            || resolved
                .as_ref()
                .map_or(false, |address| self.uploads.contains(address))
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.base = None;
        self.uploads.clear();
    }
}

pub struct IpfsStore {
    node: Arc<dyn ContentNode>,
    address: String,
    index_name: String,
    pointer: Arc<RwLock<IndexPointer>>,
    // serializes index read-modify-write within this process
    update_lock: Mutex<()>,
    // generation of the last published index; older publishes are skipped
    published: Arc<Mutex<u64>>,
}

impl IpfsStore {
    /// Connect to the node at `address`: an `http(s)://` IPFS API endpoint, or
    /// a local directory otherwise. Publishes with the node's own key.
    pub async fn open(address: &str, index_name: &str) -> AgentResult<Self> {
        let node = Self::node_for(address, DEFAULT_PUBLISH_KEY).await?;
        Self::with_node(node, address, index_name).await
    }

    async fn node_for(address: &str, publish_key: &str) -> AgentResult<Arc<dyn ContentNode>> {
        if address.starts_with("http://") || address.starts_with("https://") {
            Ok(Arc::new(KuboNode::new(address)?.with_publish_key(publish_key)))
        } else {
            Ok(Arc::new(LocalNode::open(address).await?))
        }
    }

    /// Use an already constructed node
    pub async fn with_node(
        node: Arc<dyn ContentNode>,
        address: &str,
        index_name: &str,
    ) -> AgentResult<Self> {
        let version = node
            .version()
            .await
            .map_err(|e| AgentError::Storage(format!("failed to connect to IPFS server: {}", e)))?;
        debug!(%version, address, "connected to content node");

        Ok(Self {
            node,
            address: address.to_string(),
            index_name: index_name.to_string(),
            pointer: Arc::new(RwLock::new(IndexPointer::default())),
            update_lock: Mutex::new(()),
            published: Arc::new(Mutex::new(0)),
        })
    }

    /// Current index address. The naming record is resolved on every call; an
    /// unpublished local upload wins only while the record still points at
    /// the chain it was built on. Falls back to local state when the lookup fails.
    async fn index_address(&self) -> AgentResult<Option<String>> {
        let resolved = self.node.resolve(&self.index_name).await;
        let mut pointer = self.pointer.write().await;

        match resolved {
            Ok(address) => {
                if pointer.pending.is_some() {
                    if pointer.follows(&address) {
                        return Ok(pointer.pending.clone());
                    }
                    warn!(
                        resolved = ?address,
                        pending = ?pointer.pending,
                        "index published elsewhere, dropping unpublished update"
                    );
                    pointer.clear_pending();
                }
                pointer.resolved = address.clone();
                Ok(address)
            }
            Err(e) => {
                if let Some(pending) = pointer.pending.clone() {
                    warn!(error = %e, "failed to resolve index entry, using pending address");
                    return Ok(Some(pending));
                }
                match pointer.resolved.clone() {
                    Some(cached) => {
                        warn!(error = %e, "failed to resolve index entry, using cached address");
                        Ok(Some(cached))
                    }
                    None => Err(AgentError::Storage(format!(
                        "failed to resolve index entry: {}",
                        e
                    ))),
                }
            }
        }
    }

    /// Index contents and the address they were read from
    async fn load_index(&self) -> AgentResult<(Option<String>, Index)> {
        match self.index_address().await? {
            None => Ok((None, Index::default())),
            Some(address) => {
                let contents = self.node.cat(&address).await?;
                let index = Index::parse(&String::from_utf8_lossy(&contents));
                Ok((Some(address), index))
            }
        }
    }

    async fn update_index(&self, key: &str, cid: &str) -> AgentResult<()> {
        let _guard = self.update_lock.lock().await;

        let (loaded_from, mut index) = self
            .load_index()
            .await
            .map_err(|e| AgentError::Storage(format!("failed to open index handler: {}", e)))?;
        index.insert(key, cid)?;

        let index_cid = self
            .node
            .add(index.render().into_bytes())
            .await
            .map_err(|e| AgentError::Storage(format!("failed to update index contents: {}", e)))?;
        let generation = {
            let mut pointer = self.pointer.write().await;
            if pointer.pending.is_none() {
                pointer.base = loaded_from;
                pointer.uploads.clear();
            }
            pointer.uploads.push(index_cid.clone());
            pointer.pending = Some(index_cid.clone());
            pointer.generation += 1;
            pointer.generation
        };

        let node = Arc::clone(&self.node);
        let pointer = Arc::clone(&self.pointer);
        let published = Arc::clone(&self.published);
        let name = self.index_name.clone();
        tokio::spawn(async move {
            let mut last = published.lock().await;
            if *last >= generation {
                return;
            }
            // dropped in favor of an index published elsewhere
            if !pointer.read().await.uploads.contains(&index_cid) {
                return;
            }
            match node.publish(&name, &index_cid).await {
                Ok(()) => {
                    *last = generation;
                    let mut pointer = pointer.write().await;
                    pointer.resolved = Some(index_cid.clone());
                    if pointer.generation == generation {
                        pointer.clear_pending();
                    }
                }
                Err(e) => error!(error = %e, index = %index_cid, "index publish failed"),
            }
        });
        Ok(())
    }
}

#[async_trait]
impl Storage for IpfsStore {
    async fn connect(config: &StorageConfig) -> AgentResult<Self> {
        let node = Self::node_for(&config.address, &config.publish_key).await?;
        Self::with_node(node, &config.address, &config.index_name).await
    }

    async fn close(&self) -> AgentResult<()> {
        Ok(())
    }

    fn description(&self) -> String {
        format!("IPFS data store [{}]", self.address)
    }

    async fn exists(&self, id: &Identifier) -> AgentResult<bool> {
        let (_, index) = self.load_index().await?;
        Ok(index.contains(&id.key()))
    }

    async fn get(&self, req: &QueryRequest) -> AgentResult<(Identifier, ProofLd)> {
        let (_, index) = self.load_index().await?;
        let cid = index
            .get(&req.key())
            .ok_or_else(|| AgentError::NotFound("no details for the requested DID".to_string()))?;

        let contents = self.node.cat(cid).await.map_err(|e| match e {
            AgentError::NotFound(_) => AgentError::Storage(format!("record {} is missing", cid)),
            other => other,
        })?;
        let (id, proof) = StoredRecord::from_json(&contents)?.into_parts()?;

        if id.key() != req.key() {
            return Err(AgentError::Storage(format!(
                "record {} does not belong to {}",
                cid,
                req.key()
            )));
        }
        Ok((id, proof))
    }

    async fn save(&self, id: &Identifier, proof: &ProofLd) -> AgentResult<String> {
        let data = StoredRecord::new(id, proof).to_json()?;
        let cid = self.node.add(data).await?;
        self.update_index(&id.key(), &cid).await?;
        debug!(method = id.method(), subject = id.subject(), %cid, "record stored");
        Ok(format!("/ipfs/{}", cid))
    }

    async fn delete(&self, _id: &Identifier) -> AgentResult<()> {
        Err(AgentError::ImmutableRecord("IPFS".to_string()))
    }
}
