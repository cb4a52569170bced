/// Content-addressed nodes
///
/// `KuboNode` talks to the HTTP RPC API of an IPFS daemon. `LocalNode` keeps
/// blocks in a sharded directory tree for single-host deployments and tests.
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::fs;

/// Timeout for regular node calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for naming record publication
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(120);

/// Keystore entry of the daemon's own identity
pub const DEFAULT_PUBLISH_KEY: &str = "self";

/// Minimal surface of a content-addressed store with mutable names
#[async_trait]
pub trait ContentNode: Send + Sync {
    /// Node version; also used as a connectivity check
    async fn version(&self) -> AgentResult<String>;

    /// Store immutable content, returning its address
    async fn add(&self, data: Vec<u8>) -> AgentResult<String>;

    /// Read content by address
    async fn cat(&self, cid: &str) -> AgentResult<Vec<u8>>;

    /// Current address behind a naming record, `None` if it was never published
    async fn resolve(&self, name: &str) -> AgentResult<Option<String>>;

    /// Point a naming record at `cid`
    async fn publish(&self, name: &str, cid: &str) -> AgentResult<()>;
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    #[serde(rename = "Version")]
    version: String,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Debug, Deserialize)]
struct ResolveResponse {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Message")]
    message: String,
}

/// IPFS daemon reached over its HTTP RPC API (`/api/v0`)
///
/// Names are resolved as given (DNSLink domain or IPNS key id) and
/// publication goes to the daemon's `publish_key`, which the name is
/// expected to point at.
#[derive(Clone)]
pub struct KuboNode {
    client: reqwest::Client,
    api: String,
    publish_key: String,
}

impl KuboNode {
    pub fn new(address: &str) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("did-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api: format!("{}/api/v0", address.trim_end_matches('/')),
            publish_key: DEFAULT_PUBLISH_KEY.to_string(),
        })
    }

    /// Use a named keystore entry for publication instead of `self`
    pub fn with_publish_key(mut self, key: &str) -> Self {
        self.publish_key = key.to_string();
        self
    }

    async fn call(
        &self,
        command: &str,
        query: &[(&str, &str)],
        form: Option<Form>,
        timeout: Option<Duration>,
    ) -> AgentResult<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/{}", self.api, command))
            .query(query);
        if let Some(form) = form {
            request = request.multipart(form);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Storage(format!("IPFS request '{}' failed: {}", command, e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let message = match response.json::<ApiError>().await {
            Ok(err) => err.message,
            Err(_) => status.to_string(),
        };
        Err(AgentError::Storage(format!(
            "IPFS request '{}' failed: {}",
            command, message
        )))
    }
}

#[async_trait]
impl ContentNode for KuboNode {
    async fn version(&self) -> AgentResult<String> {
        let res: VersionResponse = self
            .call("version", &[], None, None)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Storage(format!("invalid version response: {}", e)))?;
        Ok(res.version)
    }

    async fn add(&self, data: Vec<u8>) -> AgentResult<String> {
        let form = Form::new().part("file", Part::bytes(data).file_name("record"));
        let res: AddResponse = self
            .call("add", &[("cid-version", "1"), ("pin", "true")], Some(form), None)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::Storage(format!("invalid add response: {}", e)))?;
        Ok(res.hash)
    }

    async fn cat(&self, cid: &str) -> AgentResult<Vec<u8>> {
        let bytes = self
            .call("cat", &[("arg", cid)], None, None)
            .await?
            .bytes()
            .await
            .map_err(|e| AgentError::Storage(format!("failed to read record from IPFS: {}", e)))?;
        Ok(bytes.to_vec())
    }

    async fn resolve(&self, name: &str) -> AgentResult<Option<String>> {
        let res = match self.call("name/resolve", &[("arg", name)], None, None).await {
            Ok(res) => res,
            Err(AgentError::Storage(msg)) if msg.contains("could not resolve") => return Ok(None),
            Err(e) => return Err(e),
        };
        let res: ResolveResponse = res
            .json()
            .await
            .map_err(|e| AgentError::Storage(format!("invalid resolve response: {}", e)))?;
        Ok(Some(strip_ipfs_prefix(&res.path).to_string()))
    }

    async fn publish(&self, name: &str, cid: &str) -> AgentResult<()> {
        let path = format!("/ipfs/{}", cid);
        self.call(
            "name/publish",
            &[("arg", path.as_str()), ("key", self.publish_key.as_str())],
            None,
            Some(PUBLISH_TIMEOUT),
        )
        .await?;
        tracing::debug!(name, cid, key = %self.publish_key, "naming record published");
        Ok(())
    }
}

fn strip_ipfs_prefix(path: &str) -> &str {
    path.strip_prefix("/ipfs/").unwrap_or(path)
}

/// Directory-backed node
///
/// Blocks live under `{root}/blocks/{shard}/{cid}`, naming records under
/// `{root}/names/{name}`.
#[derive(Clone)]
pub struct LocalNode {
    root: PathBuf,
}

const CID_PREFIX: &str = "bafkrei";

impl LocalNode {
    pub async fn open(root: impl Into<PathBuf>) -> AgentResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("blocks")).await?;
        fs::create_dir_all(root.join("names")).await?;
        Ok(Self { root })
    }

    fn calculate_cid(data: &[u8]) -> String {
        format!("{}{}", CID_PREFIX, hex::encode(Sha256::digest(data)))
    }

    /// Shard on the first two digest characters, after the fixed prefix
    fn block_path(&self, cid: &str) -> PathBuf {
        let shard = cid
            .strip_prefix(CID_PREFIX)
            .and_then(|rest| rest.get(0..2))
            .unwrap_or("_");
        self.root.join("blocks").join(shard).join(cid)
    }

    fn name_path(&self, name: &str) -> PathBuf {
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        self.root.join("names").join(file)
    }
}

#[async_trait]
impl ContentNode for LocalNode {
    async fn version(&self) -> AgentResult<String> {
        Ok(format!("local-{}", env!("CARGO_PKG_VERSION")))
    }

    async fn add(&self, data: Vec<u8>) -> AgentResult<String> {
        let cid = Self::calculate_cid(&data);
        let path = self.block_path(&cid);
        if fs::try_exists(&path).await? {
            return Ok(cid);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        write_atomic(&path, &data).await?;
        Ok(cid)
    }

    async fn cat(&self, cid: &str) -> AgentResult<Vec<u8>> {
        match fs::read(self.block_path(cid)).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AgentError::NotFound(format!("no content for {}", cid)))
            }
            Err(e) => Err(AgentError::Storage(format!("failed to read block {}: {}", cid, e))),
        }
    }

    async fn resolve(&self, name: &str) -> AgentResult<Option<String>> {
        match fs::read_to_string(self.name_path(name)).await {
            Ok(cid) => Ok(Some(cid.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn publish(&self, name: &str, cid: &str) -> AgentResult<()> {
        write_atomic(&self.name_path(name), cid.as_bytes()).await
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> AgentResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", rand::random::<u32>()));
    fs::write(&tmp, data).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}
