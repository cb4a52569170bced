/// Configuration management for the DID agent
use crate::{
    error::{AgentError, AgentResult},
    handler::UpdatePolicy,
    storage::{
        ipfs::{DEFAULT_INDEX_NAME, DEFAULT_PUBLISH_KEY},
        StorageConfig, StorageKind,
    },
    ticket::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY},
};
use std::env;
use std::time::Duration;

/// Main agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub service: ServiceConfig,
    pub agent: AgentSettings,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
}

/// Network settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Supported DID methods
    pub methods: Vec<String>,
    /// Proof-of-work difficulty for tickets
    pub difficulty: u32,
    pub update_policy: UpdatePolicy,
    /// Poll period for account activity monitors
    pub monitor_interval: Duration,
}

/// Optional blockchain endpoints
#[derive(Debug, Clone, Default)]
pub struct LedgerConfig {
    pub algod_url: Option<String>,
    pub algod_token: String,
    pub indexer_url: Option<String>,
    pub indexer_token: String,
}

impl AgentConfig {
    /// Load configuration from environment variables (and `.env`)
    pub fn from_env() -> AgentResult<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_vars<F>(var: F) -> AgentResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let hostname = var("AGENT_HOSTNAME").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = var("AGENT_PORT")
            .unwrap_or_else(|| "9090".to_string())
            .parse()
            .map_err(|_| AgentError::Validation("Invalid port number".to_string()))?;

        let methods = var("AGENT_METHODS")
            .unwrap_or_else(|| "algo".to_string())
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        let difficulty = var("AGENT_POW")
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|_| AgentError::Validation("Invalid proof-of-work difficulty".to_string()))?
            .unwrap_or(DEFAULT_DIFFICULTY);
        let update_policy = var("AGENT_UPDATE_POLICY")
            .map(|v| v.parse::<UpdatePolicy>())
            .transpose()?
            .unwrap_or_default();
        let monitor_interval = var("AGENT_MONITOR_INTERVAL")
            .unwrap_or_else(|| "5".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| AgentError::Validation("Invalid monitor interval".to_string()))?;

        let kind: StorageKind = var("AGENT_STORAGE_KIND")
            .unwrap_or_else(|| "ephemeral".to_string())
            .parse()?;
        let address = var("AGENT_STORAGE_ADDR").unwrap_or_default();
        let index_name =
            var("AGENT_IPFS_INDEX_NAME").unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());
        let publish_key =
            var("AGENT_IPFS_PUBLISH_KEY").unwrap_or_else(|| DEFAULT_PUBLISH_KEY.to_string());

        let ledger = LedgerConfig {
            algod_url: var("AGENT_ALGOD_URL").filter(|v| !v.is_empty()),
            algod_token: var("AGENT_ALGOD_TOKEN").unwrap_or_default(),
            indexer_url: var("AGENT_INDEXER_URL").filter(|v| !v.is_empty()),
            indexer_token: var("AGENT_INDEXER_TOKEN").unwrap_or_default(),
        };

        Ok(Self {
            service: ServiceConfig {
                hostname,
                port,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            agent: AgentSettings {
                methods,
                difficulty,
                update_policy,
                monitor_interval,
            },
            storage: StorageConfig {
                kind,
                address,
                index_name,
                publish_key,
            },
            ledger,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AgentResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AgentError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.agent.methods.is_empty() {
            return Err(AgentError::Validation(
                "At least one DID method must be supported".to_string(),
            ));
        }

        if self.agent.difficulty > MAX_DIFFICULTY {
            return Err(AgentError::Validation(format!(
                "Difficulty can't exceed {} bits",
                MAX_DIFFICULTY
            )));
        }

        if self.agent.monitor_interval.is_zero() {
            return Err(AgentError::Validation(
                "Monitor interval must be at least one second".to_string(),
            ));
        }

        if self.storage.kind.requires_address() && self.storage.address.is_empty() {
            return Err(AgentError::Validation(format!(
                "Storage '{}' requires AGENT_STORAGE_ADDR",
                self.storage.kind
            )));
        }

        if self.ledger.indexer_url.is_some() && self.ledger.algod_url.is_none() {
            return Err(AgentError::Validation(
                "AGENT_INDEXER_URL requires AGENT_ALGOD_URL".to_string(),
            ));
        }

        Ok(())
    }

    /// Address to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.hostname, self.service.port)
    }
}
