/// Application context and dependency injection
use crate::{
    config::AgentConfig,
    error::AgentResult,
    handler::{Handler, HandlerOptions},
    ledger::{AlgorandClient, Endpoint, Ledger},
    storage,
};
use std::sync::Arc;
use tracing::info;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AgentConfig>,
    pub handler: Arc<Handler>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: AgentConfig) -> AgentResult<Self> {
        config.validate()?;

        let store = storage::connect(&config.storage).await?;
        let ledger = Self::ledger_client(&config)?;
        if ledger.is_none() {
            info!("no ledger endpoints configured, account operations disabled");
        }

        let handler = Handler::new(HandlerOptions {
            methods: config.agent.methods.clone(),
            difficulty: config.agent.difficulty,
            update_policy: config.agent.update_policy,
            store,
            ledger,
            monitor_interval: config.agent.monitor_interval,
        });

        Ok(Self::with_handler(config, handler))
    }

    /// Wrap an existing handler
    pub fn with_handler(config: AgentConfig, handler: Handler) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
        }
    }

    fn ledger_client(config: &AgentConfig) -> AgentResult<Option<Arc<dyn Ledger>>> {
        let Some(algod_url) = config.ledger.algod_url.as_deref() else {
            return Ok(None);
        };
        let algod = Endpoint::new(algod_url, &config.ledger.algod_token);
        let indexer = config
            .ledger
            .indexer_url
            .as_deref()
            .map(|url| Endpoint::new(url, &config.ledger.indexer_token));

        info!(algod = %algod.url, indexer = ?indexer.as_ref().map(|e| &e.url), "ledger client configured");
        Ok(Some(Arc::new(AlgorandClient::new(algod, indexer)?)))
    }
}
