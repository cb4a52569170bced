/// Blockchain client used by the account pass-through operations
///
/// The agent only relays requests here; nothing in the write/read pipeline
/// depends on a ledger being configured.
pub mod monitor;

pub use monitor::spawn_activity_monitor;

use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ALGOD_TOKEN_HEADER: &str = "X-Algo-API-Token";
const INDEXER_TOKEN_HEADER: &str = "X-Indexer-API-Token";

/// Account state as reported by the node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Account {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub amount_without_pending_rewards: u64,
    #[serde(default)]
    pub rewards: u64,
    #[serde(default)]
    pub pending_rewards: u64,
}

/// Payment details of a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgoTransaction {
    pub amount: u64,
    pub receiver: String,
    #[serde(with = "crate::ticket::bytes")]
    pub note: Vec<u8>,
}

/// Response of the account information operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInformation {
    pub status: String,
    pub balance: u64,
    pub total_rewards: u64,
    pub pending_rewards: u64,
    pub pending_transactions: Vec<AlgoTransaction>,
}

impl AccountInformation {
    pub fn new(account: Account, pending_transactions: Vec<AlgoTransaction>) -> Self {
        Self {
            status: account.status,
            balance: account.amount_without_pending_rewards,
            total_rewards: account.rewards,
            pending_rewards: account.pending_rewards,
            pending_transactions,
        }
    }
}

/// One account activity snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountActivity {
    pub current_round: u64,
    #[serde(default)]
    pub next_token: String,
}

/// Operations the agent relays to the blockchain
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn account_information(&self, address: &str) -> AgentResult<Account>;

    async fn pending_transactions(&self, address: &str) -> AgentResult<Vec<AlgoTransaction>>;

    /// Suggested parameters for new transactions, as returned by the node
    async fn suggested_params(&self) -> AgentResult<serde_json::Value>;

    /// Submit a signed transaction, returning its id
    async fn send_raw_transaction(&self, stx: &[u8]) -> AgentResult<String>;

    /// Latest indexed activity for the account
    async fn account_transactions(&self, address: &str) -> AgentResult<AccountActivity>;
}

/// REST endpoint with its API token
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url: String,
    pub token: String,
}

impl Endpoint {
    pub fn new(url: &str, token: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PendingTransactions {
    #[serde(rename = "top-transactions", default)]
    top_transactions: Vec<SignedTransaction>,
}

#[derive(Debug, Deserialize)]
struct SignedTransaction {
    txn: Transaction,
}

#[derive(Debug, Deserialize)]
struct Transaction {
    #[serde(default)]
    amt: u64,
    #[serde(default)]
    rcv: String,
    #[serde(default, with = "crate::ticket::optional_bytes")]
    note: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(rename = "txId")]
    tx_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct AccountTransactions {
    current_round: u64,
    #[serde(default)]
    next_token: Option<String>,
}

/// Algorand algod and indexer REST client
#[derive(Clone)]
pub struct AlgorandClient {
    client: reqwest::Client,
    algod: Endpoint,
    indexer: Option<Endpoint>,
}

impl AlgorandClient {
    pub fn new(algod: Endpoint, indexer: Option<Endpoint>) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("did-agent/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            algod,
            indexer,
        })
    }

    fn algod_get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.algod.url, path))
            .header(ALGOD_TOKEN_HEADER, &self.algod.token)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: Result<reqwest::Response, reqwest::Error>,
        what: &str,
    ) -> AgentResult<T> {
        let response =
            response.map_err(|e| AgentError::Ledger(format!("failed to get {}: {}", what, e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Ledger(format!(
                "failed to get {}: {} {}",
                what,
                status,
                body.trim()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AgentError::Ledger(format!("invalid {} response: {}", what, e)))
    }
}

#[async_trait]
impl Ledger for AlgorandClient {
    async fn account_information(&self, address: &str) -> AgentResult<Account> {
        let response = self
            .algod_get(&format!("/v2/accounts/{}", address))
            .send()
            .await;
        Self::read_json(response, "account information").await
    }

    async fn pending_transactions(&self, address: &str) -> AgentResult<Vec<AlgoTransaction>> {
        let response = self
            .algod_get(&format!("/v2/accounts/{}/transactions/pending", address))
            .query(&[("format", "json")])
            .send()
            .await;
        let pending: PendingTransactions = Self::read_json(response, "pending transactions").await?;

        Ok(pending
            .top_transactions
            .into_iter()
            .map(|stx| AlgoTransaction {
                amount: stx.txn.amt,
                receiver: stx.txn.rcv,
                note: stx.txn.note.unwrap_or_default(),
            })
            .collect())
    }

    async fn suggested_params(&self) -> AgentResult<serde_json::Value> {
        let response = self.algod_get("/v2/transactions/params").send().await;
        Self::read_json(response, "transaction parameters").await
    }

    async fn send_raw_transaction(&self, stx: &[u8]) -> AgentResult<String> {
        let response = self
            .client
            .post(format!("{}/v2/transactions", self.algod.url))
            .header(ALGOD_TOKEN_HEADER, &self.algod.token)
            .header(reqwest::header::CONTENT_TYPE, "application/x-binary")
            .body(stx.to_vec())
            .send()
            .await;
        let submitted: SubmitResponse = Self::read_json(response, "transaction submission").await?;
        Ok(submitted.tx_id)
    }

    async fn account_transactions(&self, address: &str) -> AgentResult<AccountActivity> {
        let indexer = self.indexer.as_ref().ok_or(AgentError::LedgerUnavailable)?;
        let response = self
            .client
            .get(format!("{}/v2/accounts/{}/transactions", indexer.url, address))
            .header(INDEXER_TOKEN_HEADER, &indexer.token)
            .send()
            .await;
        let txs: AccountTransactions = Self::read_json(response, "account activity").await?;

        Ok(AccountActivity {
            current_round: txs.current_round,
            next_token: txs.next_token.unwrap_or_default(),
        })
    }
}
