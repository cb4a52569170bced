/// Write/read pipeline for DID documents
///
/// Writes are admitted only through a solved and signed [`Ticket`]; reads are
/// plain lookups restricted to the supported methods. Account operations are
/// relayed to the configured ledger client.
use crate::{
    did::{Identifier, ProofLd},
    error::{AgentError, AgentResult},
    ledger::{self, AccountActivity, AccountInformation, Ledger},
    storage::{QueryRequest, Storage},
    ticket::{pow, Ticket, TicketError},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc, time::Duration};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// How updates to an existing record are authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// The incoming document authorizes itself; the ticket is verified again
    #[default]
    SelfAsserted,
    /// The ticket key must also exist, with the same public key, on the
    /// stored record
    StoredKeys,
}

impl FromStr for UpdatePolicy {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "self" | "self-asserted" => Ok(UpdatePolicy::SelfAsserted),
            "stored" | "stored-keys" => Ok(UpdatePolicy::StoredKeys),
            other => Err(AgentError::Validation(format!("unknown update policy: {}", other))),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::SelfAsserted => write!(f, "self"),
            UpdatePolicy::StoredKeys => write!(f, "stored"),
        }
    }
}

/// Write request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub ticket: Option<Ticket>,
    /// Free-form client label, only logged
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task: String,
}

impl ProcessRequest {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket: Some(ticket),
            task: String::new(),
        }
    }
}

/// Settings for a handler instance
#[derive(Clone)]
pub struct HandlerOptions {
    /// Supported DID methods
    pub methods: Vec<String>,
    /// Proof-of-work difficulty; 0 selects the default
    pub difficulty: u32,
    pub update_policy: UpdatePolicy,
    pub store: Arc<dyn Storage>,
    pub ledger: Option<Arc<dyn Ledger>>,
    /// Poll period of account activity monitors
    pub monitor_interval: Duration,
}

impl HandlerOptions {
    pub fn new(methods: Vec<String>, store: Arc<dyn Storage>) -> Self {
        Self {
            methods,
            difficulty: pow::DEFAULT_DIFFICULTY,
            update_policy: UpdatePolicy::default(),
            store,
            ledger: None,
            monitor_interval: Duration::from_secs(5),
        }
    }
}

pub struct Handler {
    methods: Vec<String>,
    difficulty: u32,
    update_policy: UpdatePolicy,
    store: Arc<dyn Storage>,
    ledger: Option<Arc<dyn Ledger>>,
    monitor_interval: Duration,
}

impl Handler {
    pub fn new(options: HandlerOptions) -> Self {
        Self {
            methods: options.methods,
            difficulty: pow::effective_difficulty(options.difficulty),
            update_policy: options.update_policy,
            store: options.store,
            ledger: options.ledger,
            monitor_interval: options.monitor_interval,
        }
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Effective difficulty required from tickets
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub fn is_supported(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }

    /// Close the instance and the underlying store
    pub async fn close(&self) -> AgentResult<()> {
        info!("closing agent handler");
        self.store.close().await
    }

    /// Retrieve an existing DID instance
    pub async fn retrieve(&self, req: &QueryRequest) -> AgentResult<(Identifier, ProofLd)> {
        debug!(method = %req.method, subject = %req.subject, "retrieve request");

        if !self.is_supported(&req.method) {
            warn!(method = %req.method, subject = %req.subject, "non supported method");
            return Err(AgentError::UnsupportedMethod);
        }

        self.store.get(req).await.map_err(|e| {
            warn!(method = %req.method, subject = %req.subject, error = %e, "retrieve failed");
            e
        })
    }

    /// Verify and persist the document carried by the request ticket.
    /// Returns the storage locator, which may be empty.
    pub async fn process(&self, req: &ProcessRequest) -> AgentResult<String> {
        let ticket = req.ticket.as_ref().ok_or(AgentError::EmptyRequest)?;

        if let Err(e) = ticket.verify(self.difficulty) {
            error!(error = %e, "invalid ticket");
            return Err(e.into());
        }

        let id = ticket.get_did().map_err(|e| {
            error!(error = %e, "invalid DID contents");
            e
        })?;
        let proof = ticket.get_proof_ld().map_err(|e| {
            error!(error = %e, "invalid DID proof");
            e
        })?;

        if !self.is_supported(id.method()) {
            warn!(method = id.method(), "non supported method");
            return Err(AgentError::UnsupportedMethod);
        }

        // updates are checked again before overwriting the existing record
        let is_update = self.store.exists(&id).await?;
        if is_update {
            self.authorize_update(ticket, &id).await?;
        }

        debug!(
            subject = id.subject(),
            update = is_update,
            task = %req.task,
            "write operation"
        );
        self.store.save(&id, &proof).await
    }

    async fn authorize_update(&self, ticket: &Ticket, id: &Identifier) -> AgentResult<()> {
        if let Err(e) = ticket.verify(self.difficulty) {
            error!(error = %e, "invalid ticket");
            return Err(e.into());
        }

        if self.update_policy == UpdatePolicy::StoredKeys {
            let (stored, _) = self
                .store
                .get(&QueryRequest::new(id.method(), id.subject()))
                .await?;
            let incoming = id
                .verification_method(&ticket.key_id)
                .ok_or(TicketError::KeyNotAvailable)?;
            let authorized = stored
                .verification_method(&ticket.key_id)
                .map(|vm| vm.public_key_multibase == incoming.public_key_multibase)
                .unwrap_or(false);
            if !authorized {
                warn!(subject = id.subject(), key = %ticket.key_id, "update not authorized by stored record");
                return Err(TicketError::UnauthorizedUpdate.into());
            }
        }
        Ok(())
    }

    fn ledger(&self) -> AgentResult<&Arc<dyn Ledger>> {
        self.ledger.as_ref().ok_or(AgentError::LedgerUnavailable)
    }

    /// Balance, rewards and pending transactions of an account
    pub async fn account_information(&self, address: &str) -> AgentResult<AccountInformation> {
        let ledger = self.ledger()?;
        let account = ledger.account_information(address).await.map_err(|e| {
            error!(error = %e, %address, "failed to get account information");
            e
        })?;
        let pending = ledger.pending_transactions(address).await.map_err(|e| {
            error!(error = %e, %address, "failed to get pending transactions");
            e
        })?;
        Ok(AccountInformation::new(account, pending))
    }

    /// Network parameters suggested for new transactions
    pub async fn tx_parameters(&self) -> AgentResult<serde_json::Value> {
        self.ledger()?.suggested_params().await.map_err(|e| {
            error!(error = %e, "failed to get transaction parameters");
            e
        })
    }

    /// Send a signed raw transaction to the network
    pub async fn tx_submit(&self, stx: &[u8]) -> AgentResult<String> {
        self.ledger()?.send_raw_transaction(stx).await.map_err(|e| {
            error!(error = %e, size = stx.len(), "failed to submit raw transaction");
            e
        })
    }

    /// Start monitoring an account. Dropping the receiver stops the monitor.
    pub fn account_activity(
        &self,
        address: &str,
    ) -> AgentResult<(mpsc::Receiver<AccountActivity>, JoinHandle<()>)> {
        let ledger = Arc::clone(self.ledger()?);
        Ok(ledger::spawn_activity_monitor(
            ledger,
            address.to_string(),
            self.monitor_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        did::{fixtures, KeyPair, Service},
        storage::{Ephemeral, IpfsStore},
        ticket::PROOF_DOMAIN,
    };
    use std::sync::atomic::AtomicBool;

    const DIFFICULTY: u32 = 8;

    fn handler_with(store: Arc<dyn Storage>, policy: UpdatePolicy) -> Handler {
        Handler::new(HandlerOptions {
            difficulty: DIFFICULTY,
            update_policy: policy,
            ..HandlerOptions::new(vec!["algo".to_string()], store)
        })
    }

    fn handler() -> Handler {
        handler_with(Arc::new(Ephemeral::open()), UpdatePolicy::SelfAsserted)
    }

    fn request(id: &Identifier, key: &KeyPair) -> ProcessRequest {
        let mut ticket = Ticket::new(id, "master").unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(key, &hex::decode(digest).unwrap());
        ProcessRequest::new(ticket)
    }

    #[tokio::test]
    async fn test_process_then_retrieve() {
        let handler = handler();
        let (id, key) = fixtures::identifier("algo", "abc");

        let req = request(&id, &key);
        handler.process(&req).await.unwrap();

        let (stored, proof) = handler.retrieve(&QueryRequest::new("algo", "abc")).await.unwrap();
        assert_eq!(stored.document(true), id.document(true));
        assert_eq!(proof, req.ticket.unwrap().get_proof_ld().unwrap());
    }

    #[tokio::test]
    async fn test_empty_request() {
        let err = handler().process(&ProcessRequest::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "empty request");
    }

    #[tokio::test]
    async fn test_unsupported_method_on_write() {
        let (id, key) = fixtures::identifier("other", "abc");
        let err = handler().process(&request(&id, &key)).await.unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedMethod));
    }

    #[tokio::test]
    async fn test_unsupported_method_differs_from_not_found() {
        let handler = handler();
        let unsupported = handler.retrieve(&QueryRequest::new("other", "abc")).await.unwrap_err();
        let missing = handler.retrieve(&QueryRequest::new("algo", "abc")).await.unwrap_err();

        assert_eq!(unsupported.to_string(), "non supported method");
        assert!(matches!(missing, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_low_difficulty_ticket_rejected() {
        let handler = Handler::new(HandlerOptions {
            difficulty: 20,
            ..HandlerOptions::new(vec!["algo".to_string()], Arc::new(Ephemeral::open()))
        });
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut req = request(&id, &key);
        // keep a nonce that meets 8 bits but not 20
        let ticket = req.ticket.as_mut().unwrap();
        while pow::leading_zero_bits(&ticket.digest()) >= 20 {
            ticket.nonce += 1;
            ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        }
        let digest = ticket.digest();
        ticket.sign(&key, &digest);

        let err = handler.process(&req).await.unwrap_err();
        assert!(matches!(err, AgentError::Ticket(TicketError::InvalidChallenge)));
    }

    #[tokio::test]
    async fn test_self_asserted_update_replaces_record() {
        let handler = handler();
        let (mut id, key) = fixtures::identifier("algo", "abc");
        handler.process(&request(&id, &key)).await.unwrap();

        id.add_service(Service {
            id: "#extra".to_string(),
            service_type: "LinkedDomains".to_string(),
            service_endpoint: "https://extra.example".to_string(),
        });
        handler.process(&request(&id, &key)).await.unwrap();

        let (stored, _) = handler.retrieve(&QueryRequest::new("algo", "abc")).await.unwrap();
        assert_eq!(stored.services().len(), 2);
    }

    #[tokio::test]
    async fn test_self_asserted_policy_accepts_foreign_key() {
        let handler = handler();
        let (id, key) = fixtures::identifier("algo", "abc");
        handler.process(&request(&id, &key)).await.unwrap();

        let (impostor, impostor_key) = fixtures::identifier("algo", "abc");
        assert!(handler.process(&request(&impostor, &impostor_key)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stored_keys_policy_rejects_foreign_key() {
        let handler = handler_with(Arc::new(Ephemeral::open()), UpdatePolicy::StoredKeys);
        let (id, key) = fixtures::identifier("algo", "abc");
        handler.process(&request(&id, &key)).await.unwrap();

        let (impostor, impostor_key) = fixtures::identifier("algo", "abc");
        let err = handler.process(&request(&impostor, &impostor_key)).await.unwrap_err();
        assert!(matches!(err, AgentError::Ticket(TicketError::UnauthorizedUpdate)));

        // the owner can still update
        handler.process(&request(&id, &key)).await.unwrap();
    }

    #[tokio::test]
    async fn test_ipfs_delete_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            IpfsStore::open(dir.path().to_str().unwrap(), "test.index").await.unwrap(),
        );
        let handler = handler_with(store.clone(), UpdatePolicy::SelfAsserted);
        let (id, key) = fixtures::identifier("algo", "abc");

        let locator = handler.process(&request(&id, &key)).await.unwrap();
        assert!(locator.starts_with("/ipfs/"));

        let err = handler.store().delete(&id).await.unwrap_err();
        assert!(err.to_string().contains("entries cannot be removed"));
    }

    #[tokio::test]
    async fn test_proof_over_other_document_rejected() {
        let handler = handler();
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut other = id.clone();
        other.remove_service("#profile").unwrap();

        let mut ticket = Ticket::new(&id, "master").unwrap();
        ticket.proof = serde_json::to_vec(&other.get_proof("master", PROOF_DOMAIN).unwrap()).unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());

        let err = handler.process(&ProcessRequest::new(ticket)).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid proof");
    }

    #[tokio::test]
    async fn test_ledger_operations_need_a_client() {
        let handler = handler();
        assert!(matches!(
            handler.account_information("ADDR").await,
            Err(AgentError::LedgerUnavailable)
        ));
        assert!(matches!(handler.tx_parameters().await, Err(AgentError::LedgerUnavailable)));
        assert!(matches!(handler.tx_submit(b"tx").await, Err(AgentError::LedgerUnavailable)));
        assert!(handler.account_activity("ADDR").is_err());
    }

    #[test]
    fn test_zero_difficulty_uses_default() {
        let handler = Handler::new(HandlerOptions {
            difficulty: 0,
            ..HandlerOptions::new(vec!["algo".to_string()], Arc::new(Ephemeral::open()))
        });
        assert_eq!(handler.difficulty(), pow::DEFAULT_DIFFICULTY);
    }

    #[test]
    fn test_update_policy_parsing() {
        assert_eq!("self".parse::<UpdatePolicy>().unwrap(), UpdatePolicy::SelfAsserted);
        assert_eq!("Stored".parse::<UpdatePolicy>().unwrap(), UpdatePolicy::StoredKeys);
        assert!("none".parse::<UpdatePolicy>().is_err());
    }
}
