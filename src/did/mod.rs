/// Decentralized identifier data model
///
/// Identifiers, their W3C-style documents, secp256k1 verification methods
/// and linked-data proofs. The agent treats this as the proof-verifier
/// capability: documents are normalized, proofs and signatures checked here.
pub mod canonical;
pub mod keys;
pub mod proof;

pub use keys::KeyPair;
pub use proof::ProofLd;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default JSON-LD context for documents
pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";

/// Verification method type for secp256k1 keys
pub const KEY_TYPE: &str = "EcdsaSecp256k1VerificationKey2019";

/// Errors raised by the DID model
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DidError {
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("duplicate verification method: {0}")]
    DuplicateKey(String),

    #[error("verification method not found: {0}")]
    KeyNotFound(String),

    #[error("private key not available for {0}")]
    PrivateKeyMissing(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Named cryptographic key attached to an identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    pub public_key_multibase: String,
    /// Only kept by the key owner; stripped from safe documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_hex: Option<String>,
}

impl VerificationMethod {
    /// Whether private key material is attached
    pub fn has_private(&self) -> bool {
        self.private_key_hex
            .as_deref()
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }

    /// Decoded public key
    pub fn verifying_key(&self) -> Result<k256::ecdsa::VerifyingKey, DidError> {
        keys::decode_multibase(&self.public_key_multibase)
    }

    /// Key pair for signing; requires private material
    pub fn key_pair(&self) -> Result<KeyPair, DidError> {
        match self.private_key_hex.as_deref() {
            Some(hex_key) if !hex_key.is_empty() => KeyPair::from_hex(hex_key),
            _ => Err(DidError::PrivateKeyMissing(self.id.clone())),
        }
    }

    /// Check a signature over arbitrary bytes
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self.verifying_key() {
            Ok(key) => keys::verify_signature(&key, data, signature),
            Err(_) => false,
        }
    }

    /// Check a linked-data proof over a normalized document
    pub fn verify_proof(&self, normalized: &[u8], proof: &ProofLd) -> bool {
        if proof.verification_method != self.id {
            return false;
        }
        match self.verifying_key() {
            Ok(key) => proof.verify(normalized, &key),
            Err(_) => false,
        }
    }
}

/// Verification relationships a key may be referenced from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Authentication,
    AssertionMethod,
    KeyAgreement,
    CapabilityInvocation,
    CapabilityDelegation,
}

/// Service endpoint published on a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    pub service_endpoint: String,
}

/// Document metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deactivated: bool,
}

impl DocumentMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Serialized DID document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(rename = "@context", default)]
    pub context: Vec<String>,
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assertion_method: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_agreement: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_invocation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capability_delegation: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
}

impl Document {
    /// Canonical JSON form used for proofs
    pub fn normalized(&self) -> Result<Vec<u8>, DidError> {
        canonical::to_canonical_vec(self)
    }
}

/// Decentralized identifier with its keys, relationships and services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    method: String,
    subject: String,
    verification_methods: Vec<VerificationMethod>,
    authentication: Vec<String>,
    assertion_method: Vec<String>,
    key_agreement: Vec<String>,
    capability_invocation: Vec<String>,
    capability_delegation: Vec<String>,
    services: Vec<Service>,
    metadata: DocumentMetadata,
}

impl Identifier {
    /// Create an empty identifier for `did:<method>:<subject>`
    pub fn new(method: &str, subject: &str) -> Result<Self, DidError> {
        validate_method(method)?;
        validate_subject(subject)?;
        let now = Utc::now();
        Ok(Self {
            method: method.to_string(),
            subject: subject.to_string(),
            verification_methods: Vec::new(),
            authentication: Vec::new(),
            assertion_method: Vec::new(),
            key_agreement: Vec::new(),
            capability_invocation: Vec::new(),
            capability_delegation: Vec::new(),
            services: Vec::new(),
            metadata: DocumentMetadata {
                created: Some(now),
                updated: Some(now),
                deactivated: false,
            },
        })
    }

    /// Parse a `did:<method>:<subject>` string
    pub fn parse(value: &str) -> Result<Self, DidError> {
        let (method, subject) = split_did(value)?;
        Self::new(method, subject)
    }

    /// Restore an identifier from its document
    pub fn from_document(doc: &Document) -> Result<Self, DidError> {
        let (method, subject) = split_did(&doc.id)?;
        validate_method(method)?;
        validate_subject(subject)?;
        Ok(Self {
            method: method.to_string(),
            subject: subject.to_string(),
            verification_methods: doc.verification_method.clone(),
            authentication: doc.authentication.clone(),
            assertion_method: doc.assertion_method.clone(),
            key_agreement: doc.key_agreement.clone(),
            capability_invocation: doc.capability_invocation.clone(),
            capability_delegation: doc.capability_delegation.clone(),
            services: doc.service.clone(),
            metadata: DocumentMetadata::default(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Full DID string
    pub fn did(&self) -> String {
        format!("did:{}:{}", self.method, self.subject)
    }

    /// Storage key `method:subject`
    pub fn key(&self) -> String {
        format!("{}:{}", self.method, self.subject)
    }

    pub fn verification_methods(&self) -> &[VerificationMethod] {
        &self.verification_methods
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn metadata(&self) -> &DocumentMetadata {
        &self.metadata
    }

    pub fn set_metadata(&mut self, metadata: DocumentMetadata) {
        self.metadata = metadata;
    }

    /// References listed under a verification relationship
    pub fn relationship(&self, rel: Relationship) -> &[String] {
        match rel {
            Relationship::Authentication => &self.authentication,
            Relationship::AssertionMethod => &self.assertion_method,
            Relationship::KeyAgreement => &self.key_agreement,
            Relationship::CapabilityInvocation => &self.capability_invocation,
            Relationship::CapabilityDelegation => &self.capability_delegation,
        }
    }

    /// Look up a verification method by full id or by fragment
    /// (`did:m:s#key`, `#key` and `key` all resolve the same entry).
    pub fn verification_method(&self, id: &str) -> Option<&VerificationMethod> {
        let full = self.absolute_ref(id);
        self.verification_methods.iter().find(|vm| vm.id == full)
    }

    /// Register a key under `#fragment`, returning its full id.
    /// Private material is kept so the identifier can produce proofs.
    pub fn add_key(&mut self, fragment: &str, key: &KeyPair) -> Result<String, DidError> {
        let fragment = fragment.trim_start_matches('#');
        if fragment.is_empty() {
            return Err(DidError::InvalidKey("empty key fragment".to_string()));
        }
        let id = format!("{}#{}", self.did(), fragment);
        if self.verification_method(&id).is_some() {
            return Err(DidError::DuplicateKey(id));
        }
        self.verification_methods.push(VerificationMethod {
            id: id.clone(),
            key_type: KEY_TYPE.to_string(),
            controller: self.did(),
            public_key_multibase: key.public_key_multibase(),
            private_key_hex: Some(key.private_key_hex()),
        });
        self.touch();
        Ok(id)
    }

    /// Remove a key and every relationship that references it
    pub fn remove_key(&mut self, id: &str) -> Result<(), DidError> {
        let full = self.absolute_ref(id);
        let before = self.verification_methods.len();
        self.verification_methods.retain(|vm| vm.id != full);
        if self.verification_methods.len() == before {
            return Err(DidError::KeyNotFound(full));
        }
        for list in self.relationship_lists_mut() {
            list.retain(|r| *r != full);
        }
        self.touch();
        Ok(())
    }

    /// Reference an existing key from a verification relationship
    pub fn add_relationship(&mut self, key_id: &str, rel: Relationship) -> Result<(), DidError> {
        let full = self.absolute_ref(key_id);
        if self.verification_method(&full).is_none() {
            return Err(DidError::KeyNotFound(full));
        }
        let list = match rel {
            Relationship::Authentication => &mut self.authentication,
            Relationship::AssertionMethod => &mut self.assertion_method,
            Relationship::KeyAgreement => &mut self.key_agreement,
            Relationship::CapabilityInvocation => &mut self.capability_invocation,
            Relationship::CapabilityDelegation => &mut self.capability_delegation,
        };
        if !list.contains(&full) {
            list.push(full);
        }
        self.touch();
        Ok(())
    }

    /// Add or replace a service endpoint (matched by id)
    pub fn add_service(&mut self, mut service: Service) {
        service.id = self.absolute_ref(&service.id);
        self.services.retain(|s| s.id != service.id);
        self.services.push(service);
        self.touch();
    }

    pub fn remove_service(&mut self, id: &str) -> Result<(), DidError> {
        let full = self.absolute_ref(id);
        let before = self.services.len();
        self.services.retain(|s| s.id != full);
        if self.services.len() == before {
            return Err(DidError::InvalidIdentifier(format!("unknown service {}", full)));
        }
        self.touch();
        Ok(())
    }

    /// Render the document. With `safe` set, private keys are removed.
    pub fn document(&self, safe: bool) -> Document {
        let verification_method = self
            .verification_methods
            .iter()
            .cloned()
            .map(|mut vm| {
                if safe {
                    vm.private_key_hex = None;
                }
                vm
            })
            .collect();

        Document {
            context: vec![DID_CONTEXT.to_string()],
            id: self.did(),
            verification_method,
            authentication: self.authentication.clone(),
            assertion_method: self.assertion_method.clone(),
            key_agreement: self.key_agreement.clone(),
            capability_invocation: self.capability_invocation.clone(),
            capability_delegation: self.capability_delegation.clone(),
            service: self.services.clone(),
        }
    }

    /// Produce a linked-data proof over the safe document using `key_id`
    pub fn get_proof(&self, key_id: &str, domain: &str) -> Result<ProofLd, DidError> {
        let vm = self
            .verification_method(key_id)
            .ok_or_else(|| DidError::KeyNotFound(key_id.to_string()))?;
        let key = vm.key_pair()?;
        let normalized = self.document(true).normalized()?;
        ProofLd::new(&vm.id, proof::PURPOSE_AUTHENTICATION, domain)
            .seal(&normalized, |data| key.sign(data))
    }

    fn absolute_ref(&self, id: &str) -> String {
        if id.starts_with("did:") {
            id.to_string()
        } else {
            format!("{}#{}", self.did(), id.trim_start_matches('#'))
        }
    }

    fn relationship_lists_mut(&mut self) -> [&mut Vec<String>; 5] {
        [
            &mut self.authentication,
            &mut self.assertion_method,
            &mut self.key_agreement,
            &mut self.capability_invocation,
            &mut self.capability_delegation,
        ]
    }

    fn touch(&mut self) {
        self.metadata.updated = Some(Utc::now());
    }
}

fn split_did(value: &str) -> Result<(&str, &str), DidError> {
    let rest = value
        .strip_prefix("did:")
        .ok_or_else(|| DidError::InvalidIdentifier(format!("missing 'did:' prefix: {}", value)))?;
    let rest = rest.split('#').next().unwrap_or(rest);
    rest.split_once(':')
        .ok_or_else(|| DidError::InvalidIdentifier(format!("missing method or subject: {}", value)))
}

fn validate_method(method: &str) -> Result<(), DidError> {
    if method.is_empty()
        || !method
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(DidError::InvalidIdentifier(format!(
            "invalid method name: {:?}",
            method
        )));
    }
    Ok(())
}

fn validate_subject(subject: &str) -> Result<(), DidError> {
    if subject.is_empty()
        || !subject
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%'))
    {
        return Err(DidError::InvalidIdentifier(format!(
            "invalid subject: {:?}",
            subject
        )));
    }
    Ok(())
}
