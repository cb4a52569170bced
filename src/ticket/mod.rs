/// Request tickets: the admission artifact for write operations
///
/// A client builds a ticket around a safe DID document and its proof, solves
/// the proof-of-work challenge, then signs the winning digest with the key
/// named by `key_id`. The agent re-derives everything before accepting it.
pub mod pow;

use crate::did::{DocumentMetadata, Document, Identifier, KeyPair, ProofLd};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

pub use pow::{DEFAULT_DIFFICULTY, MAX_DIFFICULTY};

/// Domain embedded in proofs generated for tickets
pub const PROOF_DOMAIN: &str = "did.agent";

/// Reasons a ticket is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("invalid ticket challenge")]
    InvalidChallenge,

    #[error("invalid ticket contents")]
    InvalidContents,

    #[error("invalid proof contents")]
    InvalidProofContents,

    #[error("private keys included on the DID")]
    PrivateKeyIncluded,

    #[error("the selected key is not available on the DID")]
    KeyNotAvailable,

    #[error("invalid proof")]
    InvalidProof,

    #[error("invalid ticket signature")]
    InvalidSignature,

    #[error("the selected key is not authorized on the stored DID")]
    UnauthorizedUpdate,

    #[error("failed to build ticket: {0}")]
    Build(String),
}

/// Admission ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// UTC unix seconds at creation
    pub timestamp: i64,
    #[serde(rename = "nonceValue")]
    pub nonce: i64,
    pub key_id: String,
    #[serde(with = "bytes")]
    pub document: Vec<u8>,
    #[serde(with = "bytes")]
    pub proof: Vec<u8>,
    #[serde(default, with = "optional_bytes", skip_serializing_if = "Option::is_none")]
    pub document_metadata: Option<Vec<u8>>,
    #[serde(default, with = "optional_bytes", skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl Ticket {
    /// Build an unsolved, unsigned ticket for `id`, proving it with `key_id`
    pub fn new(id: &Identifier, key_id: &str) -> Result<Self, TicketError> {
        let document = serde_json::to_vec(&id.document(true))
            .map_err(|e| TicketError::Build(e.to_string()))?;
        let proof = id
            .get_proof(key_id, PROOF_DOMAIN)
            .map_err(|e| TicketError::Build(e.to_string()))?;
        let proof = serde_json::to_vec(&proof).map_err(|e| TicketError::Build(e.to_string()))?;

        let document_metadata = if id.metadata().is_empty() {
            None
        } else {
            Some(serde_json::to_vec(id.metadata()).map_err(|e| TicketError::Build(e.to_string()))?)
        };

        Ok(Self {
            timestamp: Utc::now().timestamp(),
            nonce: 0,
            key_id: key_id.to_string(),
            document,
            proof,
            document_metadata,
            signature: None,
        })
    }

    /// Deterministic encoding:
    /// `timestamp (LE) | nonce (LE) | hex(key_id) | document | proof | document_metadata`
    pub fn encode(&self) -> Vec<u8> {
        let key_id = hex::encode(self.key_id.as_bytes());
        let metadata = self.document_metadata.as_deref().unwrap_or_default();

        let mut out = Vec::with_capacity(
            16 + key_id.len() + self.document.len() + self.proof.len() + metadata.len(),
        );
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.nonce.to_le_bytes());
        out.extend_from_slice(key_id.as_bytes());
        out.extend_from_slice(&self.document);
        out.extend_from_slice(&self.proof);
        out.extend_from_slice(metadata);
        out
    }

    /// SHA3-256 of the current encoding
    pub fn digest(&self) -> [u8; 32] {
        Sha3_256::digest(self.encode()).into()
    }

    /// Solve the proof-of-work challenge. Returns the winning digest as hex,
    /// or `None` if `cancel` was raised first.
    pub fn solve(&mut self, difficulty: u32, cancel: &AtomicBool) -> Option<String> {
        pow::solve(self, difficulty, cancel).map(hex::encode)
    }

    /// Attach the signature over a solved digest
    pub fn sign(&mut self, key: &KeyPair, digest: &[u8]) {
        self.signature = Some(key.sign(digest));
    }

    /// Decode the embedded DID, with metadata when present
    pub fn get_did(&self) -> Result<Identifier, TicketError> {
        let doc: Document =
            serde_json::from_slice(&self.document).map_err(|_| TicketError::InvalidContents)?;
        let mut id = Identifier::from_document(&doc).map_err(|_| TicketError::InvalidContents)?;

        if let Some(raw) = &self.document_metadata {
            let metadata: DocumentMetadata =
                serde_json::from_slice(raw).map_err(|_| TicketError::InvalidContents)?;
            id.set_metadata(metadata);
        }
        Ok(id)
    }

    /// Decode the embedded linked-data proof
    pub fn get_proof_ld(&self) -> Result<ProofLd, TicketError> {
        serde_json::from_slice(&self.proof).map_err(|_| TicketError::InvalidProofContents)
    }

    /// Run every admission check, stopping at the first failure:
    /// challenge, contents, private keys, key lookup, proof, signature.
    pub fn verify(&self, difficulty: u32) -> Result<(), TicketError> {
        if !pow::verify(self, difficulty) {
            return Err(TicketError::InvalidChallenge);
        }

        let id = self.get_did()?;

        // no private keys should ever be published on the network
        if id.verification_methods().iter().any(|vm| vm.has_private()) {
            return Err(TicketError::PrivateKeyIncluded);
        }

        let key = id
            .verification_method(&self.key_id)
            .ok_or(TicketError::KeyNotAvailable)?;

        let proof = self.get_proof_ld()?;
        let normalized = id
            .document(true)
            .normalized()
            .map_err(|_| TicketError::InvalidContents)?;
        if !key.verify_proof(&normalized, &proof) {
            return Err(TicketError::InvalidProof);
        }

        let signature = self.signature.as_deref().unwrap_or_default();
        if !key.verify(&self.digest(), signature) {
            return Err(TicketError::InvalidSignature);
        }
        Ok(())
    }
}

impl pow::Work for Ticket {
    fn encode(&self) -> Vec<u8> {
        Ticket::encode(self)
    }

    fn increment_nonce(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
    }
}

/// Base64 for byte fields, as protobuf JSON does
pub(crate) mod bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod optional_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&STANDARD.encode(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) if !encoded.is_empty() => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::fixtures;

    const DIFFICULTY: u32 = 8;

    fn solved_ticket() -> (Ticket, KeyPair) {
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut ticket = Ticket::new(&id, "master").unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());
        (ticket, key)
    }

    #[test]
    fn test_new_ticket_defaults() {
        let (id, _) = fixtures::identifier("algo", "abc");
        let ticket = Ticket::new(&id, "master").unwrap();
        assert_eq!(ticket.nonce, 0);
        assert!(ticket.signature.is_none());
        assert!(ticket.document_metadata.is_some());
        assert!(!String::from_utf8_lossy(&ticket.document).contains("privateKeyHex"));
    }

    #[test]
    fn test_encoding_layout() {
        let ticket = Ticket {
            timestamp: 1,
            nonce: 2,
            key_id: "k#1".to_string(),
            document: b"doc".to_vec(),
            proof: b"prf".to_vec(),
            document_metadata: Some(b"md".to_vec()),
            signature: Some(b"ignored".to_vec()),
        };

        let mut expected = vec![1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0];
        expected.extend_from_slice(b"6b2331");
        expected.extend_from_slice(b"docprfmd");
        assert_eq!(ticket.encode(), expected);
    }

    #[test]
    fn test_solve_sign_verify() {
        let (ticket, _) = solved_ticket();
        assert!(pow::leading_zero_bits(&ticket.digest()) >= DIFFICULTY);
        assert_eq!(ticket.verify(DIFFICULTY), Ok(()));
    }

    #[test]
    fn test_zero_difficulty_is_not_trivial() {
        let (ticket, _) = solved_ticket();
        if pow::leading_zero_bits(&ticket.digest()) < DEFAULT_DIFFICULTY {
            assert_eq!(ticket.verify(0), Err(TicketError::InvalidChallenge));
        }
    }

    #[test]
    fn test_tampering_any_field_fails() {
        let (ticket, _) = solved_ticket();

        let mut t = ticket.clone();
        t.timestamp += 1;
        assert!(t.verify(DIFFICULTY).is_err());

        let mut t = ticket.clone();
        t.nonce += 1;
        assert!(t.verify(DIFFICULTY).is_err());

        let mut t = ticket.clone();
        t.document[10] ^= 0x01;
        assert!(t.verify(DIFFICULTY).is_err());

        let mut t = ticket.clone();
        t.proof[10] ^= 0x01;
        assert!(t.verify(DIFFICULTY).is_err());

        let mut t = ticket.clone();
        if let Some(md) = t.document_metadata.as_mut() {
            md[3] ^= 0x01;
        }
        assert!(t.verify(DIFFICULTY).is_err());
    }

    #[test]
    fn test_signature_from_other_key_fails() {
        let (mut ticket, _) = solved_ticket();
        let other = KeyPair::generate();
        ticket.sign(&other, &ticket.digest());
        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::InvalidSignature));
    }

    #[test]
    fn test_missing_signature_fails() {
        let (mut ticket, _) = solved_ticket();
        ticket.signature = None;
        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::InvalidSignature));
    }

    #[test]
    fn test_private_key_rejected() {
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut ticket = Ticket::new(&id, "master").unwrap();
        ticket.document = serde_json::to_vec(&id.document(false)).unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());

        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::PrivateKeyIncluded));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut ticket = Ticket::new(&id, "master").unwrap();
        ticket.key_id = "did:algo:abc#missing".to_string();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());

        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::KeyNotAvailable));
    }

    #[test]
    fn test_proof_over_other_document_rejected() {
        let (id, key) = fixtures::identifier("algo", "abc");
        let mut other = id.clone();
        other.add_service(crate::did::Service {
            id: "#extra".to_string(),
            service_type: "LinkedDomains".to_string(),
            service_endpoint: "https://other.example".to_string(),
        });

        let mut ticket = Ticket::new(&id, "master").unwrap();
        ticket.proof = serde_json::to_vec(&other.get_proof("master", PROOF_DOMAIN).unwrap()).unwrap();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());

        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::InvalidProof));
    }

    #[test]
    fn test_garbage_contents_rejected() {
        let (mut ticket, key) = solved_ticket();
        ticket.document = b"not json".to_vec();
        let digest = ticket.solve(DIFFICULTY, &AtomicBool::new(false)).unwrap();
        ticket.sign(&key, &hex::decode(digest).unwrap());

        assert_eq!(ticket.verify(DIFFICULTY), Err(TicketError::InvalidContents));
    }

    #[test]
    fn test_json_wire_format() {
        let (ticket, _) = solved_ticket();
        let json = serde_json::to_value(&ticket).unwrap();
        assert!(json.get("nonceValue").is_some());
        assert!(json.get("keyId").is_some());
        assert!(json["document"].is_string());

        let restored: Ticket = serde_json::from_value(json).unwrap();
        assert_eq!(restored, ticket);
        assert_eq!(restored.verify(DIFFICULTY), Ok(()));
    }
}
