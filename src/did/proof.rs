/// Linked-data proofs over normalized DID documents
use super::{canonical, keys, DidError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SubsecRound, Utc};
use k256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Proof type produced by secp256k1 keys
pub const PROOF_TYPE: &str = "EcdsaSecp256k1Signature2019";

/// Default proof purpose
pub const PURPOSE_AUTHENTICATION: &str = "authentication";

/// Detached proof over a canonicalized document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofLd {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub created: DateTime<Utc>,
    pub domain: String,
    pub proof_purpose: String,
    pub verification_method: String,
    /// Base64 signature; absent while the proof is being built
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proof_value: String,
}

impl ProofLd {
    /// Unsigned proof options for the given key and domain
    pub fn new(verification_method: &str, purpose: &str, domain: &str) -> Self {
        Self {
            proof_type: PROOF_TYPE.to_string(),
            created: Utc::now().trunc_subsecs(0),
            domain: domain.to_string(),
            proof_purpose: purpose.to_string(),
            verification_method: verification_method.to_string(),
            proof_value: String::new(),
        }
    }

    /// Bytes covered by the signature:
    /// `sha256(canonical options) || sha256(normalized document)`
    pub fn signing_input(&self, normalized: &[u8]) -> Result<Vec<u8>, DidError> {
        let mut options = self.clone();
        options.proof_value.clear();
        let options = canonical::to_canonical_vec(&options)?;

        let mut input = Vec::with_capacity(64);
        input.extend_from_slice(&Sha256::digest(&options));
        input.extend_from_slice(&Sha256::digest(normalized));
        Ok(input)
    }

    /// Attach a signature produced by `sign` over the signing input
    pub fn seal<F>(mut self, normalized: &[u8], sign: F) -> Result<Self, DidError>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let input = self.signing_input(normalized)?;
        self.proof_value = STANDARD.encode(sign(&input));
        Ok(self)
    }

    /// Check the proof signature with `key`
    pub fn verify(&self, normalized: &[u8], key: &VerifyingKey) -> bool {
        let Ok(signature) = STANDARD.decode(&self.proof_value) else {
            return false;
        };
        match self.signing_input(normalized) {
            Ok(input) => keys::verify_signature(key, &input, &signature),
            Err(_) => false,
        }
    }
}
