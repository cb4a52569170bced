/// secp256k1 key material for DID verification methods
///
/// Public keys travel as multibase (base58btc, `z` prefix) encodings of the
/// compressed SEC1 point; private keys as lowercase hex.
use super::DidError;
use k256::{
    ecdsa::{
        signature::{Signer, Verifier},
        Signature, SigningKey, VerifyingKey,
    },
    SecretKey,
};

/// Multibase prefix for base58btc
const MULTIBASE_BASE58BTC: char = 'z';

/// Key pair able to produce signatures for documents, proofs and tickets
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_multibase())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        Self { signing_key }
    }

    /// Create a key pair from a private key (32 bytes)
    pub fn new(private_key: &[u8]) -> Result<Self, DidError> {
        if private_key.len() != 32 {
            return Err(DidError::InvalidKey(
                "private key must be exactly 32 bytes".to_string(),
            ));
        }

        let secret_key = SecretKey::from_slice(private_key)
            .map_err(|e| DidError::InvalidKey(format!("invalid private key: {}", e)))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_hex(hex_key: &str) -> Result<Self, DidError> {
        let key_bytes = hex::decode(hex_key)
            .map_err(|e| DidError::InvalidKey(format!("invalid hex private key: {}", e)))?;

        Self::new(&key_bytes)
    }

    /// Sign raw bytes, returning the 64-byte compact signature
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing_key.sign(data);
        signature.to_bytes().to_vec()
    }

    /// Private key as hex
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Public key in multibase form (compressed SEC1 point, base58btc)
    pub fn public_key_multibase(&self) -> String {
        encode_multibase(self.signing_key.verifying_key())
    }

    /// Get the verifying key (public key)
    pub fn verifying_key(&self) -> VerifyingKey {
        *self.signing_key.verifying_key()
    }
}

/// Encode a verifying key as multibase
pub fn encode_multibase(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(true);
    format!("{}{}", MULTIBASE_BASE58BTC, bs58::encode(point.as_bytes()).into_string())
}

/// Decode a multibase public key
pub fn decode_multibase(value: &str) -> Result<VerifyingKey, DidError> {
    let encoded = value
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| DidError::InvalidKey("unsupported multibase prefix".to_string()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| DidError::InvalidKey(format!("invalid base58 public key: {}", e)))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| DidError::InvalidKey(format!("invalid public key: {}", e)))
}

/// Check a compact signature over `data`
pub fn verify_signature(key: &VerifyingKey, data: &[u8], signature: &[u8]) -> bool {
    match Signature::from_slice(signature) {
        Ok(sig) => key.verify(data, &sig).is_ok(),
        Err(_) => false,
    }
}
