//! Agent signing keys.
//!
//! Probe agents sign with Ed25519 or ECDSA P-256. Public keys travel as SPKI
//! PEM, private keys are stored as PKCS#8 PEM. Any other key type is rejected.

use crate::error::{SignerError, SignerResult};
use ed25519_dalek::{
    Signature as EdSignature, SigningKey as EdSigningKey, VerifyingKey as EdVerifyingKey,
};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{
    Signature as EsSignature, SigningKey as EsSigningKey, VerifyingKey as EsVerifyingKey,
};
use p256::pkcs8::{
    DecodePrivateKey, DecodePublicKey, Document, EncodePrivateKey, EncodePublicKey, LineEnding,
    SubjectPublicKeyInfoRef,
};
use rand_core::OsRng;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deterministic key ids.
pub const KEY_ID_NAMESPACE: Uuid = Uuid::from_u128(0xc81dcfc6_2131_4d05_8ea4_4e5ad8123696);

/// Derive the key id for a public key from its SPKI DER encoding.
///
/// The same bytes always yield the same id.
pub fn key_id(spki_der: &[u8]) -> Uuid {
    Uuid::new_v5(&KEY_ID_NAMESPACE, spki_der)
}

/// Accepted agent signature algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Ed25519,
    P256,
}

impl KeyAlgorithm {
    /// JWS `alg` header value.
    pub fn jws_alg(&self) -> &'static str {
        match self {
            Self::Ed25519 => "EdDSA",
            Self::P256 => "ES256",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ed25519 => "ed25519",
            Self::P256 => "p256",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" | "eddsa" => Ok(Self::Ed25519),
            "p256" | "p-256" | "es256" => Ok(Self::P256),
            other => Err(SignerError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Clone)]
enum PublicInner {
    Ed25519(EdVerifyingKey),
    P256(EsVerifyingKey),
}

/// A whitelisted agent public key.
#[derive(Clone)]
pub struct AgentPublicKey {
    inner: PublicInner,
}

impl AgentPublicKey {
    /// Parse an SPKI PEM public key.
    ///
    /// Input that is not a `PUBLIC KEY` PEM fails with `KeyParsing`; a valid
    /// SPKI of a non-whitelisted algorithm fails with `UnsupportedAlgorithm`.
    pub fn from_pem(pem: &str) -> SignerResult<Self> {
        let (label, doc) = Document::from_pem(pem.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid PEM: {e}")))?;
        if label != "PUBLIC KEY" {
            return Err(SignerError::KeyParsing(format!(
                "expected PUBLIC KEY PEM, got {label}"
            )));
        }
        Self::from_spki_der(doc.as_bytes())
    }

    /// Parse an SPKI DER public key.
    pub fn from_spki_der(der: &[u8]) -> SignerResult<Self> {
        if let Ok(key) = EdVerifyingKey::from_public_key_der(der) {
            return Ok(Self {
                inner: PublicInner::Ed25519(key),
            });
        }
        if let Ok(key) = EsVerifyingKey::from_public_key_der(der) {
            return Ok(Self {
                inner: PublicInner::P256(key),
            });
        }

        let spki = SubjectPublicKeyInfoRef::try_from(der)
            .map_err(|e| SignerError::KeyParsing(format!("invalid SPKI: {e}")))?;
        let params = spki
            .algorithm
            .parameters_oid()
            .map(|oid| format!(" ({oid})"))
            .unwrap_or_default();
        Err(SignerError::UnsupportedAlgorithm(format!(
            "{}{params}",
            spki.algorithm.oid
        )))
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.inner {
            PublicInner::Ed25519(_) => KeyAlgorithm::Ed25519,
            PublicInner::P256(_) => KeyAlgorithm::P256,
        }
    }

    /// Canonical SPKI DER encoding.
    pub fn spki_der(&self) -> SignerResult<Vec<u8>> {
        let doc = match &self.inner {
            PublicInner::Ed25519(key) => key.to_public_key_der(),
            PublicInner::P256(key) => key.to_public_key_der(),
        }
        .map_err(|e| SignerError::KeyEncoding(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Canonical SPKI PEM encoding (LF line endings).
    pub fn to_pem(&self) -> SignerResult<String> {
        match &self.inner {
            PublicInner::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
            PublicInner::P256(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| SignerError::KeyEncoding(e.to_string()))
    }

    /// Deterministic key id of this key.
    pub fn key_id(&self) -> SignerResult<Uuid> {
        Ok(key_id(&self.spki_der()?))
    }

    /// Verify a raw signature (64 bytes for both algorithms) over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> SignerResult<()> {
        match &self.inner {
            PublicInner::Ed25519(key) => {
                let sig = EdSignature::from_slice(signature)
                    .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
                key.verify(message, &sig)
                    .map_err(|_| SignerError::VerificationFailed)
            }
            PublicInner::P256(key) => {
                let sig = EsSignature::from_slice(signature)
                    .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
                key.verify(message, &sig)
                    .map_err(|_| SignerError::VerificationFailed)
            }
        }
    }
}

impl PartialEq for AgentPublicKey {
    fn eq(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (PublicInner::Ed25519(a), PublicInner::Ed25519(b)) => a == b,
            (PublicInner::P256(a), PublicInner::P256(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for AgentPublicKey {}

impl fmt::Debug for AgentPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_id() {
            Ok(id) => write!(f, "AgentPublicKey({}, {id})", self.algorithm()),
            Err(_) => write!(f, "AgentPublicKey({})", self.algorithm()),
        }
    }
}

enum SecretInner {
    Ed25519(EdSigningKey),
    P256(EsSigningKey),
}

/// An agent's private signing key.
pub struct AgentKeyPair {
    inner: SecretInner,
}

impl AgentKeyPair {
    /// Generate a new random key.
    pub fn generate(algorithm: KeyAlgorithm) -> Self {
        let mut rng = OsRng;
        let inner = match algorithm {
            KeyAlgorithm::Ed25519 => SecretInner::Ed25519(EdSigningKey::generate(&mut rng)),
            KeyAlgorithm::P256 => SecretInner::P256(EsSigningKey::random(&mut rng)),
        };
        Self { inner }
    }

    /// Parse a PKCS#8 PEM private key of either whitelisted algorithm.
    pub fn from_pkcs8_pem(pem: &str) -> SignerResult<Self> {
        if let Ok(key) = EdSigningKey::from_pkcs8_pem(pem) {
            return Ok(Self {
                inner: SecretInner::Ed25519(key),
            });
        }
        EsSigningKey::from_pkcs8_pem(pem)
            .map(|key| Self {
                inner: SecretInner::P256(key),
            })
            .map_err(|e| {
                SignerError::KeyParsing(format!("not an Ed25519 or P-256 PKCS#8 key: {e}"))
            })
    }

    /// Read a PKCS#8 PEM private key from disk.
    pub fn from_pem_file(path: impl AsRef<Path>) -> SignerResult<Self> {
        let pem = std::fs::read_to_string(path)?;
        Self::from_pkcs8_pem(&pem)
    }

    /// Encode as PKCS#8 PEM.
    pub fn to_pkcs8_pem(&self) -> SignerResult<String> {
        let pem = match &self.inner {
            SecretInner::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
            SecretInner::P256(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| SignerError::KeyEncoding(e.to_string()))?;
        Ok(pem.to_string())
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        match self.inner {
            SecretInner::Ed25519(_) => KeyAlgorithm::Ed25519,
            SecretInner::P256(_) => KeyAlgorithm::P256,
        }
    }

    pub fn public_key(&self) -> AgentPublicKey {
        let inner = match &self.inner {
            SecretInner::Ed25519(key) => PublicInner::Ed25519(key.verifying_key()),
            SecretInner::P256(key) => PublicInner::P256(EsVerifyingKey::from(key)),
        };
        AgentPublicKey { inner }
    }

    /// Sign `message`, returning the raw 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.inner {
            SecretInner::Ed25519(key) => {
                let sig: EdSignature = key.sign(message);
                sig.to_bytes().to_vec()
            }
            SecretInner::P256(key) => {
                let sig: EsSignature = key.sign(message);
                sig.to_bytes().to_vec()
            }
        }
    }
}

impl fmt::Debug for AgentKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKeyPair")
            .field("algorithm", &self.algorithm())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
