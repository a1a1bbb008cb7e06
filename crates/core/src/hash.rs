//! Content identifiers for cached certificate chains.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic identifier of a (subject, issuer) certificate pair.
///
/// Computed as SHA-256 over `subject || issuer`, so identical certificate
/// pairs fetched in different refresh cycles share the same id. Agents only
/// ever see this id, never internal row identifiers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Create a ContentId from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Compute the id of a certificate pair.
    pub fn compute(subject: &[u8], issuer: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(subject);
        hasher.update(issuer);
        Self(hasher.finalize().into())
    }

    /// Parse from a 64-character hex string (either case).
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidContentId(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidContentId(
                "non-hex characters".to_string(),
            ));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidContentId(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidContentId(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ContentId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::from_hex(&value)
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.to_hex()
    }
}

impl std::str::FromStr for ContentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_hash_of_concatenation() {
        let id = ContentId::compute(b"subj", b"iss");
        let expected: [u8; 32] = Sha256::digest(b"subjiss").into();
        assert_eq!(id.as_bytes(), &expected);
    }

    #[test]
    fn test_content_id_stable_across_calls() {
        assert_eq!(
            ContentId::compute(b"subject", b"issuer"),
            ContentId::compute(b"subject", b"issuer")
        );
        assert_ne!(
            ContentId::compute(b"subject", b"issuer"),
            ContentId::compute(b"issuer", b"subject")
        );
    }

    #[test]
    fn test_content_id_hex_parse() {
        let id = ContentId::compute(b"a", b"b");
        let parsed = ContentId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);
        assert_eq!(
            ContentId::from_hex(&id.to_hex().to_uppercase()).unwrap(),
            id
        );
    }

    #[test]
    fn test_content_id_rejects_malformed() {
        assert!(ContentId::from_hex("abc").is_err());
        assert!(ContentId::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_content_id_serde_as_hex_string() {
        let id = ContentId::compute(b"x", b"y");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<ContentId>("\"nothex\"").is_err());
    }
}
