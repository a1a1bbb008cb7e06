//! Compact JWS envelopes (RFC 7515) carrying agent claims.
//!
//! Only the two whitelisted algorithms are produced or accepted. Signatures
//! are the raw 64-byte encodings (`r || s` for ES256).

use crate::error::{SignerError, SignerResult};
use crate::key::{AgentKeyPair, AgentPublicKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Protected header of an envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Sign `claims` with `key`, producing `header.payload.signature`.
pub fn sign_compact<T: Serialize>(
    key: &AgentKeyPair,
    kid: Option<&str>,
    claims: &T,
) -> SignerResult<String> {
    let header = JwsHeader {
        alg: key.algorithm().jws_alg().to_string(),
        kid: kid.map(str::to_string),
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| SignerError::MalformedEnvelope(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(claims).map_err(|e| SignerError::MalformedEnvelope(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header_json),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{signing_input}.{}",
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

/// A parsed envelope whose signature has not been checked yet.
#[derive(Debug)]
pub struct UnverifiedEnvelope {
    header: JwsHeader,
    signing_input: String,
    payload: Vec<u8>,
    signature: Vec<u8>,
}

impl UnverifiedEnvelope {
    /// Split and decode a compact serialization.
    pub fn parse(compact: &str) -> SignerResult<Self> {
        let compact = compact.trim();
        let mut parts = compact.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SignerError::MalformedEnvelope(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let header_json = decode_segment("header", header_b64)?;
        let header: JwsHeader = serde_json::from_slice(&header_json)
            .map_err(|e| SignerError::MalformedEnvelope(format!("header: {e}")))?;
        let payload = decode_segment("payload", payload_b64)?;
        let signature = decode_segment("signature", signature_b64)?;

        Ok(Self {
            header,
            signing_input: format!("{header_b64}.{payload_b64}"),
            payload,
            signature,
        })
    }

    pub fn header(&self) -> &JwsHeader {
        &self.header
    }

    /// Decode the claims without checking the signature.
    ///
    /// Only for locating the key that will verify this envelope.
    pub fn unverified_claims<T: DeserializeOwned>(&self) -> SignerResult<T> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| SignerError::MalformedEnvelope(format!("claims: {e}")))
    }

    /// Check the declared algorithm and signature against `key`, then decode the claims.
    pub fn verify<T: DeserializeOwned>(&self, key: &AgentPublicKey) -> SignerResult<T> {
        let expected = key.algorithm().jws_alg();
        if self.header.alg != expected {
            return Err(SignerError::AlgorithmMismatch {
                expected: expected.to_string(),
                found: self.header.alg.clone(),
            });
        }
        key.verify(self.signing_input.as_bytes(), &self.signature)?;
        self.unverified_claims()
    }
}

fn decode_segment(name: &str, segment: &str) -> SignerResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| SignerError::MalformedEnvelope(format!("{name}: {e}")))
}
