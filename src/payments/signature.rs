//! Webhook signature verification.
//!
//! The gateway signs the exact request body with HMAC-SHA256 and sends the hex digest
//! in `x-razorpay-signature`. Verification must run on the raw bytes, never on a
//! re-serialized payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is missing")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature does not match payload")]
    Mismatch,
    #[error("webhook secret cannot be used as an HMAC key")]
    InvalidKey,
}

#[derive(Clone)]
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// The secret is checked for emptiness when configuration is loaded.
    pub fn new(secret: &str) -> Result<Self, SignatureError> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        Ok(Self { mac })
    }

    pub fn verify(&self, raw_body: &[u8], signature: Option<&str>) -> Result<(), SignatureError> {
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(SignatureError::Missing)?;
        let expected = hex::decode(signature).map_err(|_| SignatureError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(raw_body);
        // verify_slice compares in constant time.
        mac.verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Hex signature for `raw_body`; used to sign test fixtures.
    pub fn sign(&self, raw_body: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(raw_body);
        hex::encode(mac.finalize().into_bytes())
    }
}
