//! HMAC-SHA256 request signatures.
//!
//! The signed string is `"<timestamp>.<raw body>"`; the signature travels as
//! lower-case hex.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("invalid timestamp header")]
    InvalidTimestamp,

    #[error("timestamp skew too large")]
    Skew,

    #[error("signature mismatch")]
    Mismatch,
}

impl SignatureError {
    /// Malformed input rather than a failed check.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::InvalidTimestamp)
    }
}

pub struct SignatureVerifier {
    secret: Vec<u8>,
    max_skew_secs: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("max_skew_secs", &self.max_skew_secs)
            .finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, max_skew_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            max_skew_secs,
        }
    }

    fn mac(&self, timestamp: &str, body: &[u8]) -> HmacSha256 {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }

    /// Hex signature of `body` at `timestamp`, as a sender computes it.
    #[must_use]
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        hex::encode(self.mac(timestamp, body).finalize().into_bytes())
    }

    /// Checks `signature` against the local clock.
    pub fn verify(&self, timestamp: &str, signature: &str, body: &[u8]) -> Result<(), SignatureError> {
        self.verify_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    /// Checks `signature` as if the current time were `now` (seconds since
    /// the epoch). The skew bound is inclusive.
    pub fn verify_at(
        &self,
        timestamp: &str,
        signature: &str,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let sent = timestamp
            .parse::<i64>()
            .map_err(|_| SignatureError::InvalidTimestamp)?;

        if now.abs_diff(sent) > self.max_skew_secs {
            return Err(SignatureError::Skew);
        }

        let expected = hex::decode(signature).map_err(|_| SignatureError::Mismatch)?;

        self.mac(timestamp, body)
            .verify_slice(&expected)
            .map_err(|_| SignatureError::Mismatch)
    }
}
