//! Stable request fingerprints for cache keys.
//!
//! Request objects are never serialized for cache keys; instead a
//! fingerprint is derived from the parts of the request that must be equal
//! for a cached response to be valid: method, path, a caller-selected set of
//! headers, and a hash of the body.

use crate::HttpRequest;
use sha2::{Digest, Sha256};

/// Computes collision-resistant cache keys from requests.
///
/// The selected headers are part of the constructor so every key produced by
/// one fingerprinter is comparable: two requests differing only in an
/// unselected header map to the same key.
#[derive(Debug, Clone)]
pub struct RequestFingerprint {
    vary_headers: Vec<String>,
}

impl RequestFingerprint {
    /// A fingerprinter that keys on method, path, and body only.
    pub fn new() -> Self {
        Self {
            vary_headers: Vec::new(),
        }
    }

    /// A fingerprinter that additionally keys on the given headers.
    ///
    /// Header names are compared case-insensitively; the order given here is
    /// canonical, so callers listing the same headers in different orders
    /// still produce identical keys for identical requests.
    pub fn with_headers<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vary_headers: Vec<String> = headers
            .into_iter()
            .map(|h| h.into().to_ascii_lowercase())
            .collect();
        vary_headers.sort();
        vary_headers.dedup();
        Self { vary_headers }
    }

    /// Derives the fingerprint for `request` as a hex string.
    pub fn compute(&self, request: &HttpRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.method().as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(request.path().as_bytes());
        hasher.update([0u8]);
        if let Some(query) = request.raw_query() {
            hasher.update(query.as_bytes());
        }
        hasher.update([0u8]);
        for name in &self.vary_headers {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            if let Some(value) = request.header(name) {
                hasher.update(value.as_bytes());
            }
            hasher.update([0u8]);
        }
        // Body contributes through its own digest so large bodies hash once.
        let body_digest = Sha256::digest(request.body());
        hasher.update(body_digest);

        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl Default for RequestFingerprint {
    fn default() -> Self {
        Self::new()
    }
}
