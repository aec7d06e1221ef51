//! AEAD sealing for IPC frames.
//!
//! Two key layers: the long-lived root key, derived from the pre-shared
//! cluster secret, seals only the handshake (`Hello` and `KeyIssue`); the
//! per-link session key issued by the parent seals everything after.

use crate::error::ClusterError;
use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use sha2::{Digest, Sha256};

/// Tag length ChaCha20-Poly1305 produces.
pub const TAG_LEN: usize = 16;
/// Nonce length used on every frame.
pub const NONCE_LEN: usize = 12;

/// The cluster-wide root key, derived from the pre-shared secret.
#[derive(Clone)]
pub struct RootKey([u8; 32]);

impl RootKey {
    /// Derives the key as SHA-256 of the secret, so secrets of any length
    /// work and the raw secret never feeds the cipher directly.
    pub fn from_secret(secret: &[u8]) -> Self {
        let digest = Sha256::digest(secret);
        Self(digest.into())
    }

    /// Hex form, for handing to child processes via the environment.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn from_hex(hex: &str) -> Result<Self, ClusterError> {
        if hex.len() != 64 {
            return Err(ClusterError::Codec("root key must be 64 hex chars"));
        }
        let mut key = [0u8; 32];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).map_err(|_| ClusterError::Codec("bad hex"))?;
            key[i] = u8::from_str_radix(s, 16).map_err(|_| ClusterError::Codec("bad hex"))?;
        }
        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

/// A per-link session key issued by the parent at handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ClusterError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ClusterError::Codec("session key must be 32 bytes"))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("SessionKey(..)")
    }
}

/// A fresh random nonce.
pub fn random_nonce() -> [u8; NONCE_LEN] {
    rand::random()
}

fn seal_with(
    cipher: &ChaCha20Poly1305,
    nonce: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), ClusterError> {
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(nonce), aad, &mut buffer)
        .map_err(|_| ClusterError::AuthFailed)?;
    Ok((buffer, tag.to_vec()))
}

fn open_with(
    cipher: &ChaCha20Poly1305,
    nonce: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, ClusterError> {
    if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(ClusterError::AuthFailed);
    }
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad,
            &mut buffer,
            chacha20poly1305::Tag::from_slice(tag),
        )
        .map_err(|_| ClusterError::AuthFailed)?;
    Ok(buffer)
}

impl RootKey {
    pub fn seal(
        &self,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), ClusterError> {
        seal_with(&self.cipher(), nonce, aad, plaintext)
    }

    pub fn open(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, ClusterError> {
        open_with(&self.cipher(), nonce, aad, ciphertext, tag)
    }
}

impl SessionKey {
    pub fn seal(
        &self,
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), ClusterError> {
        seal_with(&self.cipher(), nonce, aad, plaintext)
    }

    pub fn open(
        &self,
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, ClusterError> {
        open_with(&self.cipher(), nonce, aad, ciphertext, tag)
    }
}
