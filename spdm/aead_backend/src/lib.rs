// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Capability interface for authenticated-encryption (AEAD) backends.
//!
//! The SPDM secured-message layer performs all of its symmetric crypto
//! through the [`AeadTransform`] contract defined here. Transforms are
//! allocated by name through an [`AeadProvider`], chosen by the embedder at
//! configuration time: a build with a usable crypto library wires up a real
//! provider, while a build without one wires up [`StubAeadProvider`] and the
//! session layer disables secure sessions after probing it.

#![warn(missing_docs)]

use thiserror::Error;

/// Algorithm name for AES in Galois/Counter Mode.
pub const AES_GCM: &str = "gcm(aes)";

/// Algorithm name for ChaCha20-Poly1305.
pub const CHACHA20_POLY1305: &str = "rfc7539(chacha20,poly1305)";

/// An error returned by an AEAD backend.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The requested algorithm is not available in this backend.
    #[error("algorithm not supported by this backend")]
    UnsupportedAlgorithm,
    /// The backend failed to allocate a transform.
    #[error("transform allocation failed")]
    AllocationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The key length is not accepted by the transform.
    #[error("invalid key size {0}")]
    InvalidKeySize(usize),
    /// The tag length is not accepted by the transform.
    #[error("invalid tag size {0}")]
    InvalidTagSize(usize),
    /// The authentication tag did not verify during decryption.
    ///
    /// The ciphertext, tag, or associated data was altered, or the wrong
    /// key or IV was used. Not retriable.
    #[error("authentication tag mismatch")]
    AuthenticationFailed,
    /// An opaque backend failure.
    #[error("transform failure")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Allocates AEAD transforms by algorithm name.
pub trait AeadProvider: Send + Sync {
    /// Returns whether this provider can allocate transforms at all.
    ///
    /// Probed once at startup; a provider that reports `false` here fails
    /// every [`alloc`](Self::alloc) call.
    fn is_available(&self) -> bool;

    /// Allocates a transform for `algorithm` (e.g. [`AES_GCM`]).
    fn alloc(&self, algorithm: &str) -> Result<Box<dyn AeadTransform>, TransformError>;
}

/// A single AEAD transform instance.
///
/// A transform is configured per operation: [`set_key`](Self::set_key) and
/// [`set_tag_len`](Self::set_tag_len) apply to the next
/// [`encrypt`](Self::encrypt) or [`decrypt`](Self::decrypt) call. No key
/// material persists across operations beyond that. Implementations block
/// the calling thread until the operation completes; there is no timeout or
/// cancellation.
///
/// Buffers handed to a transform must be plain host memory the backend can
/// touch directly. Callers holding data elsewhere stage it first.
pub trait AeadTransform: Send {
    /// The IV length the transform requires, in bytes.
    fn iv_len(&self) -> usize;

    /// The maximum authentication tag length the transform supports.
    fn max_tag_len(&self) -> usize;

    /// Sets the key for the next operation.
    fn set_key(&mut self, key: &[u8]) -> Result<(), TransformError>;

    /// Sets the authentication tag length for the next operation.
    fn set_tag_len(&mut self, tag_len: usize) -> Result<(), TransformError>;

    /// Encrypts `text` in place and writes the authentication tag over
    /// `aad` and the ciphertext to `tag`.
    fn encrypt(
        &mut self,
        iv: &[u8],
        aad: &[u8],
        text: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), TransformError>;

    /// Verifies `tag` over `aad` and the ciphertext in `text`, then
    /// decrypts `text` in place.
    ///
    /// On [`TransformError::AuthenticationFailed`] the contents of `text`
    /// are unspecified; callers must not treat them as plaintext.
    fn decrypt(
        &mut self,
        iv: &[u8],
        aad: &[u8],
        text: &mut [u8],
        tag: &[u8],
    ) -> Result<(), TransformError>;
}

/// The provider used when no crypto backend is compiled in.
///
/// Reports itself unavailable and fails every allocation, so the session
/// layer falls back to plaintext-only operation after probing.
pub struct StubAeadProvider;

impl AeadProvider for StubAeadProvider {
    fn is_available(&self) -> bool {
        false
    }

    fn alloc(&self, _algorithm: &str) -> Result<Box<dyn AeadTransform>, TransformError> {
        Err(TransformError::UnsupportedAlgorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_is_unavailable() {
        assert!(!StubAeadProvider.is_available());
        assert!(matches!(
            StubAeadProvider.alloc(AES_GCM),
            Err(TransformError::UnsupportedAlgorithm)
        ));
    }
}
