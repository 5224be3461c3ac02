// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Synchronous AEAD adapter for SPDM secured messages.
//!
//! The session layer encrypts and decrypts secured-message payloads through
//! this crate. Each operation is synchronous from the caller's point of
//! view: the backend transform may sleep, and the call returns once the
//! ciphertext (or plaintext) and detached authentication tag are ready.
//!
//! Two call conventions are provided:
//!
//! - The **prealloc** path ([`AeadContext`]) holds a backend transform and
//!   fixed-capacity staging buffers for the lifetime of a session, so
//!   per-message calls allocate nothing.
//! - The **one-shot** path ([`one_shot_encrypt`], [`one_shot_decrypt`])
//!   allocates a transform and exact-size staging buffers for a single call,
//!   for callers without a long-lived context.
//!
//! Caller buffers that the backend cannot touch directly (device-mapped
//! apertures, DMA windows) are staged through shadow copies; see
//! [`Addressability`]. The backend itself is injected through
//! [`AeadProvider`], so a build without a usable crypto library runs against
//! the stub provider and [`backend_available`] reports that secure sessions
//! cannot be established.

#![warn(missing_docs)]

mod scratch;

use aead_backend::AeadProvider;
use aead_backend::AeadTransform;
use aead_backend::TransformError;
use scratch::ScratchBuffer;
use thiserror::Error;

/// Maximum message and AAD size supported by the prealloc path, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 2 << 20;

/// Maximum authentication tag size staged by a context, in bytes.
pub const MAX_TAG_SIZE: usize = 16;

/// IV length required by the supported cipher suites, in bytes.
pub const IV_LEN: usize = 12;

/// An AEAD cipher suite.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES in Galois/Counter Mode, with a 128-, 192-, or 256-bit key.
    AesGcm,
    /// ChaCha20-Poly1305 with a 256-bit key.
    Chacha20Poly1305,
}

impl AeadAlgorithm {
    /// The backend algorithm name for this suite.
    pub fn name(&self) -> &'static str {
        match self {
            AeadAlgorithm::AesGcm => aead_backend::AES_GCM,
            AeadAlgorithm::Chacha20Poly1305 => aead_backend::CHACHA20_POLY1305,
        }
    }

    fn valid_key_size(&self, len: usize) -> bool {
        match self {
            AeadAlgorithm::AesGcm => matches!(len, 16 | 24 | 32),
            AeadAlgorithm::Chacha20Poly1305 => len == 32,
        }
    }

    fn valid_tag_size(&self, len: usize) -> bool {
        match self {
            AeadAlgorithm::AesGcm => (12..=16).contains(&len),
            AeadAlgorithm::Chacha20Poly1305 => len == 16,
        }
    }
}

/// An error from an AEAD adapter operation.
#[derive(Debug, Error)]
pub enum AeadError {
    /// The backend does not provide the requested algorithm.
    #[error("AEAD algorithm not available in this backend")]
    UnsupportedAlgorithm,
    /// The backend failed to allocate a transform.
    #[error("AEAD resource allocation failed")]
    AllocationFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A parameter is outside the documented size policy.
    #[error("invalid {what} size {len}")]
    InvalidArgument {
        /// The parameter that failed validation.
        what: &'static str,
        /// The rejected size.
        len: usize,
    },
    /// The caller's data exceeds the context's staging capacity.
    ///
    /// The one-shot path has no such limit.
    #[error("buffer of {len} bytes exceeds the supported maximum of {max}")]
    BufferTooLarge {
        /// The rejected size.
        len: usize,
        /// The context's staging capacity.
        max: usize,
    },
    /// The authentication tag did not verify; the message must be rejected,
    /// not retried.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// The backend transform failed.
    #[error("transform error")]
    Transform(#[source] TransformError),
}

/// Classifies caller buffers as directly usable by the backend transform or
/// as requiring a staged copy.
///
/// Memory that is not plain host memory (a device-mapped aperture, a DMA
/// window) cannot be handed to every backend directly. The oracle is
/// consulted once per buffer per operation; classification is never cached
/// across calls.
pub trait Addressability: Send + Sync {
    /// Returns true if the transform may operate on `buf` directly.
    fn is_direct(&self, buf: &[u8]) -> bool;
}

/// Classifies every buffer as directly usable. This is the right oracle for
/// ordinary host memory.
pub struct DirectMemory;

impl Addressability for DirectMemory {
    fn is_direct(&self, _buf: &[u8]) -> bool {
        true
    }
}

enum TagRole<'a> {
    Encrypt(&'a mut [u8]),
    Decrypt(&'a [u8]),
}

impl TagRole<'_> {
    fn len(&self) -> usize {
        match self {
            TagRole::Encrypt(tag) => tag.len(),
            TagRole::Decrypt(tag) => tag.len(),
        }
    }
}

/// A long-lived AEAD context with preallocated staging buffers.
///
/// The context owns one backend transform and fixed scratch buffers reused
/// by every operation, so per-message calls allocate nothing. One operation
/// is in flight at a time: every operation takes `&mut self`, and two
/// contexts share no state, so independent contexts may run concurrently.
///
/// Key material is supplied per call and is never stored in the context.
pub struct AeadContext {
    algorithm: AeadAlgorithm,
    tfm: Box<dyn AeadTransform>,
    addr: Box<dyn Addressability>,
    aad_scratch: ScratchBuffer,
    data_scratch: ScratchBuffer,
    tag_scratch: [u8; MAX_TAG_SIZE],
}

impl AeadContext {
    /// Creates a context for `algorithm` with a transform allocated from
    /// `provider`.
    pub fn new(provider: &dyn AeadProvider, algorithm: AeadAlgorithm) -> Result<Self, AeadError> {
        Self::with_addressability(provider, algorithm, Box::new(DirectMemory))
    }

    /// Creates a context with a caller-supplied addressability oracle.
    pub fn with_addressability(
        provider: &dyn AeadProvider,
        algorithm: AeadAlgorithm,
        addr: Box<dyn Addressability>,
    ) -> Result<Self, AeadError> {
        let tfm = provider.alloc(algorithm.name()).map_err(map_transform)?;
        Ok(Self {
            algorithm,
            tfm,
            addr,
            aad_scratch: ScratchBuffer::new(MAX_MESSAGE_SIZE),
            data_scratch: ScratchBuffer::new(MAX_MESSAGE_SIZE),
            tag_scratch: [0; MAX_TAG_SIZE],
        })
    }

    /// Encrypts `plaintext` with AES-GCM, writing the ciphertext to `output`
    /// and the detached tag to `tag`.
    ///
    /// Returns the number of ciphertext bytes written, always equal to
    /// `plaintext.len()`.
    pub fn aes_gcm_encrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        output: &mut [u8],
        tag: &mut [u8],
    ) -> Result<usize, AeadError> {
        self.suite_crypt(
            AeadAlgorithm::AesGcm,
            key,
            iv,
            aad,
            plaintext,
            output,
            TagRole::Encrypt(tag),
        )
    }

    /// Verifies `tag` and decrypts `ciphertext` with AES-GCM, writing the
    /// plaintext to `output`.
    ///
    /// On [`AeadError::AuthenticationFailed`] no plaintext is made visible
    /// to the caller.
    pub fn aes_gcm_decrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        output: &mut [u8],
        tag: &[u8],
    ) -> Result<usize, AeadError> {
        self.suite_crypt(
            AeadAlgorithm::AesGcm,
            key,
            iv,
            aad,
            ciphertext,
            output,
            TagRole::Decrypt(tag),
        )
    }

    /// Encrypts `plaintext` with ChaCha20-Poly1305, writing the ciphertext
    /// to `output` and the detached tag to `tag`.
    pub fn chacha20_poly1305_encrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        plaintext: &[u8],
        output: &mut [u8],
        tag: &mut [u8],
    ) -> Result<usize, AeadError> {
        self.suite_crypt(
            AeadAlgorithm::Chacha20Poly1305,
            key,
            iv,
            aad,
            plaintext,
            output,
            TagRole::Encrypt(tag),
        )
    }

    /// Verifies `tag` and decrypts `ciphertext` with ChaCha20-Poly1305,
    /// writing the plaintext to `output`.
    pub fn chacha20_poly1305_decrypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
        output: &mut [u8],
        tag: &[u8],
    ) -> Result<usize, AeadError> {
        self.suite_crypt(
            AeadAlgorithm::Chacha20Poly1305,
            key,
            iv,
            aad,
            ciphertext,
            output,
            TagRole::Decrypt(tag),
        )
    }

    fn suite_crypt(
        &mut self,
        suite: AeadAlgorithm,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        input: &[u8],
        output: &mut [u8],
        tag: TagRole<'_>,
    ) -> Result<usize, AeadError> {
        if self.algorithm != suite {
            return Err(AeadError::UnsupportedAlgorithm);
        }
        check_policy(suite, key, iv, aad, input, output.len(), tag.len())?;
        self.crypt(key, iv, aad, input, output, tag)
    }

    fn crypt(
        &mut self,
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
        input: &[u8],
        output: &mut [u8],
        tag: TagRole<'_>,
    ) -> Result<usize, AeadError> {
        // Capacity is enforced before the transform is touched, and
        // independently of how the buffers are classified, so the caller
        // contract does not vary with the oracle.
        if input.len() > MAX_MESSAGE_SIZE {
            return Err(AeadError::BufferTooLarge {
                len: input.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        if aad.len() > MAX_MESSAGE_SIZE {
            return Err(AeadError::BufferTooLarge {
                len: aad.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let Self {
            tfm,
            addr,
            aad_scratch,
            data_scratch,
            tag_scratch,
            ..
        } = self;
        let tfm = tfm.as_mut();

        tfm.set_key(key).map_err(map_transform)?;
        if tfm.iv_len() != iv.len() {
            return Err(AeadError::InvalidArgument {
                what: "iv",
                len: iv.len(),
            });
        }
        if tag.len() > tfm.max_tag_len() {
            return Err(AeadError::InvalidArgument {
                what: "tag",
                len: tag.len(),
            });
        }
        tfm.set_tag_len(tag.len()).map_err(map_transform)?;

        let aad = if addr.is_direct(aad) {
            aad
        } else {
            let staged = &mut aad_scratch.as_mut_bytes()[..aad.len()];
            staged.copy_from_slice(aad);
            &*staged
        };

        let output = &mut output[..input.len()];
        let mut shadow = if addr.is_direct(output) {
            output.copy_from_slice(input);
            None
        } else {
            let staged = &mut data_scratch.as_mut_bytes()[..input.len()];
            staged.copy_from_slice(input);
            Some(staged)
        };

        dispatch(
            tfm,
            iv,
            aad,
            output,
            shadow.as_deref_mut(),
            tag,
            &mut tag_scratch[..],
        )
    }
}

/// Encrypts `plaintext` without a long-lived context, allocating a transform
/// and any staging buffers for this call only.
///
/// More expensive per call than [`AeadContext`], but not subject to
/// [`MAX_MESSAGE_SIZE`].
pub fn one_shot_encrypt(
    provider: &dyn AeadProvider,
    algorithm: AeadAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    output: &mut [u8],
    tag: &mut [u8],
) -> Result<usize, AeadError> {
    check_policy(algorithm, key, iv, aad, plaintext, output.len(), tag.len())?;
    one_shot_crypt(
        provider,
        &DirectMemory,
        algorithm,
        key,
        iv,
        aad,
        plaintext,
        output,
        TagRole::Encrypt(tag),
    )
}

/// Verifies `tag` and decrypts `ciphertext` without a long-lived context.
///
/// On [`AeadError::AuthenticationFailed`] no plaintext is made visible to
/// the caller.
pub fn one_shot_decrypt(
    provider: &dyn AeadProvider,
    algorithm: AeadAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    output: &mut [u8],
    tag: &[u8],
) -> Result<usize, AeadError> {
    check_policy(algorithm, key, iv, aad, ciphertext, output.len(), tag.len())?;
    one_shot_crypt(
        provider,
        &DirectMemory,
        algorithm,
        key,
        iv,
        aad,
        ciphertext,
        output,
        TagRole::Decrypt(tag),
    )
}

fn one_shot_crypt(
    provider: &dyn AeadProvider,
    addr: &dyn Addressability,
    algorithm: AeadAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    input: &[u8],
    output: &mut [u8],
    tag: TagRole<'_>,
) -> Result<usize, AeadError> {
    let mut tfm = provider.alloc(algorithm.name()).map_err(map_transform)?;
    tfm.set_key(key).map_err(map_transform)?;
    if tfm.iv_len() != iv.len() {
        return Err(AeadError::InvalidArgument {
            what: "iv",
            len: iv.len(),
        });
    }
    if tag.len() > tfm.max_tag_len() {
        return Err(AeadError::InvalidArgument {
            what: "tag",
            len: tag.len(),
        });
    }
    tfm.set_tag_len(tag.len()).map_err(map_transform)?;

    // Shadows are sized to this call and freed with it on every exit path.
    let aad_shadow;
    let aad = if addr.is_direct(aad) {
        aad
    } else {
        aad_shadow = aad.to_vec();
        &aad_shadow[..]
    };

    let output = &mut output[..input.len()];
    let mut shadow = if addr.is_direct(output) {
        output.copy_from_slice(input);
        None
    } else {
        Some(input.to_vec())
    };

    let mut tag_buf = [0; MAX_TAG_SIZE];
    dispatch(
        tfm.as_mut(),
        iv,
        aad,
        output,
        shadow.as_deref_mut(),
        tag,
        &mut tag_buf[..],
    )
}

/// Runs one staged operation on `tfm` and finishes the caller-visible
/// buffers according to the outcome.
///
/// `output` is the caller's destination, already trimmed to the input
/// length. When `shadow` is present it holds the staged input and receives
/// the transform's output in place; `output` is only written on success.
/// The tag always goes through `tag_scratch`.
fn dispatch(
    tfm: &mut dyn AeadTransform,
    iv: &[u8],
    aad: &[u8],
    output: &mut [u8],
    mut shadow: Option<&mut [u8]>,
    tag: TagRole<'_>,
    tag_scratch: &mut [u8],
) -> Result<usize, AeadError> {
    let staged_tag = &mut tag_scratch[..tag.len()];
    if let TagRole::Decrypt(tag) = &tag {
        staged_tag.copy_from_slice(tag);
    }

    let result = {
        let text: &mut [u8] = match shadow.as_deref_mut() {
            Some(staged) => staged,
            None => &mut *output,
        };
        match &tag {
            TagRole::Encrypt(_) => tfm.encrypt(iv, aad, text, staged_tag),
            TagRole::Decrypt(_) => tfm.decrypt(iv, aad, text, staged_tag),
        }
    };

    match result {
        Ok(()) => {
            if let Some(staged) = &shadow {
                output.copy_from_slice(staged);
            }
            if let TagRole::Encrypt(tag) = tag {
                tag.copy_from_slice(staged_tag);
            }
            Ok(output.len())
        }
        Err(TransformError::AuthenticationFailed) => {
            // Whatever the transform wrote is unauthenticated; none of it
            // reaches the caller.
            match &mut shadow {
                Some(staged) => staged.fill(0),
                None => output.fill(0),
            }
            tracing::warn!("rejecting secured message: AEAD authentication failed");
            Err(AeadError::AuthenticationFailed)
        }
        Err(err) => Err(map_transform(err)),
    }
}

fn check_policy(
    algorithm: AeadAlgorithm,
    key: &[u8],
    iv: &[u8],
    aad: &[u8],
    input: &[u8],
    output_capacity: usize,
    tag_len: usize,
) -> Result<(), AeadError> {
    // The lengths must fit the signed 32-bit accounting of the underlying
    // transform APIs.
    if i32::try_from(input.len()).is_err() {
        return Err(AeadError::InvalidArgument {
            what: "input",
            len: input.len(),
        });
    }
    if i32::try_from(aad.len()).is_err() {
        return Err(AeadError::InvalidArgument {
            what: "aad",
            len: aad.len(),
        });
    }
    if iv.len() != IV_LEN {
        return Err(AeadError::InvalidArgument {
            what: "iv",
            len: iv.len(),
        });
    }
    if !algorithm.valid_key_size(key.len()) {
        return Err(AeadError::InvalidArgument {
            what: "key",
            len: key.len(),
        });
    }
    if !algorithm.valid_tag_size(tag_len) {
        return Err(AeadError::InvalidArgument {
            what: "tag",
            len: tag_len,
        });
    }
    if output_capacity < input.len() {
        return Err(AeadError::InvalidArgument {
            what: "output",
            len: output_capacity,
        });
    }
    Ok(())
}

fn map_transform(err: TransformError) -> AeadError {
    match err {
        TransformError::UnsupportedAlgorithm => AeadError::UnsupportedAlgorithm,
        TransformError::AllocationFailed(err) => AeadError::AllocationFailed(err),
        TransformError::InvalidKeySize(len) => AeadError::InvalidArgument { what: "key", len },
        TransformError::InvalidTagSize(len) => AeadError::InvalidArgument { what: "tag", len },
        TransformError::AuthenticationFailed => AeadError::AuthenticationFailed,
        err => AeadError::Transform(err),
    }
}

/// Returns whether `provider` can supply transforms for secure sessions.
///
/// Intended to be probed once at startup. When the backend is unavailable
/// the session layer disables secure-session establishment up front instead
/// of failing every operation.
pub fn backend_available(provider: &dyn AeadProvider) -> bool {
    let available = provider.is_available();
    if !available {
        tracing::error!("no usable AEAD backend, secure sessions are disabled");
    }
    available
}
