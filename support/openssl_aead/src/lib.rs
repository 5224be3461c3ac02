// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! OpenSSL-backed implementation of the [`aead_backend`] capability
//! interface, covering AES-GCM and ChaCha20-Poly1305.

#![warn(missing_docs)]

use aead_backend::AeadProvider;
use aead_backend::AeadTransform;
use aead_backend::TransformError;
use openssl::cipher::CipherRef;
use openssl::cipher_ctx::CipherCtx;
use openssl::error::ErrorStack;

/// Granularity for driving the cipher through large messages.
const UPDATE_CHUNK: usize = 0x10000;

/// Allocates [`OsslAead`] transforms.
pub struct OsslAeadProvider;

impl AeadProvider for OsslAeadProvider {
    fn is_available(&self) -> bool {
        CipherCtx::new().is_ok()
    }

    fn alloc(&self, algorithm: &str) -> Result<Box<dyn AeadTransform>, TransformError> {
        let suite = match algorithm {
            aead_backend::AES_GCM => Suite::AesGcm,
            aead_backend::CHACHA20_POLY1305 => Suite::Chacha20Poly1305,
            _ => return Err(TransformError::UnsupportedAlgorithm),
        };
        Ok(Box::new(OsslAead::new(suite)?))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Suite {
    AesGcm,
    Chacha20Poly1305,
}

impl Suite {
    fn cipher(&self, key_len: usize) -> Option<&'static CipherRef> {
        match self {
            Suite::AesGcm => match key_len {
                16 => Some(openssl::cipher::Cipher::aes_128_gcm()),
                24 => Some(openssl::cipher::Cipher::aes_192_gcm()),
                32 => Some(openssl::cipher::Cipher::aes_256_gcm()),
                _ => None,
            },
            Suite::Chacha20Poly1305 => match key_len {
                32 => Some(openssl::cipher::Cipher::chacha20_poly1305()),
                _ => None,
            },
        }
    }

    fn valid_tag_len(&self, tag_len: usize) -> bool {
        match self {
            Suite::AesGcm => matches!(tag_len, 4 | 8 | 12..=16),
            Suite::Chacha20Poly1305 => tag_len == 16,
        }
    }
}

/// An AEAD transform backed by an OpenSSL cipher context.
///
/// The cipher context is allocated once per transform and re-initialized on
/// every operation.
pub struct OsslAead {
    suite: Suite,
    ctx: CipherCtx,
    cipher: Option<&'static CipherRef>,
    key: Vec<u8>,
    tag_len: usize,
}

impl OsslAead {
    fn new(suite: Suite) -> Result<Self, TransformError> {
        let ctx = CipherCtx::new().map_err(alloc_failed)?;
        Ok(Self {
            suite,
            ctx,
            cipher: None,
            key: Vec::new(),
            tag_len: 16,
        })
    }

    fn run(
        &mut self,
        encrypt: bool,
        iv: &[u8],
        aad: &[u8],
        text: &mut [u8],
    ) -> Result<(), TransformError> {
        let cipher = self
            .cipher
            .ok_or(TransformError::InvalidKeySize(self.key.len()))?;
        if encrypt {
            self.ctx
                .encrypt_init(Some(cipher), Some(&self.key), Some(iv))
        } else {
            self.ctx
                .decrypt_init(Some(cipher), Some(&self.key), Some(iv))
        }
        .map_err(backend)?;
        if !aad.is_empty() {
            self.ctx.cipher_update(aad, None).map_err(backend)?;
        }
        // Both suites are stream modes, so the text can be processed in
        // place a chunk at a time.
        for chunk in text.chunks_mut(UPDATE_CHUNK) {
            let len = chunk.len();
            self.ctx.cipher_update_inplace(chunk, len).map_err(backend)?;
        }
        Ok(())
    }
}

impl Drop for OsslAead {
    fn drop(&mut self) {
        self.key.fill(0);
    }
}

impl AeadTransform for OsslAead {
    fn iv_len(&self) -> usize {
        12
    }

    fn max_tag_len(&self) -> usize {
        16
    }

    fn set_key(&mut self, key: &[u8]) -> Result<(), TransformError> {
        let cipher = self
            .suite
            .cipher(key.len())
            .ok_or(TransformError::InvalidKeySize(key.len()))?;
        self.key.fill(0);
        self.key.clear();
        self.key.extend_from_slice(key);
        self.cipher = Some(cipher);
        Ok(())
    }

    fn set_tag_len(&mut self, tag_len: usize) -> Result<(), TransformError> {
        if !self.suite.valid_tag_len(tag_len) {
            return Err(TransformError::InvalidTagSize(tag_len));
        }
        self.tag_len = tag_len;
        Ok(())
    }

    fn encrypt(
        &mut self,
        iv: &[u8],
        aad: &[u8],
        text: &mut [u8],
        tag: &mut [u8],
    ) -> Result<(), TransformError> {
        if tag.len() != self.tag_len {
            return Err(TransformError::InvalidTagSize(tag.len()));
        }
        self.run(true, iv, aad, text)?;
        self.ctx.cipher_final(&mut []).map_err(backend)?;
        self.ctx.tag(tag).map_err(backend)?;
        Ok(())
    }

    fn decrypt(
        &mut self,
        iv: &[u8],
        aad: &[u8],
        text: &mut [u8],
        tag: &[u8],
    ) -> Result<(), TransformError> {
        if tag.len() != self.tag_len {
            return Err(TransformError::InvalidTagSize(tag.len()));
        }
        self.run(false, iv, aad, text)?;
        self.ctx.set_tag(tag).map_err(backend)?;
        // A finalization failure after the tag is set means the tag did not
        // verify over the associated data and ciphertext.
        self.ctx
            .cipher_final(&mut [])
            .map_err(|_| TransformError::AuthenticationFailed)?;
        Ok(())
    }
}

fn alloc_failed(err: ErrorStack) -> TransformError {
    TransformError::AllocationFailed(Box::new(err))
}

fn backend(err: ErrorStack) -> TransformError {
    TransformError::Backend(Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aead_backend::AES_GCM;
    use aead_backend::CHACHA20_POLY1305;

    // McGrew/Viega GCM test cases 1, 2, 13, and 14.
    const TC1_TAG: [u8; 16] = [
        0x58, 0xe2, 0xfc, 0xce, 0xfa, 0x7e, 0x30, 0x61, 0x36, 0x7f, 0x1d, 0x57, 0xa4, 0xe7, 0x45,
        0x5a,
    ];
    const TC2_CT: [u8; 16] = [
        0x03, 0x88, 0xda, 0xce, 0x60, 0xb6, 0xa3, 0x92, 0xf3, 0x28, 0xc2, 0xb9, 0x71, 0xb2, 0xfe,
        0x78,
    ];
    const TC2_TAG: [u8; 16] = [
        0xab, 0x6e, 0x47, 0xd4, 0x2c, 0xec, 0x13, 0xbd, 0xf5, 0x3a, 0x67, 0xb2, 0x12, 0x57, 0xbd,
        0xdf,
    ];
    const TC13_TAG: [u8; 16] = [
        0x53, 0x0f, 0x8a, 0xfb, 0xc7, 0x45, 0x36, 0xb9, 0xa9, 0x63, 0xb4, 0xf1, 0xc4, 0xcb, 0x73,
        0x8b,
    ];
    const TC14_CT: [u8; 16] = [
        0xce, 0xa7, 0x40, 0x3d, 0x4d, 0x60, 0x6b, 0x6e, 0x07, 0x4e, 0xc5, 0xd3, 0xba, 0xf3, 0x9d,
        0x18,
    ];
    const TC14_TAG: [u8; 16] = [
        0xd0, 0xd1, 0xc8, 0xa7, 0x99, 0x99, 0x6b, 0xf0, 0x26, 0x5b, 0x98, 0xb5, 0xd4, 0x8a, 0xb9,
        0x19,
    ];

    fn transform(algorithm: &str) -> Box<dyn AeadTransform> {
        OsslAeadProvider.alloc(algorithm).unwrap()
    }

    #[test]
    fn provider_is_available() {
        assert!(OsslAeadProvider.is_available());
        assert!(matches!(
            OsslAeadProvider.alloc("xts(aes)"),
            Err(TransformError::UnsupportedAlgorithm)
        ));
    }

    #[test]
    fn gcm_kat_empty_plaintext() {
        let mut tfm = transform(AES_GCM);
        let mut tag = [0u8; 16];

        tfm.set_key(&[0; 16]).unwrap();
        tfm.encrypt(&[0; 12], &[], &mut [], &mut tag).unwrap();
        assert_eq!(tag, TC1_TAG);

        tfm.set_key(&[0; 32]).unwrap();
        tfm.encrypt(&[0; 12], &[], &mut [], &mut tag).unwrap();
        assert_eq!(tag, TC13_TAG);
    }

    #[test]
    fn gcm_kat_single_block() {
        let mut tfm = transform(AES_GCM);
        let mut tag = [0u8; 16];
        let mut text = [0u8; 16];

        tfm.set_key(&[0; 16]).unwrap();
        tfm.encrypt(&[0; 12], &[], &mut text, &mut tag).unwrap();
        assert_eq!(text, TC2_CT);
        assert_eq!(tag, TC2_TAG);

        tfm.set_key(&[0; 32]).unwrap();
        text = [0; 16];
        tfm.encrypt(&[0; 12], &[], &mut text, &mut tag).unwrap();
        assert_eq!(text, TC14_CT);
        assert_eq!(tag, TC14_TAG);
    }

    #[test]
    fn gcm_kat_decrypt() {
        let mut tfm = transform(AES_GCM);
        let mut text = TC2_CT;
        tfm.set_key(&[0; 16]).unwrap();
        tfm.decrypt(&[0; 12], &[], &mut text, &TC2_TAG).unwrap();
        assert_eq!(text, [0; 16]);
    }

    #[test]
    fn gcm_tamper_detected() {
        let mut tfm = transform(AES_GCM);
        tfm.set_key(&[0; 16]).unwrap();

        let mut text = TC2_CT;
        text[0] ^= 1;
        assert!(matches!(
            tfm.decrypt(&[0; 12], &[], &mut text, &TC2_TAG),
            Err(TransformError::AuthenticationFailed)
        ));

        let mut text = TC2_CT;
        let mut tag = TC2_TAG;
        tag[15] ^= 0x80;
        assert!(matches!(
            tfm.decrypt(&[0; 12], &[], &mut text, &tag),
            Err(TransformError::AuthenticationFailed)
        ));
    }

    #[test]
    fn gcm_aad_round_trip() {
        let mut tfm = transform(AES_GCM);
        let key = [7u8; 24];
        let iv = [9u8; 12];
        let aad = b"header bytes";
        let mut text = *b"attack at dawn";
        let mut tag = [0u8; 16];

        tfm.set_key(&key).unwrap();
        tfm.encrypt(&iv, aad, &mut text, &mut tag).unwrap();
        assert_ne!(&text, b"attack at dawn");

        tfm.decrypt(&iv, aad, &mut text, &tag).unwrap();
        assert_eq!(&text, b"attack at dawn");

        // The AAD participates in the tag.
        assert!(matches!(
            tfm.decrypt(&iv, b"other header", &mut text, &tag),
            Err(TransformError::AuthenticationFailed)
        ));
    }

    #[test]
    fn chacha20_poly1305_round_trip() {
        let mut tfm = transform(CHACHA20_POLY1305);
        let key: Vec<u8> = (0..32).collect();
        let iv = [3u8; 12];
        let mut text = *b"Ladies and Gentlemen of the class of '99";
        let mut tag = [0u8; 16];

        tfm.set_key(&key).unwrap();
        tfm.encrypt(&iv, b"aad", &mut text, &mut tag).unwrap();
        tfm.decrypt(&iv, b"aad", &mut text, &tag).unwrap();
        assert_eq!(&text, b"Ladies and Gentlemen of the class of '99");

        tag[0] ^= 1;
        assert!(matches!(
            tfm.decrypt(&iv, b"aad", &mut text, &tag),
            Err(TransformError::AuthenticationFailed)
        ));
    }

    #[test]
    fn key_size_policy() {
        let mut tfm = transform(AES_GCM);
        assert!(matches!(
            tfm.set_key(&[0; 17]),
            Err(TransformError::InvalidKeySize(17))
        ));
        let mut tfm = transform(CHACHA20_POLY1305);
        assert!(matches!(
            tfm.set_key(&[0; 16]),
            Err(TransformError::InvalidKeySize(16))
        ));
    }

    #[test]
    fn tag_len_must_match_configuration() {
        let mut tfm = transform(AES_GCM);
        tfm.set_key(&[0; 16]).unwrap();
        tfm.set_tag_len(12).unwrap();
        let mut tag = [0u8; 16];
        assert!(matches!(
            tfm.encrypt(&[0; 12], &[], &mut [], &mut tag),
            Err(TransformError::InvalidTagSize(16))
        ));
        assert!(matches!(
            tfm.set_tag_len(11),
            Err(TransformError::InvalidTagSize(11))
        ));
    }

    #[test]
    fn truncated_tag_round_trip() {
        let mut tfm = transform(AES_GCM);
        tfm.set_key(&[1; 32]).unwrap();
        tfm.set_tag_len(12).unwrap();
        let mut text = *b"short tag";
        let mut tag = [0u8; 12];
        tfm.encrypt(&[2; 12], &[], &mut text, &mut tag).unwrap();
        tfm.decrypt(&[2; 12], &[], &mut text, &tag).unwrap();
        assert_eq!(&text, b"short tag");
    }
}
