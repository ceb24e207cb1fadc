//! Authenticated encryption: AES-128-GCM and AES Key Wrap (RFC 3394).
//!
//! GCM uses a 96-bit IV and a 128-bit tag, kept detached so the envelope
//! layer can place the tag in its own compact segment.

use aes_gcm::{
    Aes128Gcm, Key, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use aes_kw::KekAes128;
use thiserror::Error;

pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("Encryption failed")]
    Seal,

    #[error("Decryption failed")]
    Open,

    #[error("Key wrap failed")]
    Wrap,

    #[error("Key unwrap failed")]
    Unwrap,
}

/// AES-128-GCM encrypt. Returns `(ciphertext, tag)` with the tag detached.
pub fn aes_gcm_seal(
    key: &[u8; 16],
    iv: &[u8; GCM_IV_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; GCM_TAG_LEN]), AeadError> {
    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    let mut combined = cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| AeadError::Seal)?;

    // aes-gcm appends the tag to the ciphertext; split it back off.
    let tag_bytes = combined.split_off(combined.len() - GCM_TAG_LEN);
    let mut tag = [0u8; GCM_TAG_LEN];
    tag.copy_from_slice(&tag_bytes);
    Ok((combined, tag))
}

/// AES-128-GCM decrypt with a detached tag.
pub fn aes_gcm_open(
    key: &[u8; 16],
    iv: &[u8; GCM_IV_LEN],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> Result<Vec<u8>, AeadError> {
    if tag.len() != GCM_TAG_LEN {
        return Err(AeadError::Open);
    }
    let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
    combined.extend_from_slice(ciphertext);
    combined.extend_from_slice(tag);

    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: &combined, aad })
        .map_err(|_| AeadError::Open)
}

/// AES-KW wrap (RFC 3394) under a 128-bit KEK. Key data must be a
/// multiple of 8 bytes; the output is 8 bytes longer.
pub fn aes_kw_wrap(kek: &[u8; 16], key_data: &[u8]) -> Result<Vec<u8>, AeadError> {
    let mut out = vec![0u8; key_data.len() + 8];
    KekAes128::from(*kek)
        .wrap(key_data, &mut out)
        .map_err(|_| AeadError::Wrap)?;
    Ok(out)
}

/// AES-KW unwrap (RFC 3394) under a 128-bit KEK.
pub fn aes_kw_unwrap(kek: &[u8; 16], wrapped: &[u8]) -> Result<Vec<u8>, AeadError> {
    let Some(out_len) = wrapped.len().checked_sub(8) else {
        return Err(AeadError::Unwrap);
    };
    let mut out = vec![0u8; out_len];
    KekAes128::from(*kek)
        .unwrap(wrapped, &mut out)
        .map_err(|_| AeadError::Unwrap)?;
    Ok(out)
}
