//! Key derivation: HKDF-SHA256 (RFC 5869) and PBKDF2-HMAC-SHA256.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::CryptoError;

/// HKDF-SHA256 extract-and-expand into `okm`.
pub fn hkdf_sha256(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
    okm: &mut [u8],
) -> Result<(), CryptoError> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|_| CryptoError::KdfLength)
}

/// PBKDF2-HMAC-SHA256 with `rounds` iterations into `out`.
pub fn pbkdf2_hmac_sha256(password: &[u8], salt: &[u8], rounds: u32, out: &mut [u8]) {
    pbkdf2_hmac::<Sha256>(password, salt, rounds, out);
}
