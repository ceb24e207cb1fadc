//! Password-based envelope for seed-negotiation traffic.
//!
//! A compact, five-segment JWE (`header.ek.iv.ct.tag`, each base64url
//! without padding) using `PBES2-HS256+A128KW` key management and
//! `A128GCM` content encryption. The negotiating devices share a password
//! out-of-band; nothing else protects the pairwise channel.
//!
//! # Construction
//!
//! - KEK = PBKDF2-HMAC-SHA256(password, `alg || 0x00 || p2s`, p2c) → 128 bits
//! - random 128-bit CEK, AES-KW-wrapped under the KEK → `ek`
//! - random 96-bit IV; AES-128-GCM with the base64url header as AAD
//!
//! Decode uses the received header segment verbatim as AAD and honors the
//! `p2c` it carries. Malformed input is [`EnvelopeError::Format`]; anything
//! that fails only once keys are involved is [`EnvelopeError::Decrypt`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keymesh_common::b64u;

use crate::{CryptoError, aead, kdf, rng};

pub const PBES2_ALG: &str = "PBES2-HS256+A128KW";
pub const PBES2_ENC: &str = "A128GCM";

/// PBKDF2 iteration count used when sealing. Decoding honors the header.
pub const PBES2_ITERATIONS: u32 = 1000;

const SALT_LEN: usize = 16;
const CEK_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    Format(&'static str),

    #[error("Envelope decryption failed")]
    Decrypt,

    #[error("Envelope encryption failed")]
    Encrypt,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    enc: String,
    p2c: u32,
    p2s: String,
}

fn derive_kek(password: &str, p2s: &[u8], rounds: u32) -> [u8; 16] {
    // RFC 7518 §4.8.1.1: the PBKDF2 salt is the alg name, a zero byte,
    // then the decoded p2s.
    let mut salt = Vec::with_capacity(PBES2_ALG.len() + 1 + p2s.len());
    salt.extend_from_slice(PBES2_ALG.as_bytes());
    salt.push(0x00);
    salt.extend_from_slice(p2s);

    let mut kek = [0u8; 16];
    kdf::pbkdf2_hmac_sha256(password.as_bytes(), &salt, rounds, &mut kek);
    kek
}

/// Encrypt `plaintext` under `password` into the compact five-segment form.
pub fn seal(password: &str, plaintext: &[u8]) -> Result<String, EnvelopeError> {
    let p2s: [u8; SALT_LEN] = rng::random_array()?;
    let kek = derive_kek(password, &p2s, PBES2_ITERATIONS);

    let cek: [u8; CEK_LEN] = rng::random_array()?;
    let ek = aead::aes_kw_wrap(&kek, &cek).map_err(|_| EnvelopeError::Encrypt)?;

    let header = Header {
        alg: PBES2_ALG.to_string(),
        enc: PBES2_ENC.to_string(),
        p2c: PBES2_ITERATIONS,
        p2s: b64u::encode(p2s),
    };
    let header_b64 =
        b64u::encode(serde_json::to_string(&header).map_err(|_| EnvelopeError::Encrypt)?);

    let iv: [u8; aead::GCM_IV_LEN] = rng::random_array()?;
    let (ct, tag) = aead::aes_gcm_seal(&cek, &iv, header_b64.as_bytes(), plaintext)
        .map_err(|_| EnvelopeError::Encrypt)?;

    Ok(format!(
        "{header_b64}.{}.{}.{}.{}",
        b64u::encode(ek),
        b64u::encode(iv),
        b64u::encode(ct),
        b64u::encode(tag)
    ))
}

/// Decrypt a compact five-segment envelope with `password`.
pub fn open(password: &str, compact: &str) -> Result<Vec<u8>, EnvelopeError> {
    let segments: Vec<&str> = compact.split('.').collect();
    let [header_b64, ek_b64, iv_b64, ct_b64, tag_b64] = segments.as_slice() else {
        return Err(EnvelopeError::Format("expected 5 segments"));
    };

    let header_json =
        b64u::decode(header_b64).map_err(|_| EnvelopeError::Format("header encoding"))?;
    let header: Header =
        serde_json::from_slice(&header_json).map_err(|_| EnvelopeError::Format("header JSON"))?;
    if header.alg != PBES2_ALG || header.enc != PBES2_ENC {
        return Err(EnvelopeError::Format("unsupported alg/enc"));
    }

    let p2s = b64u::decode(&header.p2s).map_err(|_| EnvelopeError::Format("p2s encoding"))?;
    if p2s.len() != SALT_LEN {
        return Err(EnvelopeError::Format("p2s length"));
    }

    let ek = b64u::decode(ek_b64).map_err(|_| EnvelopeError::Format("ek encoding"))?;
    let iv: [u8; aead::GCM_IV_LEN] = b64u::decode(iv_b64)
        .map_err(|_| EnvelopeError::Format("iv encoding"))?
        .try_into()
        .map_err(|_| EnvelopeError::Format("iv length"))?;
    let ct = b64u::decode(ct_b64).map_err(|_| EnvelopeError::Format("ciphertext encoding"))?;
    let tag = b64u::decode(tag_b64).map_err(|_| EnvelopeError::Format("tag encoding"))?;
    if tag.len() != aead::GCM_TAG_LEN {
        return Err(EnvelopeError::Format("tag length"));
    }

    let kek = derive_kek(password, &p2s, header.p2c);
    let cek: [u8; CEK_LEN] = aead::aes_kw_unwrap(&kek, &ek)
        .map_err(|_| EnvelopeError::Decrypt)?
        .try_into()
        .map_err(|_| EnvelopeError::Decrypt)?;

    aead::aes_gcm_open(&cek, &iv, header_b64.as_bytes(), &ct, &tag)
        .map_err(|_| EnvelopeError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let compact = seal("hunter2", b"A.{\"0\":{}}").unwrap();
        assert_eq!(
            compact.split('.').count(),
            5,
            "compact form must have 5 segments"
        );
        assert_eq!(open("hunter2", &compact).unwrap(), b"A.{\"0\":{}}");
    }

    #[test]
    fn test_header_shape() {
        let compact = seal("pw", b"payload").unwrap();
        let header_b64 = compact.split('.').next().unwrap();
        let header: serde_json::Value =
            serde_json::from_slice(&b64u::decode(header_b64).unwrap()).unwrap();

        assert_eq!(header["alg"], PBES2_ALG);
        assert_eq!(header["enc"], PBES2_ENC);
        assert_eq!(header["p2c"], 1000);
        assert_eq!(
            b64u::decode(header["p2s"].as_str().unwrap()).unwrap().len(),
            16
        );
    }

    #[test]
    fn test_wrong_password_is_decrypt_error() {
        let compact = seal("correct", b"payload").unwrap();
        assert!(matches!(
            open("incorrect", &compact),
            Err(EnvelopeError::Decrypt)
        ));
    }

    #[test]
    fn test_segment_count_is_format_error() {
        assert!(matches!(
            open("pw", "a.b.c.d"),
            Err(EnvelopeError::Format(_))
        ));
        assert!(matches!(
            open("pw", "a.b.c.d.e.f"),
            Err(EnvelopeError::Format(_))
        ));
    }

    #[test]
    fn test_garbage_header_is_format_error() {
        let compact = seal("pw", b"payload").unwrap();
        let mut segments: Vec<&str> = compact.split('.').collect();
        segments[0] = "bm90LWpzb24";
        assert!(matches!(
            open("pw", &segments.join(".")),
            Err(EnvelopeError::Format(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_is_decrypt_error() {
        let compact = seal("pw", b"payload").unwrap();
        let mut segments: Vec<String> =
            compact.split('.').map(str::to_string).collect();
        let mut ct = b64u::decode(&segments[3]).unwrap();
        ct[0] ^= 0xff;
        segments[3] = b64u::encode(ct);
        assert!(matches!(
            open("pw", &segments.join(".")),
            Err(EnvelopeError::Decrypt)
        ));
    }

    #[test]
    fn test_header_is_authenticated() {
        // Swapping the header (the AAD) after sealing must break the tag,
        // even when the replacement is self-consistent.
        let a = seal("pw", b"payload").unwrap();
        let b = seal("pw", b"payload").unwrap();
        let swapped = format!(
            "{}.{}",
            b.split('.').next().unwrap(),
            a.splitn(2, '.').nth(1).unwrap()
        );
        assert!(matches!(open("pw", &swapped), Err(EnvelopeError::Decrypt)));
    }
}
