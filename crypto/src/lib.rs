//! Cryptographic primitives for keymesh.
//!
//! Thin, typed wrappers over the RustCrypto stack: digests, MACs, KDFs,
//! P-256 signing/agreement, AEAD, and the password-based envelope that
//! protects seed-negotiation traffic. Higher layers never touch the
//! underlying crates directly; everything they need is re-exported here
//! with fixed algorithm choices (SHA-256, P-256, A128GCM, A128KW).

use keymesh_common::jwk::JwkError;
use thiserror::Error;

pub mod aead;
pub mod digest;
pub mod ec;
pub mod envelope;
pub mod kdf;
pub mod mac;
pub mod rng;

/// Failures below the protocol layer: bad key material, unusable curve
/// points, or the system RNG going away.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("System RNG unavailable: {0}")]
    Rng(String),

    #[error("Requested KDF output length is out of range")]
    KdfLength,

    #[error("Derived scalar is zero")]
    InvalidScalar,

    #[error("Shared point is the point at infinity")]
    PointAtInfinity,

    #[error(transparent)]
    Jwk(#[from] JwkError),
}
