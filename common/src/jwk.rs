//! EC P-256 keys in JWK form, with RFC 7638 thumbprints.
//!
//! Every key the protocol moves around (credentials, attestation keys,
//! ownership verification keys, the ephemeral points of the seed
//! ceremony) is a P-256 key encoded as a JWK. This module owns the
//! encoding rules:
//!
//! - coordinates are base64url without padding and decode to exactly
//!   32 bytes (encoding left-pads to 32),
//! - the canonical JSON of a key is `{"crv","kty","x","y"}` in that exact
//!   order with no whitespace, and it doubles as the byte string other
//!   keys sign over,
//! - `kid` defaults to the base64url SHA-256 of the canonical JSON
//!   ([RFC 7638](https://www.rfc-editor.org/rfc/rfc7638)).

use p256::{
    EncodedPoint, FieldBytes, PublicKey, SecretKey,
    elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint},
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::b64u;

/// Key type for all keymesh keys.
pub const KTY_EC: &str = "EC";

/// Curve name for all keymesh keys.
pub const CRV_P256: &str = "P-256";

#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Unsupported key type: kty={kty} crv={crv}")]
    UnsupportedKeyType { kty: String, crv: String },

    #[error("Field {field} is not valid base64url")]
    InvalidEncoding { field: &'static str },

    #[error("Field {field} must decode to 32 bytes, got {actual}")]
    InvalidLength { field: &'static str, actual: usize },

    #[error("Coordinates do not describe a point on P-256")]
    NotOnCurve,

    #[error("Private scalar is zero or out of range")]
    InvalidScalar,
}

/// An EC P-256 public key in JWK form.
///
/// Equality is pointwise over `{kid, crv, x, y}`, where an absent `kid`
/// counts as the RFC 7638 thumbprint, so a key round-tripped through a
/// service that strips or adds the default `kid` still compares equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcPublicJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl EcPublicJwk {
    /// Encode a curve-level public key. `kid` is left unset; readers fall
    /// back to the thumbprint.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let point = key.to_encoded_point(false);
        // Uncompressed SEC1 points always carry both 32-byte coordinates.
        let x = point.x().map(b64u::encode).unwrap_or_default();
        let y = point.y().map(b64u::encode).unwrap_or_default();
        Self {
            kty: KTY_EC.to_string(),
            crv: CRV_P256.to_string(),
            x,
            y,
            kid: None,
        }
    }

    /// Decode into a curve-level public key, validating key type, curve,
    /// coordinate lengths, and curve membership.
    pub fn to_public_key(&self) -> Result<PublicKey, JwkError> {
        if self.kty != KTY_EC || self.crv != CRV_P256 {
            return Err(JwkError::UnsupportedKeyType {
                kty: self.kty.clone(),
                crv: self.crv.clone(),
            });
        }
        let x = decode_coordinate(&self.x, "x")?;
        let y = decode_coordinate(&self.y, "y")?;
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&x),
            FieldBytes::from_slice(&y),
            false,
        );
        Option::<PublicKey>::from(PublicKey::from_encoded_point(&point)).ok_or(JwkError::NotOnCurve)
    }

    /// Canonical JSON per RFC 7638: keys in the exact order
    /// `crv, kty, x, y`, no whitespace. This is also the byte string that
    /// attestation and OVK signatures cover when a key is being signed.
    pub fn canonical_json(&self) -> String {
        format!(
            r#"{{"crv":"{}","kty":"{}","x":"{}","y":"{}"}}"#,
            self.crv, self.kty, self.x, self.y
        )
    }

    /// RFC 7638 thumbprint: base64url(SHA-256(canonical JSON)).
    pub fn thumbprint(&self) -> String {
        b64u::encode(Sha256::digest(self.canonical_json().as_bytes()))
    }

    /// The effective key id: the stored `kid`, or the thumbprint when the
    /// field is absent.
    pub fn kid(&self) -> String {
        self.kid.clone().unwrap_or_else(|| self.thumbprint())
    }
}

impl PartialEq for EcPublicJwk {
    fn eq(&self, other: &Self) -> bool {
        self.crv == other.crv
            && self.x == other.x
            && self.y == other.y
            && self.kid() == other.kid()
    }
}

impl Eq for EcPublicJwk {}

/// An EC P-256 private key in JWK form: the public fields plus the scalar
/// `d`. Thumbprints ignore `d`, so a private JWK and its public half share
/// a thumbprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcPrivateJwk {
    #[serde(flatten)]
    pub public: EcPublicJwk,
    pub d: String,
}

impl EcPrivateJwk {
    pub fn from_secret_key(key: &SecretKey) -> Self {
        Self {
            public: EcPublicJwk::from_public_key(&key.public_key()),
            d: b64u::encode(key.to_bytes()),
        }
    }

    /// Decode into a curve-level secret key. The scalar must be 32 bytes,
    /// nonzero, and below the group order.
    pub fn to_secret_key(&self) -> Result<SecretKey, JwkError> {
        let d = decode_coordinate(&self.d, "d")?;
        SecretKey::from_slice(&d).map_err(|_| JwkError::InvalidScalar)
    }

    pub fn thumbprint(&self) -> String {
        self.public.thumbprint()
    }
}

fn decode_coordinate(encoded: &str, field: &'static str) -> Result<[u8; 32], JwkError> {
    let bytes = b64u::decode(encoded).map_err(|_| JwkError::InvalidEncoding { field })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| JwkError::InvalidLength {
            field,
            actual: bytes.len(),
        })
}
