//! P-256 key generation, ECDSA, and Diffie-Hellman.
//!
//! Signatures are fixed-width 64-byte `r || s` (IEEE P1363), the format
//! JWK-based APIs exchange; the message digest is always SHA-256.
//! Diffie-Hellman comes in two shapes: the full shared point re-encoded as
//! a public JWK (consumed by the multi-hop seed ceremony, where partial
//! products travel between devices), and the bare 32-byte X coordinate
//! (the final shared secret).

use keymesh_common::jwk::EcPublicJwk;
use p256::{
    FieldBytes, NonZeroScalar, ProjectivePoint, PublicKey, Scalar, SecretKey, U256,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::{Signer, Verifier},
    },
    elliptic_curve::{ops::Reduce, sec1::ToEncodedPoint},
};

use crate::{CryptoError, rng};

/// Generate a P-256 private key: uniform 32 bytes from the CSPRNG,
/// re-rolled until the value is a valid nonzero scalar below the group
/// order.
pub fn generate_secret_key() -> Result<SecretKey, CryptoError> {
    loop {
        let mut candidate = [0u8; 32];
        rng::fill(&mut candidate)?;
        if let Ok(key) = SecretKey::from_slice(&candidate) {
            return Ok(key);
        }
    }
}

/// The public JWK for a private key.
pub fn public_jwk(key: &SecretKey) -> EcPublicJwk {
    EcPublicJwk::from_public_key(&key.public_key())
}

/// ECDSA P-256 over SHA-256(msg), as 64-byte `r || s`.
pub fn sign(key: &SecretKey, msg: &[u8]) -> [u8; 64] {
    let signature: Signature = SigningKey::from(key).sign(msg);
    let mut out = [0u8; 64];
    out.copy_from_slice(&signature.to_bytes());
    out
}

/// Verify a 64-byte `r || s` ECDSA signature. Any decode failure (bad
/// JWK, wrong signature length, off-curve point) verifies as `false`.
pub fn verify(key: &EcPublicJwk, msg: &[u8], sig: &[u8]) -> bool {
    let Ok(public) = key.to_public_key() else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(sig) else {
        return false;
    };
    VerifyingKey::from(&public).verify(msg, &signature).is_ok()
}

fn shared_public_key(peer: &EcPublicJwk, key: &SecretKey) -> Result<PublicKey, CryptoError> {
    let peer = peer.to_public_key()?;
    let shared = ProjectivePoint::from(*peer.as_affine()) * *key.to_nonzero_scalar();
    PublicKey::from_affine(shared.to_affine()).map_err(|_| CryptoError::PointAtInfinity)
}

/// Scalar-multiply the peer's point by our private scalar and return the
/// resulting point as a public JWK.
pub fn diffie_hellman_point(
    peer: &EcPublicJwk,
    key: &SecretKey,
) -> Result<EcPublicJwk, CryptoError> {
    Ok(EcPublicJwk::from_public_key(&shared_public_key(peer, key)?))
}

/// The 32-byte big-endian X coordinate of the shared point.
pub fn diffie_hellman_x(peer: &EcPublicJwk, key: &SecretKey) -> Result<[u8; 32], CryptoError> {
    let shared = shared_public_key(peer, key)?;
    let point = shared.to_encoded_point(false);
    let x = point.x().ok_or(CryptoError::PointAtInfinity)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(x);
    Ok(out)
}

/// Interpret 32 bytes of KDF output as a P-256 private scalar, reducing
/// modulo the group order. Zero after reduction is rejected.
pub fn secret_key_from_okm(okm: &[u8; 32]) -> Result<SecretKey, CryptoError> {
    let scalar = <Scalar as Reduce<U256>>::reduce_bytes(FieldBytes::from_slice(okm));
    let nonzero =
        Option::<NonZeroScalar>::from(NonZeroScalar::new(scalar)).ok_or(CryptoError::InvalidScalar)?;
    Ok(SecretKey::from(nonzero))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key(fill: u8) -> SecretKey {
        // Small constant scalars are valid P-256 keys.
        let mut scalar = [0u8; 32];
        scalar[16] = fill;
        scalar[31] = fill;
        SecretKey::from_slice(&scalar).unwrap()
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        let a = generate_secret_key().unwrap();
        let b = generate_secret_key().unwrap();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = fixed_key(0x11);
        let jwk = public_jwk(&key);
        let sig = sign(&key, b"challenge bytes");

        assert_eq!(sig.len(), 64, "signature must be fixed-width r||s");
        assert!(verify(&jwk, b"challenge bytes", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_key_and_tampering() {
        let key = fixed_key(0x11);
        let other = public_jwk(&fixed_key(0x22));
        let sig = sign(&key, b"payload");

        assert!(!verify(&other, b"payload", &sig), "wrong key must fail");
        assert!(
            !verify(&public_jwk(&key), b"payload!", &sig),
            "tampered message must fail"
        );

        let mut bad = sig;
        bad[10] ^= 0xff;
        assert!(!verify(&public_jwk(&key), b"payload", &bad));
    }

    #[test]
    fn test_verify_rejects_wrong_length_signature() {
        let key = fixed_key(0x11);
        let sig = sign(&key, b"m");
        assert!(!verify(&public_jwk(&key), b"m", &sig[..63]));
    }

    #[test]
    fn test_dh_is_symmetric() {
        let a = fixed_key(0x31);
        let b = fixed_key(0x47);
        let ab = diffie_hellman_x(&public_jwk(&b), &a).unwrap();
        let ba = diffie_hellman_x(&public_jwk(&a), &b).unwrap();
        assert_eq!(ab, ba, "DH must agree in both directions");
    }

    #[test]
    fn test_dh_point_matches_x() {
        let a = fixed_key(0x31);
        let b = fixed_key(0x47);
        let point = diffie_hellman_point(&public_jwk(&b), &a).unwrap();
        let x = diffie_hellman_x(&public_jwk(&b), &a).unwrap();
        assert_eq!(
            keymesh_common::b64u::decode(&point.x).unwrap(),
            x,
            "point form and X form must describe the same shared point"
        );
    }

    #[test]
    fn test_three_party_product_is_order_independent() {
        let (a, b, c) = (fixed_key(0x31), fixed_key(0x47), fixed_key(0x59));
        // abc computed two ways: (aG * b) * c and (cG * b) * a.
        let ab = diffie_hellman_point(&public_jwk(&a), &b).unwrap();
        let abc = diffie_hellman_x(&ab, &c).unwrap();
        let cb = diffie_hellman_point(&public_jwk(&c), &b).unwrap();
        let cba = diffie_hellman_x(&cb, &a).unwrap();
        assert_eq!(abc, cba);
    }

    #[test]
    fn test_okm_scalar_derivation_is_deterministic() {
        let okm = [0xab; 32];
        let k1 = secret_key_from_okm(&okm).unwrap();
        let k2 = secret_key_from_okm(&okm).unwrap();
        assert_eq!(k1.to_bytes(), k2.to_bytes());
    }

    #[test]
    fn test_okm_above_group_order_is_reduced() {
        // All-0xff is >= the P-256 group order and must be reduced, not
        // rejected.
        let okm = [0xff; 32];
        let key = secret_key_from_okm(&okm).unwrap();
        assert_ne!(key.to_bytes().as_slice(), &okm[..]);
    }

    #[test]
    fn test_okm_zero_is_rejected() {
        assert!(matches!(
            secret_key_from_okm(&[0u8; 32]),
            Err(CryptoError::InvalidScalar)
        ));
    }
}
