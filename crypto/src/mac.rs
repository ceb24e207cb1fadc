//! HMAC-SHA256 with constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `msg` under `key`.
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// Verify `tag` against HMAC-SHA256(key, msg) in constant time.
pub fn verify_hmac_sha256(key: &[u8], msg: &[u8], tag: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?".
        let tag = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(tag),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_roundtrip_and_tamper() {
        let key = [0x0b; 20];
        let tag = hmac_sha256(&key, b"Hi There");
        assert!(verify_hmac_sha256(&key, b"Hi There", &tag));
        assert!(!verify_hmac_sha256(&key, b"Hi Thera", &tag));

        let mut bad = tag;
        bad[0] ^= 0x01;
        assert!(!verify_hmac_sha256(&key, b"Hi There", &bad));
    }

    #[test]
    fn test_truncated_tag_rejected() {
        let tag = hmac_sha256(b"k", b"m");
        assert!(!verify_hmac_sha256(b"k", b"m", &tag[..16]));
    }
}
