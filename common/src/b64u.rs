//! base64url (no padding) helpers.
//!
//! Every binary field in the protocol (challenges, MACs, signatures, key
//! coordinates) is transported as base64url without padding. The serde
//! helpers let wire structs keep `Vec<u8>` fields while serializing to the
//! `*_b64u` string form.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};

/// Encode bytes as base64url without padding.
pub fn encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Decode a base64url string (padding rejected).
pub fn decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(data)
}

/// serde adapter for `Vec<u8>` fields carried as base64url strings.
///
/// Usage: `#[serde(with = "keymesh_common::b64u::vec")]`.
pub mod vec {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        super::decode(&encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_unpadded_urlsafe() {
        // 0xfb 0xff encodes to "+/8=" in standard base64; urlsafe no-pad
        // must use "-_" and drop the "=".
        assert_eq!(encode([0xfb, 0xff]), "-_8");
    }

    #[test]
    fn test_roundtrip() {
        let data = b"keymesh".to_vec();
        assert_eq!(decode(&encode(&data)).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_padding() {
        assert!(decode("AA==").is_err(), "padded input should be rejected");
    }
}
