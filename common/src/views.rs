//! Response bodies and shared protocol records.
//!
//! These are the shapes a service returns and the records both sides agree
//! on: OVK material, credential bundles, and the rotation payload. Field
//! names are wire-exact; binary fields serialize via [`crate::b64u`].

use serde::{Deserialize, Serialize};

use crate::jwk::EcPublicJwk;

/// Ownership Verification Key Material: the triple a service stores per
/// user. `mac` is HMAC-SHA256 keyed by the OVK private scalar over
/// `r || service_id`, so any device holding the same seed can re-derive
/// the OVK from `r` and check it is talking about the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ovkm {
    #[serde(rename = "ovk_jwk")]
    pub ovk: EcPublicJwk,

    /// Per-service 16-byte HKDF salt chosen by the first registering device.
    #[serde(rename = "r_b64u", with = "crate::b64u::vec")]
    pub r: Vec<u8>,

    #[serde(rename = "mac_b64u", with = "crate::b64u::vec")]
    pub mac: Vec<u8>,
}

/// The service's current OVKM, extended during a migration with the
/// candidate OVKMs still under consideration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OvkmWithNext {
    #[serde(flatten)]
    pub ovkm: Ovkm,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub next: Option<Vec<Ovkm>>,
}

/// Signature by a device's long-lived attestation key over
/// `challenge || canonical_json(credential)`, plus the attestation public
/// key itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    #[serde(rename = "sig_b64u", with = "crate::b64u::vec")]
    pub sig: Vec<u8>,
    pub key: EcPublicJwk,
}

/// A freshly minted credential public key together with its attestation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub jwk: EcPublicJwk,
    pub atts: Attestation,
}

/// Rotation side-channel attached to an authentication: a signature by the
/// *previous* OVK over the canonical JSON of the proposed next OVK, plus
/// the proposed OVKM itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatingPayload {
    #[serde(rename = "update_b64u", with = "crate::b64u::vec")]
    pub update: Vec<u8>,
    pub ovkm: Ovkm,
}

/// Reply to `StartAuthnRequest`. `creds` and `ovkm` are present only when
/// the user is already registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthnResponse {
    #[serde(rename = "challenge_b64u", with = "crate::b64u::vec")]
    pub challenge: Vec<u8>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub creds: Option<Vec<EcPublicJwk>>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ovkm: Option<OvkmWithNext>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::{CRV_P256, KTY_EC};

    fn test_jwk(tag: &str) -> EcPublicJwk {
        EcPublicJwk {
            kty: KTY_EC.into(),
            crv: CRV_P256.into(),
            x: format!("x-{tag}"),
            y: format!("y-{tag}"),
            kid: None,
        }
    }

    #[test]
    fn test_ovkm_wire_names() {
        let ovkm = Ovkm {
            ovk: test_jwk("ovk"),
            r: vec![1, 2, 3],
            mac: vec![4, 5, 6],
        };
        let json = serde_json::to_value(&ovkm).unwrap();
        assert!(json.get("ovk_jwk").is_some());
        assert_eq!(json["r_b64u"], "AQID");
        assert!(json.get("mac_b64u").is_some());
    }

    #[test]
    fn test_ovkm_with_next_flattens() {
        let ovkm = Ovkm {
            ovk: test_jwk("ovk"),
            r: vec![0; 16],
            mac: vec![0; 32],
        };
        let outer = OvkmWithNext {
            ovkm: ovkm.clone(),
            next: None,
        };
        let json = serde_json::to_value(&outer).unwrap();
        assert!(json.get("ovk_jwk").is_some(), "inner ovkm should flatten");
        assert!(json.get("next").is_none(), "absent next must not serialize");

        let with_next = OvkmWithNext {
            ovkm,
            next: Some(vec![]),
        };
        let json = serde_json::to_string(&with_next).unwrap();
        let parsed: OvkmWithNext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, with_next);
    }

    #[test]
    fn test_start_authn_response_minimal_form() {
        let resp = StartAuthnResponse {
            challenge: vec![0; 32],
            creds: None,
            ovkm: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json.as_object().unwrap().len(),
            1,
            "unknown-user response carries only the challenge"
        );
        assert!(json.get("challenge_b64u").is_some());
    }
}
