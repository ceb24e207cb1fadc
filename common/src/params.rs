//! Request bodies sent from a device to a service.

use serde::{Deserialize, Serialize};

use crate::{
    jwk::EcPublicJwk,
    views::{CredentialBundle, Ovkm, UpdatingPayload},
};

/// Ask the service for a one-shot challenge (and, for known users, the
/// registered credentials and current OVK material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAuthnRequest {
    pub username: String,
}

/// Proof accompanying a registration: either full OVK material (initial
/// registration, first device) or a signature by the established OVK over
/// the new credential (seamless registration, further devices).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegistrationAuth {
    Ovkm(Ovkm),
    Signature {
        #[serde(rename = "sig_b64u", with = "crate::b64u::vec")]
        sig: Vec<u8>,
    },
}

/// Register a credential for `username`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub username: String,
    pub cred: CredentialBundle,
    pub ovkm: RegistrationAuth,
}

/// Answer a challenge with a credential signature, optionally carrying a
/// seed-rotation update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthnRequest {
    pub username: String,
    pub cred_jwk: EcPublicJwk,

    #[serde(rename = "sig_b64u", with = "crate::b64u::vec")]
    pub sig: Vec<u8>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updating: Option<UpdatingPayload>,
}

/// Drop a user's credentials and pending challenges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwk::{CRV_P256, KTY_EC};

    fn test_jwk() -> EcPublicJwk {
        EcPublicJwk {
            kty: KTY_EC.into(),
            crv: CRV_P256.into(),
            x: "x".into(),
            y: "y".into(),
            kid: None,
        }
    }

    #[test]
    fn test_registration_auth_untagged_forms() {
        let ovkm_json = serde_json::json!({
            "ovk_jwk": test_jwk(),
            "r_b64u": "AAAAAAAAAAAAAAAAAAAAAA",
            "mac_b64u": "AQID",
        });
        assert!(matches!(
            serde_json::from_value::<RegistrationAuth>(ovkm_json).unwrap(),
            RegistrationAuth::Ovkm(_)
        ));

        let sig_json = serde_json::json!({ "sig_b64u": "AQID" });
        assert!(matches!(
            serde_json::from_value::<RegistrationAuth>(sig_json).unwrap(),
            RegistrationAuth::Signature { .. }
        ));
    }

    #[test]
    fn test_authn_request_roundtrip() {
        let req = AuthnRequest {
            username: "alice".into(),
            cred_jwk: test_jwk(),
            sig: vec![7; 64],
            updating: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""sig_b64u":"#));
        assert!(!json.contains("updating"));

        let parsed: AuthnRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.username, "alice");
        assert_eq!(parsed.sig, vec![7; 64]);
    }
}
