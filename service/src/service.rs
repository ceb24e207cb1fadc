//! Challenge issuance and register/authn/update dispatch.
//!
//! The typed methods return a [`ServiceError`] naming the exact rejection
//! cause; the `handle_*` entry points are the protocol boundary and
//! collapse every failure to the boolean the wire format prescribes,
//! logging the internal cause first.
//!
//! Per-user state is mutated non-atomically across
//! `start_authn → register/authn`, so callers must serialize operations
//! per username; different users are independent.

use std::collections::HashMap;
use std::sync::Arc;

use keymesh_common::jwk::EcPublicJwk;
use keymesh_common::params::{
    AuthnRequest, DeleteRequest, RegistrationAuth, RegistrationRequest, StartAuthnRequest,
};
use keymesh_common::views::{CredentialBundle, Ovkm, StartAuthnResponse};
use keymesh_crypto::{CryptoError, ec, rng};
use thiserror::Error;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::cred_manager::CredManager;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Attestation signature did not verify")]
    BadAttestation,

    #[error("Signature did not verify under the trusted OVK")]
    BadOvkSignature,

    #[error("Credential signature did not verify")]
    BadSignature,

    #[error("No pending challenge for this user")]
    NoChallenge,

    #[error("Unknown user")]
    UnknownUser,

    #[error("Credential is not registered for this user")]
    UnknownCredential,

    #[error("User already has OVK material registered")]
    DoubleInit,

    #[error("Registration is locked while an OVK migration is open")]
    RegistrationLocked,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// One authenticator service instance. All state is in-memory; multiple
/// instances may coexist.
pub struct Service {
    users: HashMap<String, CredManager>,
    challenges: HashMap<String, Vec<[u8; 32]>>,
    clock: Arc<dyn Clock>,
}

impl Service {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// A service on an injected clock (tests use a manually advanced one).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: HashMap::new(),
            challenges: HashMap::new(),
            clock,
        }
    }

    pub fn user(&self, username: &str) -> Option<&CredManager> {
        self.users.get(username)
    }

    /// Issue a fresh one-shot challenge. Known users additionally receive
    /// their credential list and current OVK material (with open-migration
    /// candidates attached).
    pub fn start_authn(&mut self, username: &str) -> Result<StartAuthnResponse, ServiceError> {
        let challenge: [u8; 32] = rng::random_array()?;
        self.challenges
            .entry(username.to_string())
            .or_default()
            .push(challenge);

        let now = self.clock.now_ms();
        match self.users.get_mut(username) {
            Some(manager) => {
                let (creds, ovkm) = manager.snapshot(now);
                Ok(StartAuthnResponse {
                    challenge: challenge.to_vec(),
                    creds: Some(creds),
                    ovkm: Some(ovkm),
                })
            }
            None => Ok(StartAuthnResponse {
                challenge: challenge.to_vec(),
                creds: None,
                ovkm: None,
            }),
        }
    }

    /// Register a credential. The attestation must cover
    /// `challenge || canonical_json(credential)`; beyond that, an unknown
    /// user must supply full OVK material and a known user an OVK
    /// signature over the new credential.
    pub fn register(
        &mut self,
        username: &str,
        cred: &CredentialBundle,
        auth: &RegistrationAuth,
    ) -> Result<(), ServiceError> {
        let challenge = self.pop_challenge(username)?;

        let mut attested = challenge.to_vec();
        attested.extend_from_slice(cred.jwk.canonical_json().as_bytes());
        if !ec::verify(&cred.atts.key, &attested, &cred.atts.sig) {
            return Err(ServiceError::BadAttestation);
        }

        let now = self.clock.now_ms();
        match (self.users.get_mut(username), auth) {
            (None, RegistrationAuth::Ovkm(ovkm)) => {
                self.users.insert(
                    username.to_string(),
                    CredManager::init(cred.jwk.clone(), ovkm.clone()),
                );
                info!(user = username, "user registered");
                Ok(())
            }
            (None, RegistrationAuth::Signature { .. }) => Err(ServiceError::UnknownUser),
            (Some(_), RegistrationAuth::Ovkm(_)) => Err(ServiceError::DoubleInit),
            (Some(manager), RegistrationAuth::Signature { sig }) => {
                if manager.is_updating(now) {
                    return Err(ServiceError::RegistrationLocked);
                }
                if !ec::verify(
                    &manager.ovkm().ovk,
                    cred.jwk.canonical_json().as_bytes(),
                    sig,
                ) {
                    return Err(ServiceError::BadOvkSignature);
                }
                if !manager.add(cred.jwk.clone()) {
                    return Err(ServiceError::RegistrationLocked);
                }
                info!(user = username, "credential added");
                Ok(())
            }
        }
    }

    /// Verify a challenge response. An attached rotation update is
    /// processed first and its failure fails the whole call.
    pub fn authn(
        &mut self,
        username: &str,
        cred_jwk: &EcPublicJwk,
        sig: &[u8],
        updating: Option<(&[u8], &Ovkm)>,
    ) -> Result<(), ServiceError> {
        if let Some((update_sig, proposed)) = updating {
            self.update(username, cred_jwk, update_sig, proposed)?;
        }

        let challenge = self.pop_challenge(username)?;
        let manager = self.users.get(username).ok_or(ServiceError::UnknownUser)?;
        if !manager.contains_credential(cred_jwk) {
            return Err(ServiceError::UnknownCredential);
        }
        if !ec::verify(cred_jwk, &challenge, sig) {
            return Err(ServiceError::BadSignature);
        }
        Ok(())
    }

    /// Process one rotation update message: the update signature must
    /// verify under the currently trusted OVK, then the sender's
    /// credential is rebound to the proposed OVK.
    pub fn update(
        &mut self,
        username: &str,
        cred_jwk: &EcPublicJwk,
        update_sig: &[u8],
        proposed: &Ovkm,
    ) -> Result<(), ServiceError> {
        let now = self.clock.now_ms();
        let manager = self
            .users
            .get_mut(username)
            .ok_or(ServiceError::UnknownUser)?;

        if !ec::verify(
            &manager.ovkm().ovk,
            proposed.ovk.canonical_json().as_bytes(),
            update_sig,
        ) {
            return Err(ServiceError::BadOvkSignature);
        }
        if !manager.add_updating(cred_jwk, proposed, now) {
            return Err(ServiceError::UnknownCredential);
        }
        debug!(user = username, "rotation update recorded");
        Ok(())
    }

    /// Drop a user unconditionally.
    pub fn delete(&mut self, username: &str) {
        self.users.remove(username);
        self.challenges.remove(username);
        info!(user = username, "user deleted");
    }

    fn pop_challenge(&mut self, username: &str) -> Result<[u8; 32], ServiceError> {
        self.challenges
            .get_mut(username)
            .and_then(|stack| stack.pop())
            .ok_or(ServiceError::NoChallenge)
    }

    // Message-level entry points: boolean boundary, causes logged.

    pub fn handle_start_authn(
        &mut self,
        req: &StartAuthnRequest,
    ) -> Result<StartAuthnResponse, ServiceError> {
        self.start_authn(&req.username)
    }

    pub fn handle_register(&mut self, req: &RegistrationRequest) -> bool {
        match self.register(&req.username, &req.cred, &req.ovkm) {
            Ok(()) => true,
            Err(err) => {
                debug!(user = %req.username, error = %err, "registration rejected");
                false
            }
        }
    }

    pub fn handle_authn(&mut self, req: &AuthnRequest) -> bool {
        let updating = req
            .updating
            .as_ref()
            .map(|u| (u.update.as_slice(), &u.ovkm));
        match self.authn(&req.username, &req.cred_jwk, &req.sig, updating) {
            Ok(()) => true,
            Err(err) => {
                debug!(user = %req.username, error = %err, "authentication rejected");
                false
            }
        }
    }

    pub fn handle_delete(&mut self, req: &DeleteRequest) -> bool {
        self.delete(&req.username);
        true
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}
