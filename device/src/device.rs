//! Device orchestration: wiring the seed to services.
//!
//! The device wraps seed negotiation in the password envelope for
//! transport, mints attested credentials for registrations, and answers
//! authentication challenges, attaching a rotation update when the seed
//! has moved on from the OVK a service still trusts.

use std::collections::BTreeMap;

use keymesh_common::jwk::EcPublicJwk;
use keymesh_common::params::RegistrationAuth;
use keymesh_common::views::{Attestation, CredentialBundle, Ovkm, OvkmWithNext, UpdatingPayload};
use keymesh_crypto::{CryptoError, ec, envelope, envelope::EnvelopeError, rng};
use thiserror::Error;
use tracing::{debug, trace};

use crate::seed::{EpkBundle, NegotiationMeta, Seed, SeedError};
use crate::store::CredentialStore;

const OVK_SALT_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("OVK binding MAC did not validate under this device's seed")]
    OvkVerifyFailed,

    #[error("No stored credential matches the service's list")]
    NoMatchingCredential,

    #[error("No seed negotiation in progress")]
    NotNegotiating,

    #[error("Malformed negotiation payload: {0}")]
    Format(&'static str),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Device-side bookkeeping for one envelope-wrapped negotiation: the
/// shared password, the pinned ceremony metadata, and the accumulated
/// step maps for both sides of the ring edge.
struct NegotiationSession {
    password: String,
    meta: NegotiationMeta,
    mine: BTreeMap<u32, EcPublicJwk>,
    partner: BTreeMap<u32, EcPublicJwk>,
}

/// One step of the wrapped negotiation: the ciphertext to forward, and
/// whether this device is done.
#[derive(Debug)]
pub struct NegotiationProgress {
    pub completed: bool,
    pub ciphertext: String,
}

/// What a device submits to register: the attested credential plus either
/// fresh OVK material or an OVK signature over the credential.
#[derive(Debug)]
pub struct RegistrationMaterial {
    pub cred: CredentialBundle,
    pub auth: RegistrationAuth,
}

/// What a device submits to authenticate.
#[derive(Debug)]
pub struct AuthnMaterial {
    pub cred_jwk: EcPublicJwk,
    pub sig: Vec<u8>,
    pub updating: Option<UpdatingPayload>,
}

pub struct Device {
    seed: Seed,
    store: CredentialStore,
    session: Option<NegotiationSession>,
}

impl Device {
    pub fn new() -> Result<Self, DeviceError> {
        Ok(Self {
            seed: Seed::new(),
            store: CredentialStore::new()?,
            session: None,
        })
    }

    /// A device around an existing seed (tests, pre-seeded setups).
    pub fn with_seed(seed: Seed) -> Result<Self, DeviceError> {
        Ok(Self {
            seed,
            store: CredentialStore::new()?,
            session: None,
        })
    }

    pub fn seed(&self) -> &Seed {
        &self.seed
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Drop the previous seed once the rotation has been accepted by the
    /// services that matter to this device.
    pub fn acknowledge_rotation(&mut self) {
        self.seed.retire_previous();
    }

    /// Start a seed ceremony and return the first ciphertext to send.
    /// Any earlier unfinished ceremony is abandoned.
    pub fn init_seed_negotiation(
        &mut self,
        password: &str,
        device_id: &str,
        partner_id: &str,
        dev_num: u32,
        updating: bool,
    ) -> Result<String, DeviceError> {
        self.session = None;
        self.seed.abort_negotiation();

        let meta = NegotiationMeta {
            id: device_id.to_string(),
            partner_id: partner_id.to_string(),
            dev_num,
        };
        let step = self.seed.negotiate(&meta, None, updating)?;
        let ciphertext = seal_step(password, &meta.id, &step.epk)?;

        debug!(device = %meta.id, partner = %meta.partner_id, dev_num, "seed negotiation started");
        self.session = Some(NegotiationSession {
            password: password.to_string(),
            meta,
            mine: step.epk,
            partner: BTreeMap::new(),
        });
        Ok(ciphertext)
    }

    /// Feed one incoming ciphertext into the ceremony. Material from
    /// anyone but the configured partner is ignored, but the local step
    /// still runs so the reply always reflects our newest map.
    pub fn continue_seed_negotiation(
        &mut self,
        ciphertext: &str,
        updating: bool,
    ) -> Result<NegotiationProgress, DeviceError> {
        let session = self.session.as_mut().ok_or(DeviceError::NotNegotiating)?;

        let plaintext = envelope::open(&session.password, ciphertext)?;
        let text =
            String::from_utf8(plaintext).map_err(|_| DeviceError::Format("payload not UTF-8"))?;
        let (sender, epk_json) = text
            .split_once('.')
            .ok_or(DeviceError::Format("missing sender prefix"))?;

        if sender == session.meta.partner_id {
            let incoming: BTreeMap<u32, EcPublicJwk> = serde_json::from_str(epk_json)
                .map_err(|_| DeviceError::Format("invalid epk map"))?;
            session.partner.extend(incoming);
        } else {
            trace!(device = %session.meta.id, sender, "ignoring non-partner material");
        }

        let bundle = EpkBundle {
            mine: session.mine.clone(),
            partner: session.partner.clone(),
        };
        let step = self.seed.negotiate(&session.meta, Some(&bundle), updating)?;
        session.mine.extend(step.epk);

        let ciphertext = seal_step(&session.password, &session.meta.id, &session.mine)?;
        if step.completed {
            debug!(device = %session.meta.id, "seed negotiation finished");
            self.session = None;
        }
        Ok(NegotiationProgress {
            completed: step.completed,
            ciphertext,
        })
    }

    /// Build registration material for `service_id`.
    ///
    /// Without `existing` this is an initial registration: a fresh salt
    /// `r` is drawn and full OVK material is attached. With `existing`
    /// (the `{r, mac}` another device already registered) the binding MAC
    /// must validate under this device's seed, proving both devices hold
    /// the same seed, and the new credential is signed by the OVK
    /// instead.
    pub fn register(
        &mut self,
        service_id: &str,
        challenge: &[u8],
        existing: Option<&Ovkm>,
    ) -> Result<RegistrationMaterial, DeviceError> {
        match existing {
            None => {
                let r = rng::random_array::<OVK_SALT_LEN>()?.to_vec();
                let ovk = self.seed.derive_ovk(&r)?;
                let mac = self.seed.mac_ovk(&r, service_id)?.to_vec();
                let cred = self.mint_credential(challenge)?;
                debug!(service = service_id, "initial registration material built");
                Ok(RegistrationMaterial {
                    cred,
                    auth: RegistrationAuth::Ovkm(Ovkm { ovk, r, mac }),
                })
            }
            Some(known) => {
                if !self.seed.verify_ovk(&known.r, service_id, &known.mac)? {
                    return Err(DeviceError::OvkVerifyFailed);
                }
                let cred = self.mint_credential(challenge)?;
                let sig = self
                    .seed
                    .sign_with_ovk(&known.r, cred.jwk.canonical_json().as_bytes())?;
                debug!(service = service_id, "seamless registration material built");
                Ok(RegistrationMaterial {
                    cred,
                    auth: RegistrationAuth::Signature { sig: sig.to_vec() },
                })
            }
        }
    }

    /// Answer a challenge with one of our stored credentials.
    ///
    /// While a rotation is pending, the response also carries an update:
    /// an already-posted candidate OVK is endorsed if its binding MAC
    /// validates under our seed, otherwise a fresh candidate is proposed.
    pub fn authn(
        &mut self,
        service_id: &str,
        challenge: &[u8],
        creds: &[EcPublicJwk],
        ovkm: &OvkmWithNext,
    ) -> Result<AuthnMaterial, DeviceError> {
        let (sig, cred_jwk) = {
            let (key, jwk) = self
                .store
                .find(creds)
                .ok_or(DeviceError::NoMatchingCredential)?;
            (ec::sign(key, challenge).to_vec(), jwk.clone())
        };

        if !self.seed.is_updating() {
            return Ok(AuthnMaterial {
                cred_jwk,
                sig,
                updating: None,
            });
        }

        for candidate in ovkm.next.iter().flatten() {
            if self
                .seed
                .verify_ovk(&candidate.r, service_id, &candidate.mac)?
            {
                let update = self.seed.update(&ovkm.ovkm.r, &candidate.ovk)?;
                debug!(service = service_id, "endorsing posted OVK candidate");
                return Ok(AuthnMaterial {
                    cred_jwk,
                    sig,
                    updating: Some(UpdatingPayload {
                        update: update.to_vec(),
                        ovkm: candidate.clone(),
                    }),
                });
            }
        }

        let r = rng::random_array::<OVK_SALT_LEN>()?.to_vec();
        let ovk = self.seed.derive_ovk(&r)?;
        let mac = self.seed.mac_ovk(&r, service_id)?.to_vec();
        let update = self.seed.update(&ovkm.ovkm.r, &ovk)?;
        debug!(service = service_id, "proposing fresh OVK candidate");
        Ok(AuthnMaterial {
            cred_jwk,
            sig,
            updating: Some(UpdatingPayload {
                update: update.to_vec(),
                ovkm: Ovkm { ovk, r, mac },
            }),
        })
    }

    fn mint_credential(&mut self, challenge: &[u8]) -> Result<CredentialBundle, DeviceError> {
        let jwk = self.store.generate()?;
        let mut msg = challenge.to_vec();
        msg.extend_from_slice(jwk.canonical_json().as_bytes());
        let sig = ec::sign(self.store.attestation(), &msg);
        Ok(CredentialBundle {
            jwk,
            atts: Attestation {
                sig: sig.to_vec(),
                key: self.store.attestation_jwk().clone(),
            },
        })
    }
}

fn seal_step(
    password: &str,
    device_id: &str,
    epk: &BTreeMap<u32, EcPublicJwk>,
) -> Result<String, DeviceError> {
    let map_json =
        serde_json::to_string(epk).map_err(|_| DeviceError::Format("epk map not serializable"))?;
    let payload = format!("{device_id}.{map_json}");
    Ok(envelope::seal(password, payload.as_bytes())?)
}
