//! The shared seed: multi-party negotiation, OVK derivation, rotation.
//!
//! N devices (N ≥ 2), arranged in a ring where each consumes DH material
//! from one fixed partner, converge on the X coordinate of
//! `k₁·k₂·…·k_N·G` in at most N−1 exchange rounds. Each device keeps an
//! ephemeral private key for the duration of one ceremony and tears it
//! down on completion.
//!
//! From the newest seed, per-service Ownership Verification Keys are
//! derived on demand (`HKDF-SHA256(seed, r)` interpreted as a P-256
//! scalar) and never stored. Rotation appends a fresh seed next to the
//! old one; while both are held, [`Seed::update`] signs the next OVK with
//! the previous one so services can migrate trust.

use std::collections::{BTreeMap, BTreeSet};

use keymesh_common::jwk::EcPublicJwk;
use keymesh_crypto::{CryptoError, ec, kdf, mac};
use p256::SecretKey;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Seed count does not match the requested negotiation mode")]
    InvalidState,

    #[error("Negotiation metadata changed between rounds")]
    MetaMismatch,

    #[error("No rotation in progress")]
    NotUpdating,

    #[error("No negotiated seed available")]
    NoSeed,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Identity of one negotiation ceremony, fixed across its rounds: this
/// device's session-local id, the ring partner it consumes material from,
/// and the total number of participating devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMeta {
    pub id: String,
    pub partner_id: String,
    pub dev_num: u32,
}

/// The DH material visible to one negotiation step: the maps of
/// step-number → public point this device has already published (`mine`)
/// and the latest map received from its partner.
#[derive(Debug, Clone, Default)]
pub struct EpkBundle {
    pub mine: BTreeMap<u32, EcPublicJwk>,
    pub partner: BTreeMap<u32, EcPublicJwk>,
}

/// Result of one negotiation step: the entries to publish to the partner,
/// and whether this device has derived its seed and retired the ephemeral.
#[derive(Debug)]
pub struct NegotiationStep {
    pub completed: bool,
    pub epk: BTreeMap<u32, EcPublicJwk>,
}

struct Ephemeral {
    meta: NegotiationMeta,
    key: SecretKey,
    /// Position in the seed list the ceremony writes to: 0 for an initial
    /// negotiation, the current length for a rotation. Writing to the same
    /// index makes duplicate final-hop deliveries idempotent.
    idx: usize,
}

/// Ordered shared secrets, most recent last, plus the ephemeral state of
/// an in-flight ceremony.
pub struct Seed {
    secrets: Vec<[u8; 32]>,
    ephemeral: Option<Ephemeral>,
}

impl Seed {
    pub fn new() -> Self {
        Self {
            secrets: Vec::new(),
            ephemeral: None,
        }
    }

    /// Construct from known secrets (deterministic tests, single-device
    /// pre-seeded setups).
    pub fn from_secrets(secrets: Vec<[u8; 32]>) -> Self {
        Self {
            secrets,
            ephemeral: None,
        }
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.len()
    }

    /// The newest negotiated secret, if any.
    pub fn latest_secret(&self) -> Option<&[u8; 32]> {
        self.secrets.last()
    }

    /// A rotation is pending while more than one seed is held.
    pub fn is_updating(&self) -> bool {
        self.secrets.len() > 1
    }

    /// Drop every seed but the newest. Called once the rotation has been
    /// acknowledged; deciding *when* is the caller's business.
    pub fn retire_previous(&mut self) {
        let count = self.secrets.len();
        if count > 1 {
            self.secrets.drain(..count - 1);
        }
    }

    /// Abandon an in-flight ceremony. No other state is touched.
    pub fn abort_negotiation(&mut self) {
        self.ephemeral = None;
    }

    /// Run one negotiation step.
    ///
    /// `update` selects the mode: `false` requires no seed to be held yet,
    /// `true` requires at least one (the new seed lands after it). `meta`
    /// must stay identical across the rounds of one ceremony.
    ///
    /// For each partner entry `(c, pk)`: intermediate steps
    /// (`c + 2 < dev_num`) are advanced by multiplying `pk` with our
    /// ephemeral scalar and published at step `c + 1` unless already sent;
    /// the final hop (`c + 2 == dev_num`) yields the seed itself. The
    /// ceremony completes once every step `0..dev_num` is accounted for.
    pub fn negotiate(
        &mut self,
        meta: &NegotiationMeta,
        epk: Option<&EpkBundle>,
        update: bool,
    ) -> Result<NegotiationStep, SeedError> {
        if meta.dev_num < 2 {
            return Err(SeedError::InvalidState);
        }

        let (key, idx) = match &self.ephemeral {
            Some(eph) => {
                if eph.meta != *meta {
                    return Err(SeedError::MetaMismatch);
                }
                // Mid-ceremony the seed may already be written, so the
                // flag is checked against the ceremony's target index,
                // not the list length.
                if update != (eph.idx > 0) {
                    return Err(SeedError::InvalidState);
                }
                (eph.key.clone(), eph.idx)
            }
            None => {
                if update && self.secrets.is_empty() {
                    return Err(SeedError::InvalidState);
                }
                if !update && !self.secrets.is_empty() {
                    return Err(SeedError::InvalidState);
                }
                let key = ec::generate_secret_key()?;
                let idx = self.secrets.len();
                self.ephemeral = Some(Ephemeral {
                    meta: meta.clone(),
                    key: key.clone(),
                    idx,
                });
                trace!(device = %meta.id, idx, "negotiation ephemeral created");
                (key, idx)
            }
        };

        let mut out = BTreeMap::new();
        out.insert(0, ec::public_jwk(&key));

        let empty = BTreeMap::new();
        let (mine, partner) = match epk {
            Some(bundle) => (&bundle.mine, &bundle.partner),
            None => (&empty, &empty),
        };

        // Compute the whole step before touching the seed list, so a bad
        // partner point cannot leave a half-applied round behind.
        let mut derived = None;
        for (&step, peer) in partner {
            if step + 2 < meta.dev_num {
                let next = step + 1;
                if !mine.contains_key(&next) {
                    out.insert(next, ec::diffie_hellman_point(peer, &key)?);
                }
            } else if step + 2 == meta.dev_num {
                derived = Some(ec::diffie_hellman_x(peer, &key)?);
            }
        }
        if let Some(secret) = derived {
            if self.secrets.len() == idx {
                self.secrets.push(secret);
            } else {
                self.secrets[idx] = secret;
            }
            trace!(device = %meta.id, idx, "seed derived");
        }

        let mut covered: BTreeSet<u32> = out.keys().copied().collect();
        covered.extend(mine.keys().copied());
        if self.secrets.len() > idx {
            covered.insert(meta.dev_num - 1);
        }

        let completed = covered.len() as u32 == meta.dev_num;
        if completed {
            self.ephemeral = None;
            debug!(device = %meta.id, "seed negotiation complete");
        }
        Ok(NegotiationStep {
            completed,
            epk: out,
        })
    }

    fn ovk_secret_from(&self, secret: &[u8; 32], r: &[u8]) -> Result<SecretKey, SeedError> {
        let mut okm = [0u8; 32];
        kdf::hkdf_sha256(secret, r, b"", &mut okm)?;
        Ok(ec::secret_key_from_okm(&okm)?)
    }

    fn ovk_secret(&self, r: &[u8]) -> Result<SecretKey, SeedError> {
        let secret = self.secrets.last().ok_or(SeedError::NoSeed)?;
        self.ovk_secret_from(secret, r)
    }

    /// The public OVK for salt `r` under the newest seed.
    pub fn derive_ovk(&self, r: &[u8]) -> Result<EcPublicJwk, SeedError> {
        Ok(ec::public_jwk(&self.ovk_secret(r)?))
    }

    /// Binding MAC: `HMAC-SHA256(OVK.d, r || service_id)`. A service
    /// stores it next to `(r, ovk)` so any same-seed device can confirm
    /// the OVK is one it can re-derive.
    pub fn mac_ovk(&self, r: &[u8], service_id: &str) -> Result<[u8; 32], SeedError> {
        let key = self.ovk_secret(r)?;
        let mut msg = r.to_vec();
        msg.extend_from_slice(service_id.as_bytes());
        Ok(mac::hmac_sha256(&key.to_bytes(), &msg))
    }

    /// Constant-time check of a binding MAC against the newest seed.
    pub fn verify_ovk(&self, r: &[u8], service_id: &str, tag: &[u8]) -> Result<bool, SeedError> {
        let key = self.ovk_secret(r)?;
        let mut msg = r.to_vec();
        msg.extend_from_slice(service_id.as_bytes());
        Ok(mac::verify_hmac_sha256(&key.to_bytes(), &msg, tag))
    }

    /// ECDSA signature by the OVK for salt `r` under the newest seed.
    pub fn sign_with_ovk(&self, r: &[u8], msg: &[u8]) -> Result<[u8; 64], SeedError> {
        Ok(ec::sign(&self.ovk_secret(r)?, msg))
    }

    /// Cross-sign a rotation: with the *previous* seed's OVK for salt
    /// `prev_r`, sign the canonical JSON of the proposed next OVK.
    pub fn update(&self, prev_r: &[u8], next_ovk: &EcPublicJwk) -> Result<[u8; 64], SeedError> {
        if self.secrets.len() < 2 {
            return Err(SeedError::NotUpdating);
        }
        let previous = &self.secrets[self.secrets.len() - 2];
        let key = self.ovk_secret_from(previous, prev_r)?;
        Ok(ec::sign(&key, next_ovk.canonical_json().as_bytes()))
    }
}

impl Default for Seed {
    fn default() -> Self {
        Self::new()
    }
}
