//! Custody of a device's key material: the long-lived attestation key and
//! the per-service credential keys. Private halves never leave the store.

use keymesh_common::jwk::EcPublicJwk;
use keymesh_crypto::{CryptoError, ec};
use p256::SecretKey;

struct StoredCredential {
    key: SecretKey,
    jwk: EcPublicJwk,
}

pub struct CredentialStore {
    attestation: SecretKey,
    attestation_jwk: EcPublicJwk,
    entries: Vec<StoredCredential>,
}

impl CredentialStore {
    /// Create a store with a fresh attestation key pair.
    pub fn new() -> Result<Self, CryptoError> {
        let attestation = ec::generate_secret_key()?;
        let attestation_jwk = ec::public_jwk(&attestation);
        Ok(Self {
            attestation,
            attestation_jwk,
            entries: Vec::new(),
        })
    }

    pub fn attestation(&self) -> &SecretKey {
        &self.attestation
    }

    pub fn attestation_jwk(&self) -> &EcPublicJwk {
        &self.attestation_jwk
    }

    /// Mint a fresh credential key pair and return its public JWK.
    pub fn generate(&mut self) -> Result<EcPublicJwk, CryptoError> {
        let key = ec::generate_secret_key()?;
        let jwk = ec::public_jwk(&key);
        self.entries.push(StoredCredential {
            key,
            jwk: jwk.clone(),
        });
        Ok(jwk)
    }

    /// Find the private key whose public half matches any of `candidates`.
    pub fn find(&self, candidates: &[EcPublicJwk]) -> Option<(&SecretKey, &EcPublicJwk)> {
        self.entries
            .iter()
            .find(|entry| candidates.contains(&entry.jwk))
            .map(|entry| (&entry.key, &entry.jwk))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
