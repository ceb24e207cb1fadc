//! Device-side state machines for keymesh.
//!
//! A [`device::Device`] owns a [`seed::Seed`] (the shared secret and its
//! negotiation/rotation machinery), a long-lived attestation key, and a
//! [`store::CredentialStore`] of per-service credentials. The device never
//! reaches into seed internals; everything flows through the seed's
//! operations.

pub mod device;
pub mod seed;
pub mod store;

pub use device::{Device, DeviceError};
pub use seed::{NegotiationMeta, Seed, SeedError};
