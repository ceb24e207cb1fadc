//! Shared wire types for the keymesh protocol.
//!
//! Everything a device and a service exchange is defined here: the EC JWK
//! codec with RFC 7638 thumbprints, the base64url helpers every binary
//! field rides on, and the request ([`params`]) / response ([`views`])
//! message shapes.

pub mod b64u;
pub mod jwk;
pub mod params;
pub mod views;
