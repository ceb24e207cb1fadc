//! Service-side state machines for keymesh.
//!
//! A [`service::Service`] issues one-shot challenges and dispatches
//! registration, authentication, and OVK-migration traffic into per-user
//! [`cred_manager::CredManager`] state. Internally every rejection has a
//! typed cause; at the message boundary everything collapses to the
//! protocol's boolean responses.

pub mod clock;
pub mod cred_manager;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cred_manager::{CredManager, MIGRATION_WINDOW_MS};
pub use service::{Service, ServiceError};
