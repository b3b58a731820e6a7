//! OAuth dynamic client registrations (RFC 7591)
//!
//! Registrations are persisted through a [`ClientRegistry`](crate::registry::ClientRegistry)
//! so clients registered before a restart keep working afterwards.

mod registration;

pub use registration::{CLIENT_KEY_PREFIX, ClientRegistration, ClientRegistrationStore};
