//! Authentication for operators using the hosted backend.
//!
//! This module provides:
//! - `IdentityClient`: email/password sign-in and token refresh
//! - `Session`: the signed-in user's id token, persisted to the data directory
//!
//! The session's user id is the actor recorded on history entries.

pub mod identity;
pub mod session;

pub use identity::IdentityClient;
pub use session::{Session, SessionData};
