//! AWS authentication for fnproxy
//!
//! Implements AWS Signature Version 4 for signing outbound requests, plus the
//! matching verifier.

pub mod credential;
pub mod scope;
pub mod sigv4;

pub use credential::Credentials;
pub use scope::SigningScope;
pub use sigv4::{verify_signature, RequestSigner, SigV4Error};
