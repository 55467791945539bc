//! Core types for fnproxy
//!
//! This crate provides the error and request ID types shared by the proxy crates.

pub mod error;
pub mod request_id;

pub use error::{ErrorCode, ProxyError};
pub use request_id::RequestId;
