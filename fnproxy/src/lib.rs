//! fnproxy - signing edge proxy for AWS Lambda Function URLs
//!
//! Serves a single route, `GET /`, which issues a SigV4-signed request to the
//! configured function URL and streams the response back.

pub mod config;
pub mod proxy;
pub mod router;

pub use config::{ProxyConfig, UpstreamTarget};
pub use proxy::{ForwardError, LambdaForwarder};
pub use router::{create_router, AppState};
