//! HTTP Adapters
//!
//! REST client used by poll producers and the liveness probe used by the
//! live channel before it opens a socket.

mod client;
mod probe;

pub use client::{ApiClient, ApiError, UNREACHABLE_MESSAGE};
pub use probe::HttpLivenessProbe;
