//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `LivenessProbe`: checks that the backend is up before a socket is opened
//!
//! ## Driver Ports (Inbound)
//!
//! - `Refetch`: lets a push notification trigger an out-of-band poll

use async_trait::async_trait;

/// Liveness probe failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    /// The health endpoint answered with a non-2xx status.
    #[error("health check returned HTTP {0}")]
    Status(u16),
    /// The health endpoint could not be reached.
    #[error("health check failed: {0}")]
    Unreachable(String),
}

/// Checks whether the backend owning the live endpoint is reachable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Run one probe.
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Something that can be told to refresh immediately.
pub trait Refetch: Send + Sync {
    /// Request an immediate refresh. Returns `false` once the target has been
    /// torn down.
    fn refetch(&self) -> bool;
}
