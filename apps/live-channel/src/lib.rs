#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Live Channel - Console Real-Time Updates
//!
//! Client-side live data for the network management console: a single
//! reconnecting WebSocket connection plus interval polling of the REST API
//! as the default and fallback data source.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure state machines and data types
//!   - `connection`: Lifecycle, inbound messages, reconnect policy
//!   - `poll`: Poll state and settle rules
//!
//! - **Application**: Ports and services
//!   - `ports`: Liveness probe and refetch trigger
//!   - `services`: Refresh-on-push wiring
//!
//! - **Infrastructure**: Adapters and drivers
//!   - `live`: WebSocket connection manager
//!   - `poll`: Poll loop driver
//!   - `http`: REST client and HTTP liveness probe
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!  backend /ws ──► ConnectionManager ──► watch<ConnectionSnapshot> ──► consumers
//!                                               │
//!                                         RefreshOnPush
//!                                               │ refetch()
//!                                               ▼
//!  backend /api ◄── ApiClient ◄── PollLoop ──► watch<PollState<T>> ──► consumers
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - State machines with no I/O.
pub mod domain;

/// Application layer - Ports and services.
pub mod application;

/// Infrastructure layer - Adapters and drivers.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ConnectionMachine, ConnectionSnapshot, ConnectionState, Directive, InboundMessage,
    ReconnectConfig, ReconnectError, ReconnectPolicy, backoff_delay,
};
pub use domain::poll::{PollOutcome, PollState};

// Ports and services
pub use application::ports::{LivenessProbe, ProbeError, Refetch};
pub use application::services::RefreshOnPush;

// Live channel
pub use infrastructure::live::{ChannelError, ConnectionManager, LiveConfig, Outbound};

// Poll loop
pub use infrastructure::poll::{DEFAULT_POLL_INTERVAL, PollLoop, RefetchHandle};

// HTTP
pub use infrastructure::http::{ApiClient, ApiError, HttpLivenessProbe};

// Configuration
pub use infrastructure::config::{ChannelConfig, ConfigError, Endpoints};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
