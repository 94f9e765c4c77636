//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the async
//! drivers for the domain state machines.

/// WebSocket connection manager.
pub mod live;

/// Interval poll loop driver.
pub mod poll;

/// REST client and liveness probe.
pub mod http;

/// Environment configuration.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Tracing subscriber and OpenTelemetry integration.
pub mod telemetry;
