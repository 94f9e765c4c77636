//! Domain Layer - Core live-data types and state machines.
//!
//! Pure Rust types with no I/O: connection lifecycle, reconnect policy and
//! poll state. The infrastructure layer drives these with real sockets and
//! timers.

/// Connection lifecycle, inbound messages and reconnect policy.
pub mod connection;

/// Poll loop state and settle rules.
pub mod poll;
