//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the port interfaces the live channel depends on and
//! the services that chain push notifications to poll loops.

/// Port interfaces for external systems (liveness probe, refetch target).
pub mod ports;

/// Application services coordinating connection and poll loops.
pub mod services;
