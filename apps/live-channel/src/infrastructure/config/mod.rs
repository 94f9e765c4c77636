//! Configuration Module
//!
//! Environment-driven configuration for the live channel and poll loop.

mod settings;

pub use settings::{
    ChannelConfig, ConfigError, DEFAULT_API_BASE, Endpoints, PollSettings, ReconnectSettings,
    http_to_ws, ws_to_http,
};
