//! Capture camera frames and classify fruit ripeness with a remote detection service.
pub mod client;
pub mod config;
pub mod sensors;
pub mod session;
pub mod snapshot;
pub mod terminal;
pub mod view;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
