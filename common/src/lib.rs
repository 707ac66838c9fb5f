//! Common code shared by everything talking to the ripeness detection service.
pub mod data_url;
pub mod protocol;
pub mod stats;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
