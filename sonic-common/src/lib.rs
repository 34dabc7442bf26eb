//! # Sonic Common Library
//!
//! Shared code for the sonic inference service:
//! - Error type used during configuration and startup
//! - Canonical audio types (`Waveform`, `ChannelLayout`)
//! - Service configuration loading and validation

pub mod audio;
pub mod config;
pub mod error;

pub use audio::{ChannelLayout, Waveform};
pub use config::ServiceConfig;
pub use error::{Error, Result};
