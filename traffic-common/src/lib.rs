//! # Traffic Common Library
//!
//! Shared code for the traffic attribution engine including:
//! - Error type shared by every crate
//! - Configuration loading (TOML, environment, root folder)
//! - Engine event types and the EventBus
//! - Timestamp and identifier helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{AuthUser, EngineEvent, EventBus};
