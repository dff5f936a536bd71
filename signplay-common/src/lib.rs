//! # Signplay Common Library
//!
//! Shared code for the sign playback crates including:
//! - Common error type
//! - Sign identifier helpers
//! - Event types (SignEvent enum) and the EventBus
//! - Configuration loading
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod sign;
pub mod time;

pub use error::{Error, Result};
pub use sign::{SignClass, SignId};
