//! Core infrastructure for XyPriss.
//!
//! This crate provides shared functionality used across all XyPriss modules:
//! - The server-wide error taxonomy and its HTTP status mapping
//! - Event system for observability
//! - Common configuration patterns

pub mod error;
pub mod events;

pub use error::{ErrorKind, ServerError};
pub use events::{EventListener, ListenerPriority, ServerEvent, SubscriptionToken};
