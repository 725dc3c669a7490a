//! # scrape-core
//!
//! Core types, lifecycle rules, and traits for the scrape job coordinator.
//!
//! This crate provides the job model and its invariants, the state machine
//! that every store applies, the error taxonomy shared by the store, the
//! worker and the API, and the [`JobRepository`] trait they meet at.

pub mod defaults;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use lifecycle::Transition;
pub use models::*;
pub use traits::*;
