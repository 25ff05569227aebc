//! Sofa Core Library
//!
//! Transport-independent building blocks shared by the sofa client and CLI:
//! - Configuration loading
//! - Document and result models
//! - View / changes query allow-lists and encoding
//! - Sequence token ordering

pub mod config;
pub mod models;
pub mod query;
pub mod seq;

// Re-export commonly used types
pub use config::Config;
pub use models::*;
pub use query::{QueryKind, QueryParams};
pub use seq::Seq;
