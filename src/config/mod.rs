//! # Configuration
//!
//! - `annotations`: Downward API annotations file parsing
//! - `settings`: Provider settings from annotations and environment variables

pub mod annotations;
pub mod settings;
