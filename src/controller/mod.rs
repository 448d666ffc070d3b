//! # Controller
//!
//! Runtime machinery shared by both secret destinations.
//!
//! - `atomic_writer`: Temp-file-and-rename writes of secret files
//! - `backoff`: Constant-delay backoff with a retry limit
//! - `checksum`: Content hashes used to skip unchanged writes
//! - `duration`: Parsing of duration strings such as `5m` or `1h30m`
//! - `repeatable`: Container-mode lifecycle and periodic refresh
//! - `retry`: Retry wrapper around a secrets provider
//! - `status`: Sentinel files for readiness and liveness probes

pub mod atomic_writer;
pub mod backoff;
pub mod checksum;
pub mod duration;
pub mod repeatable;
pub mod retry;
pub mod status;
