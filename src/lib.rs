//! Conjur Secrets Provider Library
//!
//! Fetches secrets from Conjur and delivers them into Kubernetes Secrets or
//! into files on a shared volume.
//! Tests are included in the module files and under `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod k8s_secrets;
pub mod provider;
pub mod push_to_file;
