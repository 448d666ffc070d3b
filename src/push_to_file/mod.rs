//! # Push to File
//!
//! Delivers Conjur secrets as files on a shared volume.
//!
//! - `secret_spec`: alias/path pairs parsed from group annotations
//! - `secret_group`: group configuration, validation and file path resolution
//! - `templates`: standard file formats and their templates
//! - `renderer`: template execution with secret values
//! - `fetch`: batch retrieval of every group's secrets
//! - `provider`: the push-to-file [`SecretsProvider`](crate::provider::SecretsProvider)

pub mod fetch;
pub mod provider;
pub mod renderer;
pub mod secret_group;
pub mod secret_spec;
pub mod templates;
