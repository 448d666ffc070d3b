//! # Secret Specs
//!
//! A secret spec pairs the name an application sees (the alias) with the
//! Conjur variable path it is fetched from.
//!
//! Specs are declared as a YAML list where each entry is either a bare path
//! (the alias defaults to the last path segment) or a single-entry map of
//! alias to path:
//!
//! ```yaml
//! - prod/db/url
//! - password: prod/db/password
//! ```

use super::secret_group::SecretGroupError;
use crate::constants::MAX_VARIABLE_NAME_LEN;
use serde_yaml::Value;

const INVALID_SPEC: &str =
    "expected a \"string (path)\" or \"single entry map of string to string (alias to path)\"";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    /// Name of the secret from the application's perspective
    pub alias: String,
    /// Conjur variable path
    pub path: String,
}

impl SecretSpec {
    /// Spec whose alias is the last segment of `path`
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        Self {
            alias: last_segment(path).to_string(),
            path: path.to_string(),
        }
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse the YAML list of a `conjur.org/conjur-secrets.<group>` annotation
///
/// An empty document yields no specs. Errors name the offending entry by its
/// 1-based position in the list.
pub fn parse_secret_specs(raw: &str) -> Result<Vec<SecretSpec>, String> {
    let document: Value = serde_yaml::from_str(raw)
        .map_err(|e| format!("yaml: cannot unmarshal to list of secret specs: {e}"))?;

    let entries = match document {
        Value::Null => return Ok(Vec::new()),
        Value::Sequence(entries) => entries,
        _ => return Err("yaml: cannot unmarshal to list of secret specs".to_string()),
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let invalid = || format!("{INVALID_SPEC} for entry {}", index + 1);
            if let Some(path) = scalar_to_string(entry) {
                return Ok(SecretSpec::from_path(&path));
            }
            let Value::Mapping(map) = entry else {
                return Err(invalid());
            };
            let mut pairs = map.iter();
            match (pairs.next(), pairs.next()) {
                (Some((alias, path)), None) => Ok(SecretSpec {
                    alias: scalar_to_string(alias).ok_or_else(invalid)?,
                    path: scalar_to_string(path).ok_or_else(invalid)?,
                }),
                _ => Err(invalid()),
            }
        })
        .collect()
}

/// Prefix every spec path with the group's policy path
pub fn resolve_policy_paths(policy_path_prefix: &str, specs: &mut [SecretSpec]) {
    if policy_path_prefix.is_empty() {
        return;
    }
    let prefix = policy_path_prefix.trim_end_matches('/');
    for spec in specs {
        spec.path = format!("{prefix}/{}", spec.path.trim_start_matches('/'));
    }
}

/// Check a Conjur variable path
pub fn validate_secret_path(path: &str, group: &str) -> Result<(), SecretGroupError> {
    if path.is_empty() {
        return Err(SecretGroupError::NullPath {
            group: group.to_string(),
        });
    }

    let name = last_segment(path);
    if name.is_empty() {
        return Err(SecretGroupError::TrailingSlash {
            group: group.to_string(),
            path: path.to_string(),
        });
    }
    if name.len() > MAX_VARIABLE_NAME_LEN {
        return Err(SecretGroupError::VariableNameTooLong {
            group: group.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Check every spec path, collecting all failures
#[must_use]
pub fn validate_secret_paths(specs: &[SecretSpec], group: &str) -> Vec<SecretGroupError> {
    specs
        .iter()
        .filter_map(|spec| validate_secret_path(&spec.path, group).err())
        .collect()
}
