//! # Provider Settings
//!
//! Builds the [`ProviderConfig`] from pod annotations and environment
//! variables.
//!
//! When a setting is available both as an annotation and as an environment
//! variable, the annotation wins. Every problem found is collected so that a
//! misconfigured pod is reported in one pass.

use crate::constants::{
    AUTHN_IDENTITY_KEY, CONTAINER_MODE_KEY, DEBUG_LOGGING_KEY, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_RETRY_COUNT_LIMIT, DEFAULT_RETRY_INTERVAL_SECS, DEFAULT_SECRETS_BASE_PATH,
    DEFAULT_TEMPLATES_BASE_PATH, JWT_TOKEN_PATH_KEY, K8S_SECRETS_KEY, MIN_REFRESH_INTERVAL,
    REMOVE_DELETED_SECRETS_KEY, RETRY_COUNT_LIMIT_KEY, RETRY_INTERVAL_SEC_KEY, SECRETS_DESTINATION_KEY,
    SECRETS_GROUP_PREFIX, SECRETS_REFRESH_ENABLED_KEY, SECRETS_REFRESH_INTERVAL_KEY,
    SECRET_GROUP_FILE_FORMAT_PREFIX, SECRET_GROUP_FILE_PATH_PREFIX,
    SECRET_GROUP_FILE_PERMISSIONS_PREFIX, SECRET_GROUP_FILE_TEMPLATE_PREFIX,
    SECRET_GROUP_POLICY_PATH_PREFIX,
};
use crate::controller::duration::{parse_go_duration, validate_duration_interval};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const ENV_POD_NAMESPACE: &str = "MY_POD_NAMESPACE";
const ENV_SECRETS_DESTINATION: &str = "SECRETS_DESTINATION";
const ENV_K8S_SECRETS: &str = "K8S_SECRETS";
const ENV_RETRY_INTERVAL_SEC: &str = "RETRY_INTERVAL_SEC";
const ENV_RETRY_COUNT_LIMIT: &str = "RETRY_COUNT_LIMIT";
const ENV_JWT_TOKEN_PATH: &str = "JWT_TOKEN_PATH";
const ENV_REMOVE_DELETED_SECRETS: &str = "REMOVE_DELETED_SECRETS";
const ENV_CONTAINER_MODE: &str = "CONTAINER_MODE";

/// Environment variables that take part in provider settings
const SETTINGS_ENV_VARS: &[&str] = &[
    ENV_POD_NAMESPACE,
    ENV_SECRETS_DESTINATION,
    ENV_K8S_SECRETS,
    ENV_RETRY_INTERVAL_SEC,
    ENV_RETRY_COUNT_LIMIT,
    ENV_JWT_TOKEN_PATH,
    ENV_REMOVE_DELETED_SECRETS,
    ENV_CONTAINER_MODE,
];

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    String(&'static [&'static str]),
    Integer,
    Boolean,
}

/// Provider-level annotations and the values they accept
const PROVIDER_ANNOTATIONS: &[(&str, ValueKind)] = &[
    (AUTHN_IDENTITY_KEY, ValueKind::String(&[])),
    (JWT_TOKEN_PATH_KEY, ValueKind::String(&[])),
    (
        CONTAINER_MODE_KEY,
        ValueKind::String(&["init", "application", "sidecar"]),
    ),
    (
        SECRETS_DESTINATION_KEY,
        ValueKind::String(&["file", "k8s_secrets"]),
    ),
    (K8S_SECRETS_KEY, ValueKind::String(&[])),
    (RETRY_COUNT_LIMIT_KEY, ValueKind::Integer),
    (RETRY_INTERVAL_SEC_KEY, ValueKind::Integer),
    (SECRETS_REFRESH_INTERVAL_KEY, ValueKind::String(&[])),
    (SECRETS_REFRESH_ENABLED_KEY, ValueKind::Boolean),
    (REMOVE_DELETED_SECRETS_KEY, ValueKind::Boolean),
    (DEBUG_LOGGING_KEY, ValueKind::Boolean),
];

/// Per-group annotation prefixes and the values they accept
const GROUP_ANNOTATION_PREFIXES: &[(&str, ValueKind)] = &[
    (SECRETS_GROUP_PREFIX, ValueKind::String(&[])),
    (SECRET_GROUP_POLICY_PATH_PREFIX, ValueKind::String(&[])),
    (SECRET_GROUP_FILE_PATH_PREFIX, ValueKind::String(&[])),
    (
        SECRET_GROUP_FILE_FORMAT_PREFIX,
        ValueKind::String(&["yaml", "json", "dotenv", "bash", "template"]),
    ),
    (SECRET_GROUP_FILE_PERMISSIONS_PREFIX, ValueKind::String(&[])),
    (SECRET_GROUP_FILE_TEMPLATE_PREFIX, ValueKind::String(&[])),
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} must be provided")]
    MissingEnvVar(&'static str),
    #[error("invalid value {value:?} for {key}, expected {expected}")]
    InvalidType {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("invalid value {value:?} for {key}, allowed values: {}", .allowed.join(", "))]
    InvalidChoice {
        key: String,
        value: String,
        allowed: &'static [&'static str],
    },
    #[error("secrets destination must be set with annotation {key:?} or environment variable {env}", key = SECRETS_DESTINATION_KEY, env = ENV_SECRETS_DESTINATION)]
    MissingStoreType,
    #[error("secrets destination \"file\" can only be set with annotation {key:?}", key = SECRETS_DESTINATION_KEY)]
    FileStoreFromEnv,
    #[error("invalid value {0:?} for environment variable {env}", env = ENV_SECRETS_DESTINATION)]
    InvalidEnvStoreType(String),
    #[error("Kubernetes Secrets must be listed with annotation {key:?} or environment variable {env}", key = K8S_SECRETS_KEY, env = ENV_K8S_SECRETS)]
    MissingK8sSecrets,
    #[error("invalid annotation {key:?}, expected a YAML list of Secret names: {reason}", key = K8S_SECRETS_KEY)]
    InvalidK8sSecrets { reason: String },
    #[error("secrets refresh is enabled while container mode is set to {0:?}")]
    RefreshWithoutSidecar(String),
    #[error("invalid secrets refresh interval {value:?}: {reason}")]
    InvalidRefreshInterval { value: String, reason: String },
}

/// Destination of fetched secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// Rendered files on a shared volume
    File,
    /// Data entries of existing Kubernetes Secrets
    K8sSecrets,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Self::File),
            "k8s_secrets" => Ok(Self::K8sSecrets),
            other => Err(format!("unknown secrets destination {other:?}")),
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::K8sSecrets => "k8s_secrets",
        })
    }
}

/// Lifecycle of the provider container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerMode {
    /// Init container: provide once and exit
    #[default]
    Init,
    /// Invoked from the application container: provide once and exit
    Application,
    /// Sidecar container: provide, then stay up and optionally refresh
    Sidecar,
}

impl FromStr for ContainerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "application" => Ok(Self::Application),
            "sidecar" => Ok(Self::Sidecar),
            other => Err(format!("unknown container mode {other:?}")),
        }
    }
}

impl fmt::Display for ContainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Application => "application",
            Self::Sidecar => "sidecar",
        })
    }
}

/// Fully validated provider configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub store_type: StoreType,
    pub container_mode: ContainerMode,
    /// Namespace of the pod, where Kubernetes Secrets are looked up
    pub pod_namespace: String,
    /// Kubernetes Secrets to fill (Kubernetes Secrets mode only)
    pub required_k8s_secrets: Vec<String>,
    pub retry_count_limit: u32,
    pub retry_interval: Duration,
    /// Zero disables periodic refresh
    pub refresh_interval: Duration,
    /// Remove provided secrets when Conjur reports 403/404
    pub sanitize_enabled: bool,
    pub debug_logging: bool,
    /// Base directory every secret file must resolve under
    pub secrets_base_path: PathBuf,
    /// Directory holding `<group>.tpl` template files
    pub templates_base_path: PathBuf,
}

impl ProviderConfig {
    /// Load from `annotations` and the process environment
    pub fn from_env(annotations: &HashMap<String, String>) -> Result<Self, Vec<ConfigError>> {
        Self::from_lookup(annotations, |key| std::env::var(key).ok())
    }

    /// Load from `annotations` and a custom environment source
    pub fn from_lookup(
        annotations: &HashMap<String, String>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, Vec<ConfigError>> {
        let (mut errors, mut infos) = validate_annotations(annotations);
        let settings = gather_settings(annotations, &lookup);
        let (settings_errors, settings_infos) = validate_settings(&settings);
        errors.extend(settings_errors);
        infos.extend(settings_infos);

        for message in &infos {
            info!("{message}");
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let mut config = new_config(&settings).map_err(|e| vec![e])?;
        config.secrets_base_path =
            PathBuf::from(env_var_or_default_str(&lookup, "SECRETS_BASE_PATH", DEFAULT_SECRETS_BASE_PATH));
        config.templates_base_path = PathBuf::from(env_var_or_default_str(
            &lookup,
            "TEMPLATES_BASE_PATH",
            DEFAULT_TEMPLATES_BASE_PATH,
        ));
        debug!(config = ?config, "Loaded provider configuration");
        Ok(config)
    }
}

/// Check every `conjur.org/` annotation against the value it accepts
///
/// Returns the errors, and informational messages for keys the provider does
/// not recognise. Keys outside `conjur.org/` are ignored.
#[must_use]
pub fn validate_annotations(annotations: &HashMap<String, String>) -> (Vec<ConfigError>, Vec<String>) {
    let mut errors = Vec::new();
    let mut infos = Vec::new();

    let mut keys: Vec<&String> = annotations.keys().collect();
    keys.sort();
    for key in keys {
        if !key.starts_with(crate::constants::ANNOTATION_PREFIX) {
            continue;
        }
        let kind = PROVIDER_ANNOTATIONS
            .iter()
            .find(|(known, _)| *known == key.as_str())
            .or_else(|| {
                GROUP_ANNOTATION_PREFIXES
                    .iter()
                    .find(|(prefix, _)| key.starts_with(prefix))
            })
            .map(|(_, kind)| *kind);

        match kind {
            Some(kind) => {
                if let Err(e) = validate_annotation_value(key, &annotations[key], kind) {
                    errors.push(e);
                }
            }
            None => infos.push(format!("annotation {key:?} not recognized")),
        }
    }
    (errors, infos)
}

fn validate_annotation_value(key: &str, value: &str, kind: ValueKind) -> Result<(), ConfigError> {
    let invalid_type = |expected| ConfigError::InvalidType {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    };
    match kind {
        ValueKind::Integer => {
            value.parse::<i64>().map_err(|_| invalid_type("Integer"))?;
        }
        ValueKind::Boolean => {
            parse_bool(value).ok_or_else(|| invalid_type("Boolean"))?;
        }
        ValueKind::String(allowed) => {
            if !allowed.is_empty() && !allowed.contains(&value) {
                return Err(ConfigError::InvalidChoice {
                    key: key.to_string(),
                    value: value.to_string(),
                    allowed,
                });
            }
        }
    }
    Ok(())
}

/// Provider-level annotations plus non-empty settings environment variables
#[must_use]
pub fn gather_settings(
    annotations: &HashMap<String, String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> HashMap<String, String> {
    let mut settings: HashMap<String, String> = annotations
        .iter()
        .filter(|(key, _)| PROVIDER_ANNOTATIONS.iter().any(|(known, _)| *known == key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for env_var in SETTINGS_ENV_VARS {
        if let Some(value) = lookup(env_var).filter(|v| !v.is_empty()) {
            settings.insert((*env_var).to_string(), value);
        }
    }
    settings
}

fn setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> &'a str {
    settings.get(key).map_or("", String::as_str)
}

/// Annotation value if set, otherwise the environment variable
fn annotation_or_env<'a>(settings: &'a HashMap<String, String>, annotation: &str, env: &str) -> &'a str {
    match setting(settings, annotation) {
        "" => setting(settings, env),
        value => value,
    }
}

fn overridden(what: &str, env: &str, annotation: &str) -> String {
    format!("{what} is set by both environment variable {env} and annotation {annotation:?}, the annotation takes precedence")
}

/// Check that gathered settings form a valid configuration
///
/// Returns errors and informational messages.
#[must_use]
pub fn validate_settings(settings: &HashMap<String, String>) -> (Vec<ConfigError>, Vec<String>) {
    let mut errors = Vec::new();
    let mut infos = Vec::new();

    if setting(settings, ENV_POD_NAMESPACE).is_empty() {
        errors.push(ConfigError::MissingEnvVar(ENV_POD_NAMESPACE));
    }

    let env_store_type = setting(settings, ENV_SECRETS_DESTINATION);
    let annotation_store_type = setting(settings, SECRETS_DESTINATION_KEY);
    let store_type = if annotation_store_type.is_empty() {
        match env_store_type {
            "k8s_secrets" => Some(StoreType::K8sSecrets),
            "file" => {
                errors.push(ConfigError::FileStoreFromEnv);
                None
            }
            "" => {
                errors.push(ConfigError::MissingStoreType);
                None
            }
            other => {
                errors.push(ConfigError::InvalidEnvStoreType(other.to_string()));
                None
            }
        }
    } else if let Ok(store_type) = annotation_store_type.parse::<StoreType>() {
        if env_store_type.parse::<StoreType>().is_ok() {
            infos.push(overridden("StoreType", ENV_SECRETS_DESTINATION, SECRETS_DESTINATION_KEY));
        }
        Some(store_type)
    } else {
        // Reported by annotation validation
        None
    };

    if store_type == Some(StoreType::K8sSecrets) {
        let env_k8s_secrets = setting(settings, ENV_K8S_SECRETS);
        let annotation_k8s_secrets = setting(settings, K8S_SECRETS_KEY);
        match (env_k8s_secrets.is_empty(), annotation_k8s_secrets.is_empty()) {
            (true, true) => errors.push(ConfigError::MissingK8sSecrets),
            (false, false) => infos.push(overridden("RequiredK8sSecrets", ENV_K8S_SECRETS, K8S_SECRETS_KEY)),
            _ => {}
        }
        if !annotation_k8s_secrets.is_empty() {
            if let Err(e) = parse_k8s_secrets_annotation(annotation_k8s_secrets) {
                errors.push(e);
            }
        }
    }

    for (what, env, annotation) in [
        ("RetryCountLimit", ENV_RETRY_COUNT_LIMIT, RETRY_COUNT_LIMIT_KEY),
        ("RetryIntervalSec", ENV_RETRY_INTERVAL_SEC, RETRY_INTERVAL_SEC_KEY),
    ] {
        if !setting(settings, env).is_empty() && !setting(settings, annotation).is_empty() {
            infos.push(overridden(what, env, annotation));
        }
    }

    if let Err(e) = validate_refresh_settings(settings) {
        errors.push(e);
    }
    (errors, infos)
}

fn validate_refresh_settings(settings: &HashMap<String, String>) -> Result<(), ConfigError> {
    let interval = setting(settings, SECRETS_REFRESH_INTERVAL_KEY);
    let enabled = setting(settings, SECRETS_REFRESH_ENABLED_KEY);
    if interval.is_empty() && enabled.is_empty() {
        return Ok(());
    }

    let container_mode = annotation_or_env(settings, CONTAINER_MODE_KEY, ENV_CONTAINER_MODE);
    if container_mode != "sidecar" {
        return Err(ConfigError::RefreshWithoutSidecar(container_mode.to_string()));
    }
    if interval.is_empty() {
        return Ok(());
    }

    let invalid = |reason: String| ConfigError::InvalidRefreshInterval {
        value: interval.to_string(),
        reason,
    };
    parse_go_duration(interval).map_err(|e| invalid(e.to_string()))?;
    if !enabled.is_empty() && parse_bool(enabled) == Some(false) {
        return Err(invalid(
            "secrets refresh interval set to value while enable is false".to_string(),
        ));
    }
    validate_duration_interval(interval, "secrets refresh interval", MIN_REFRESH_INTERVAL)
        .map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// Parse the `conjur.org/k8s-secrets` YAML list
pub fn parse_k8s_secrets_annotation(value: &str) -> Result<Vec<String>, ConfigError> {
    let names: Option<Vec<String>> = serde_yaml::from_str(value).map_err(|e| ConfigError::InvalidK8sSecrets {
        reason: e.to_string(),
    })?;
    Ok(names
        .unwrap_or_default()
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect())
}

/// Parse the comma separated `K8S_SECRETS` environment variable
#[must_use]
pub fn parse_k8s_secrets_env(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|name| name.replace(' ', ""))
        .filter(|name| !name.is_empty())
        .collect()
}

/// Build the configuration from validated settings
fn new_config(settings: &HashMap<String, String>) -> Result<ProviderConfig, ConfigError> {
    let store_type: StoreType = annotation_or_env(settings, SECRETS_DESTINATION_KEY, ENV_SECRETS_DESTINATION)
        .parse()
        .map_err(|_| ConfigError::MissingStoreType)?;

    let required_k8s_secrets = match store_type {
        StoreType::File => Vec::new(),
        StoreType::K8sSecrets => match setting(settings, K8S_SECRETS_KEY) {
            "" => parse_k8s_secrets_env(setting(settings, ENV_K8S_SECRETS)),
            annotation => parse_k8s_secrets_annotation(annotation)?,
        },
    };

    let retry_count_limit = parse_or_default(
        annotation_or_env(settings, RETRY_COUNT_LIMIT_KEY, ENV_RETRY_COUNT_LIMIT),
        DEFAULT_RETRY_COUNT_LIMIT,
    );
    let retry_interval_secs = parse_or_default(
        annotation_or_env(settings, RETRY_INTERVAL_SEC_KEY, ENV_RETRY_INTERVAL_SEC),
        DEFAULT_RETRY_INTERVAL_SECS,
    );

    let refresh_enabled = parse_bool(setting(settings, SECRETS_REFRESH_ENABLED_KEY));
    let refresh_interval = match setting(settings, SECRETS_REFRESH_INTERVAL_KEY) {
        "" if refresh_enabled == Some(true) => DEFAULT_REFRESH_INTERVAL,
        "" => Duration::ZERO,
        interval => parse_go_duration(interval).unwrap_or(Duration::ZERO),
    };

    let sanitize_enabled = parse_bool(annotation_or_env(
        settings,
        REMOVE_DELETED_SECRETS_KEY,
        ENV_REMOVE_DELETED_SECRETS,
    ))
    .unwrap_or(true);

    Ok(ProviderConfig {
        store_type,
        container_mode: annotation_or_env(settings, CONTAINER_MODE_KEY, ENV_CONTAINER_MODE)
            .parse()
            .unwrap_or_default(),
        pod_namespace: setting(settings, ENV_POD_NAMESPACE).to_string(),
        required_k8s_secrets,
        retry_count_limit,
        retry_interval: Duration::from_secs(retry_interval_secs),
        refresh_interval,
        sanitize_enabled,
        debug_logging: parse_bool(setting(settings, DEBUG_LOGGING_KEY)).unwrap_or(false),
        secrets_base_path: PathBuf::from(DEFAULT_SECRETS_BASE_PATH),
        templates_base_path: PathBuf::from(DEFAULT_TEMPLATES_BASE_PATH),
    })
}

/// Parse `value` or fall back to `default` when empty, invalid or negative
fn parse_or_default<T: FromStr>(value: &str, default: T) -> T {
    value.trim().parse().unwrap_or(default)
}

/// Boolean in any of the spellings Kubernetes manifests commonly use
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// Read a variable from `lookup` or return default
fn env_var_or_default_str(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn load(annotations: &[(&str, &str)], env: &[(&str, &str)]) -> Result<ProviderConfig, Vec<ConfigError>> {
        let env = map(env);
        ProviderConfig::from_lookup(&map(annotations), |k| env.get(k).cloned())
    }

    #[test]
    fn test_file_mode_defaults() {
        let config = load(
            &[("conjur.org/secrets-destination", "file")],
            &[("MY_POD_NAMESPACE", "app-ns")],
        )
        .unwrap();

        assert_eq!(config.store_type, StoreType::File);
        assert_eq!(config.container_mode, ContainerMode::Init);
        assert_eq!(config.pod_namespace, "app-ns");
        assert!(config.required_k8s_secrets.is_empty());
        assert_eq!(config.retry_count_limit, 5);
        assert_eq!(config.retry_interval, Duration::from_secs(1));
        assert_eq!(config.refresh_interval, Duration::ZERO);
        assert!(config.sanitize_enabled);
        assert!(!config.debug_logging);
        assert_eq!(config.secrets_base_path, PathBuf::from("/conjur/secrets"));
    }

    #[test]
    fn test_k8s_mode_from_env() {
        let config = load(
            &[],
            &[
                ("MY_POD_NAMESPACE", "app-ns"),
                ("SECRETS_DESTINATION", "k8s_secrets"),
                ("K8S_SECRETS", "db-creds, api-keys,,"),
                ("RETRY_COUNT_LIMIT", "2"),
                ("RETRY_INTERVAL_SEC", "7"),
                ("REMOVE_DELETED_SECRETS", "false"),
            ],
        )
        .unwrap();

        assert_eq!(config.store_type, StoreType::K8sSecrets);
        assert_eq!(config.required_k8s_secrets, vec!["db-creds", "api-keys"]);
        assert_eq!(config.retry_count_limit, 2);
        assert_eq!(config.retry_interval, Duration::from_secs(7));
        assert!(!config.sanitize_enabled);
    }

    #[test]
    fn test_annotations_take_precedence() {
        let config = load(
            &[
                ("conjur.org/secrets-destination", "k8s_secrets"),
                ("conjur.org/k8s-secrets", "- from-annotation\n- second\n"),
                ("conjur.org/retry-count-limit", "9"),
                ("conjur.org/remove-deleted-secrets-enabled", "false"),
            ],
            &[
                ("MY_POD_NAMESPACE", "app-ns"),
                ("SECRETS_DESTINATION", "k8s_secrets"),
                ("K8S_SECRETS", "from-env"),
                ("RETRY_COUNT_LIMIT", "2"),
                ("REMOVE_DELETED_SECRETS", "true"),
            ],
        )
        .unwrap();

        assert_eq!(config.required_k8s_secrets, vec!["from-annotation", "second"]);
        assert_eq!(config.retry_count_limit, 9);
        assert!(!config.sanitize_enabled);
    }

    #[test]
    fn test_errors_are_collected() {
        let errors = load(
            &[
                ("conjur.org/retry-count-limit", "five"),
                ("conjur.org/container-mode", "daemon"),
            ],
            &[],
        )
        .unwrap_err();

        assert!(errors.contains(&ConfigError::MissingEnvVar("MY_POD_NAMESPACE")));
        assert!(errors.contains(&ConfigError::MissingStoreType));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidType { key, .. } if key == "conjur.org/retry-count-limit")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidChoice { value, .. } if value == "daemon")));
    }

    #[test]
    fn test_file_destination_requires_annotation() {
        let errors = load(
            &[],
            &[("MY_POD_NAMESPACE", "ns"), ("SECRETS_DESTINATION", "file")],
        )
        .unwrap_err();
        assert_eq!(errors, vec![ConfigError::FileStoreFromEnv]);
    }

    #[test]
    fn test_k8s_mode_requires_secret_list() {
        let errors = load(
            &[("conjur.org/secrets-destination", "k8s_secrets")],
            &[("MY_POD_NAMESPACE", "ns")],
        )
        .unwrap_err();
        assert_eq!(errors, vec![ConfigError::MissingK8sSecrets]);
    }

    #[test]
    fn test_refresh_interval() {
        let config = load(
            &[
                ("conjur.org/secrets-destination", "file"),
                ("conjur.org/container-mode", "sidecar"),
                ("conjur.org/secrets-refresh-interval", "1m30s"),
            ],
            &[("MY_POD_NAMESPACE", "ns")],
        )
        .unwrap();
        assert_eq!(config.container_mode, ContainerMode::Sidecar);
        assert_eq!(config.refresh_interval, Duration::from_secs(90));
    }

    #[test]
    fn test_refresh_enabled_defaults_interval() {
        let config = load(
            &[
                ("conjur.org/secrets-destination", "file"),
                ("conjur.org/container-mode", "sidecar"),
                ("conjur.org/secrets-refresh-enabled", "true"),
            ],
            &[("MY_POD_NAMESPACE", "ns")],
        )
        .unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
    }

    #[test]
    fn test_refresh_requires_sidecar() {
        let errors = load(
            &[
                ("conjur.org/secrets-destination", "file"),
                ("conjur.org/secrets-refresh-interval", "5m"),
            ],
            &[("MY_POD_NAMESPACE", "ns"), ("CONTAINER_MODE", "init")],
        )
        .unwrap_err();
        assert_eq!(errors, vec![ConfigError::RefreshWithoutSidecar("init".to_string())]);
    }

    #[test]
    fn test_invalid_refresh_intervals() {
        for (interval, enabled) in [("500ms", ""), ("soon", ""), ("5m", "false")] {
            let mut annotations = vec![
                ("conjur.org/secrets-destination", "file"),
                ("conjur.org/container-mode", "sidecar"),
                ("conjur.org/secrets-refresh-interval", interval),
            ];
            if !enabled.is_empty() {
                annotations.push(("conjur.org/secrets-refresh-enabled", enabled));
            }
            let errors = load(&annotations, &[("MY_POD_NAMESPACE", "ns")]).unwrap_err();
            assert!(
                matches!(errors.as_slice(), [ConfigError::InvalidRefreshInterval { .. }]),
                "interval {interval:?} enabled {enabled:?}: {errors:?}"
            );
        }
    }

    #[test]
    fn test_validate_annotations_reports_unknown_keys() {
        let (errors, infos) = validate_annotations(&map(&[
            ("conjur.org/not-a-thing", "x"),
            ("conjur.org/conjur-secrets.cache", "- path"),
            ("conjur.org/secret-file-format.cache", "xml"),
            ("example.com/unrelated", "ignored"),
        ]));
        assert_eq!(infos.len(), 1);
        assert!(infos[0].contains("conjur.org/not-a-thing"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("xml"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("yes"), None);
    }

    #[test]
    fn test_parse_k8s_secrets_annotation() {
        assert_eq!(
            parse_k8s_secrets_annotation("- one\n- two\n").unwrap(),
            vec!["one", "two"]
        );
        assert_eq!(parse_k8s_secrets_annotation("[a, b]").unwrap(), vec!["a", "b"]);
        assert!(parse_k8s_secrets_annotation("key: value").is_err());
    }
}
