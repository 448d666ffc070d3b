//! # Constants
//!
//! Shared constants used throughout the secrets provider.
//!
//! These values represent reasonable defaults and can be overridden via
//! pod annotations or environment variables where applicable.

use std::time::Duration;

/// Prefix shared by every annotation the provider understands
pub const ANNOTATION_PREFIX: &str = "conjur.org/";

/// Secret group definition: `conjur.org/conjur-secrets.<group>`
pub const SECRETS_GROUP_PREFIX: &str = "conjur.org/conjur-secrets.";

/// Policy path prepended to every variable path of a group
pub const SECRET_GROUP_POLICY_PATH_PREFIX: &str = "conjur.org/conjur-secrets-policy-path.";

/// Inline template for a group rendered with the `template` format
pub const SECRET_GROUP_FILE_TEMPLATE_PREFIX: &str = "conjur.org/secret-file-template.";

/// Relative destination path of a group's file
pub const SECRET_GROUP_FILE_PATH_PREFIX: &str = "conjur.org/secret-file-path.";

/// Output format of a group's file
pub const SECRET_GROUP_FILE_FORMAT_PREFIX: &str = "conjur.org/secret-file-format.";

/// POSIX permission string of a group's file
pub const SECRET_GROUP_FILE_PERMISSIONS_PREFIX: &str = "conjur.org/secret-file-permissions.";

pub const CONTAINER_MODE_KEY: &str = "conjur.org/container-mode";
pub const SECRETS_DESTINATION_KEY: &str = "conjur.org/secrets-destination";
pub const K8S_SECRETS_KEY: &str = "conjur.org/k8s-secrets";
pub const RETRY_COUNT_LIMIT_KEY: &str = "conjur.org/retry-count-limit";
pub const RETRY_INTERVAL_SEC_KEY: &str = "conjur.org/retry-interval-sec";
pub const SECRETS_REFRESH_INTERVAL_KEY: &str = "conjur.org/secrets-refresh-interval";
pub const SECRETS_REFRESH_ENABLED_KEY: &str = "conjur.org/secrets-refresh-enabled";
pub const REMOVE_DELETED_SECRETS_KEY: &str = "conjur.org/remove-deleted-secrets-enabled";
pub const DEBUG_LOGGING_KEY: &str = "conjur.org/debug-logging";
pub const AUTHN_IDENTITY_KEY: &str = "conjur.org/authn-identity";
pub const JWT_TOKEN_PATH_KEY: &str = "conjur.org/jwt-token-path";

/// Data entry of a Kubernetes Secret that maps application keys to Conjur variable paths
pub const CONJUR_MAP_KEY: &str = "conjur-map";

/// Default number of retries after a failed provide
pub const DEFAULT_RETRY_COUNT_LIMIT: u32 = 5;

/// Default delay between retries (seconds)
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 1;

/// Refresh interval applied when refresh is enabled without an explicit interval
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Shortest accepted refresh interval
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Default POSIX mode for rendered secret files (`rw-r--r--`)
pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;

/// Default file format when a group does not name one
pub const DEFAULT_FILE_FORMAT: &str = "yaml";

/// Longest file name accepted for a secret file
pub const MAX_FILENAME_LEN: usize = 255;

/// Longest variable name (last policy path segment) Conjur accepts
pub const MAX_VARIABLE_NAME_LEN: usize = 126;

/// Base directory that every secret file must resolve under
pub const DEFAULT_SECRETS_BASE_PATH: &str = "/conjur/secrets";

/// Directory holding `<group>.tpl` template files
pub const DEFAULT_TEMPLATES_BASE_PATH: &str = "/conjur/templates";

/// Downward API volume file carrying the pod annotations
pub const DEFAULT_ANNOTATIONS_FILE: &str = "/conjur/podinfo/annotations";

/// Access token written by the Conjur authenticator container
pub const DEFAULT_ACCESS_TOKEN_FILE: &str = "/run/conjur/access-token";

/// Status directory shared with readiness/liveness probes
pub const DEFAULT_STATUS_DIR: &str = "/conjur/status";

/// Directory the status scripts are baked into
pub const DEFAULT_SCRIPTS_SOURCE_DIR: &str = "/usr/local/bin";

/// Sentinel created after the first successful provide
pub const SECRETS_PROVIDED_FILE: &str = "CONJUR_SECRETS_PROVIDED";

/// Sentinel created whenever a refresh changed a destination
pub const SECRETS_UPDATED_FILE: &str = "CONJUR_SECRETS_UPDATED";

/// Scripts copied into the status directory at startup
pub const STATUS_SCRIPTS: &[&str] = &["conjur-secrets-unchanged.sh"];

/// Mode of the sentinel status files
pub const STATUS_FILE_MODE: u32 = 0o666;

/// Mode forced onto copied status scripts
pub const STATUS_SCRIPT_MODE: u32 = 0o755;

/// Time the refresh task gets to observe the quit signal during shutdown
pub const REFRESH_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(10);

/// Placeholder value used to dry-run templates at configuration time
///
/// Base64 of `REDACTED`, so templates that `b64dec` a secret pass the dry run.
pub const REDACTED_VALUE: &str = "UkVEQUNURUQ=";
