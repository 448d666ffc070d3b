//! # Secret Groups
//!
//! A secret group is one render target: a file under the secrets base path,
//! its format or template, its permissions and the secrets it needs.
//!
//! Groups are built from `conjur.org/*.<group>` annotations. Every group is
//! validated before any secret is fetched, and all problems across all
//! groups are reported together.

use super::fetch::Secret;
use super::renderer::{self, RenderError};
use super::secret_spec::{parse_secret_specs, resolve_policy_paths, validate_secret_paths, SecretSpec};
use super::templates::{template_for_format, FileFormat, UnknownFormat};
use crate::constants::{
    DEFAULT_FILE_FORMAT, DEFAULT_FILE_PERMISSIONS, MAX_FILENAME_LEN, REDACTED_VALUE,
    SECRETS_GROUP_PREFIX, SECRET_GROUP_FILE_FORMAT_PREFIX, SECRET_GROUP_FILE_PATH_PREFIX,
    SECRET_GROUP_FILE_PERMISSIONS_PREFIX, SECRET_GROUP_FILE_TEMPLATE_PREFIX,
    SECRET_GROUP_POLICY_PATH_PREFIX,
};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Configuration problem with a secret group
#[derive(Error, Debug)]
pub enum SecretGroupError {
    #[error("unable to create secret specs from annotation \"{prefix}{group}\": {reason}", prefix = SECRETS_GROUP_PREFIX)]
    InvalidSpecs { group: String, reason: String },
    #[error("Secret group {group}: null Conjur variable path")]
    NullPath { group: String },
    #[error("Secret group {group}: the Conjur variable path '{path}' has a trailing '/'")]
    TrailingSlash { group: String, path: String },
    #[error("Secret group {group}: the Conjur variable name '{name}' is longer than 126 characters")]
    VariableNameTooLong { group: String, name: String },
    #[error("unable to process group {group:?} into file format {format:?}: {reason}")]
    Format {
        group: String,
        format: String,
        reason: String,
    },
    #[error("unable to use file template for secret group {group:?}: {source}")]
    Template { group: String, source: RenderError },
    #[error("template required for secret group {group:?}")]
    TemplateMissing { group: String },
    #[error("secret file template for group {group:?} cannot be provided both by annotation and by template file")]
    TemplateConflict { group: String },
    #[error("unable to read template file for secret group {group:?}: {source}")]
    TemplateRead { group: String, source: io::Error },
    #[error(
        "unable to create file mode from annotation \"{prefix}{group}\": {reason}",
        prefix = SECRET_GROUP_FILE_PERMISSIONS_PREFIX
    )]
    Permissions { group: String, reason: String },
    #[error("provided filepath {path:?} for secret group {group:?} is absolute, requires relative path")]
    AbsolutePath { group: String, path: String },
    #[error("provided filepath {path:?} for secret group {group:?} must be relative to secrets base path")]
    OutsideBasePath { group: String, path: String },
    #[error("filename {filename:?} for provided filepath for secret group {group:?} must not be longer than {max} characters", max = MAX_FILENAME_LEN)]
    FilenameTooLong { group: String, filename: String },
    #[error("duplicate filepath {path:?} for groups: {}", .groups.join(", "))]
    DuplicatePath { path: PathBuf, groups: Vec<String> },
}

/// One validated render target
#[derive(Debug, Clone)]
pub struct SecretGroup {
    pub name: String,
    /// Absolute destination, always under the secrets base path
    pub file_path: PathBuf,
    pub file_format: FileFormat,
    /// Template text: the user's for [`FileFormat::Template`], otherwise the standard one
    pub file_template: String,
    pub file_permissions: u32,
    pub policy_path_prefix: String,
    pub specs: Vec<SecretSpec>,
}

impl SecretGroup {
    /// Render this group's file content
    pub fn render(&self, secrets: &[Secret]) -> Result<zeroize::Zeroizing<String>, RenderError> {
        renderer::render(&self.name, &self.file_template, secrets)
    }
}

/// Build every secret group declared in `annotations`
///
/// Groups come back sorted by name. All errors from all groups, plus any
/// duplicate destination paths, are returned together.
pub fn new_secret_groups(
    secrets_base_path: &Path,
    templates_base_path: &Path,
    annotations: &HashMap<String, String>,
) -> Result<Vec<SecretGroup>, Vec<SecretGroupError>> {
    let mut names: Vec<&str> = annotations
        .keys()
        .filter_map(|key| key.strip_prefix(SECRETS_GROUP_PREFIX))
        .collect();
    names.sort_unstable();

    let mut groups = Vec::with_capacity(names.len());
    let mut errors = Vec::new();
    for name in names {
        match new_secret_group(name, annotations, secrets_base_path, templates_base_path) {
            Ok(group) => groups.push(group),
            Err(group_errors) => errors.extend(group_errors),
        }
    }

    errors.extend(validate_group_file_paths(&groups));

    if errors.is_empty() {
        Ok(groups)
    } else {
        Err(errors)
    }
}

fn new_secret_group(
    name: &str,
    annotations: &HashMap<String, String>,
    secrets_base_path: &Path,
    templates_base_path: &Path,
) -> Result<SecretGroup, Vec<SecretGroupError>> {
    let annotation = |prefix: &str| {
        annotations
            .get(&format!("{prefix}{name}"))
            .map_or("", String::as_str)
    };

    let raw_specs = annotation(SECRETS_GROUP_PREFIX);
    let raw_file_path = annotation(SECRET_GROUP_FILE_PATH_PREFIX);
    let raw_format = match annotation(SECRET_GROUP_FILE_FORMAT_PREFIX) {
        "" => DEFAULT_FILE_FORMAT,
        format => format,
    };
    let policy_path_prefix = annotation(SECRET_GROUP_POLICY_PATH_PREFIX)
        .trim_start_matches('/')
        .to_string();

    let file_format: FileFormat = raw_format.parse().map_err(|e: UnknownFormat| {
        vec![SecretGroupError::Format {
            group: name.to_string(),
            format: raw_format.to_string(),
            reason: e.to_string(),
        }]
    })?;

    let user_template = if file_format == FileFormat::Template {
        Some(collect_template(name, annotations, templates_base_path).map_err(|e| vec![e])?)
    } else {
        None
    };

    let file_permissions = parse_permissions(annotation(SECRET_GROUP_FILE_PERMISSIONS_PREFIX))
        .map_err(|reason| {
            vec![SecretGroupError::Permissions {
                group: name.to_string(),
                reason,
            }]
        })?;

    let mut specs = parse_secret_specs(raw_specs).map_err(|reason| {
        vec![SecretGroupError::InvalidSpecs {
            group: name.to_string(),
            reason,
        }]
    })?;
    resolve_policy_paths(&policy_path_prefix, &mut specs);

    let path_errors = validate_secret_paths(&specs, name);
    if !path_errors.is_empty() {
        return Err(path_errors);
    }

    let standard_template = template_for_format(file_format, &specs).map_err(|e| {
        vec![SecretGroupError::Format {
            group: name.to_string(),
            format: raw_format.to_string(),
            reason: e.to_string(),
        }]
    })?;
    let file_template = match (user_template, standard_template) {
        (Some(template), _) => template,
        (None, Some(template)) => template.to_string(),
        (None, None) => {
            return Err(vec![SecretGroupError::TemplateMissing {
                group: name.to_string(),
            }])
        }
    };

    // Dry run with placeholder values; templates that branch on real values
    // may still fail later.
    let placeholders: Vec<Secret> = specs
        .iter()
        .map(|spec| Secret::new(spec.alias.clone(), REDACTED_VALUE))
        .collect();
    renderer::render(name, &file_template, &placeholders).map_err(|source| {
        vec![SecretGroupError::Template {
            group: name.to_string(),
            source,
        }]
    })?;

    let file_path = absolute_file_path(name, raw_file_path, file_format, secrets_base_path)
        .map_err(|e| vec![e])?;

    Ok(SecretGroup {
        name: name.to_string(),
        file_path,
        file_format,
        file_template,
        file_permissions,
        policy_path_prefix,
        specs,
    })
}

/// Template from the annotation or from `<templates_base_path>/<group>.tpl`, exactly one of which must exist
fn collect_template(
    name: &str,
    annotations: &HashMap<String, String>,
    templates_base_path: &Path,
) -> Result<String, SecretGroupError> {
    let annotation_template = annotations
        .get(&format!("{SECRET_GROUP_FILE_TEMPLATE_PREFIX}{name}"))
        .cloned()
        .unwrap_or_default();

    let template_file = templates_base_path.join(format!("{name}.tpl"));
    let file_template = match std::fs::read_to_string(&template_file) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(source) => {
            return Err(SecretGroupError::TemplateRead {
                group: name.to_string(),
                source,
            })
        }
    };

    match (annotation_template.is_empty(), file_template.is_empty()) {
        (false, false) => Err(SecretGroupError::TemplateConflict {
            group: name.to_string(),
        }),
        (true, true) => Err(SecretGroupError::TemplateMissing {
            group: name.to_string(),
        }),
        (false, true) => Ok(annotation_template),
        (true, false) => Ok(file_template),
    }
}

/// Parse `rw-r--r--` or `-rw-r--r--` into a mode; empty means the default
///
/// The owner must be able to read and write.
pub fn parse_permissions(perms: &str) -> Result<u32, String> {
    if perms.is_empty() {
        return Ok(DEFAULT_FILE_PERMISSIONS);
    }

    let invalid_format = || format!("Invalid permissions format: '{perms}'");
    let bits: &[u8] = match perms.as_bytes() {
        b if b.len() == 9 => b,
        [b'-', rest @ ..] if rest.len() == 9 => rest,
        _ => return Err(invalid_format()),
    };

    if bits[0] != b'r' || bits[1] != b'w' {
        return Err(format!(
            "Invalid permissions: '{perms}', owner permissions must at least have read and write (-rw-------)"
        ));
    }

    let mut mode = 0;
    for (index, flag) in bits.iter().enumerate() {
        let expected = b"rwx"[index % 3];
        mode <<= 1;
        match *flag {
            f if f == expected => mode |= 1,
            b'-' => {}
            _ => return Err(invalid_format()),
        }
    }
    Ok(mode)
}

/// Resolve a group's relative file path against the secrets base path
fn absolute_file_path(
    name: &str,
    file_path: &str,
    format: FileFormat,
    secrets_base_path: &Path,
) -> Result<PathBuf, SecretGroupError> {
    if Path::new(file_path).is_absolute() {
        return Err(SecretGroupError::AbsolutePath {
            group: name.to_string(),
            path: file_path.to_string(),
        });
    }

    let mut relative = PathBuf::from(file_path);
    if file_path.is_empty() || file_path.ends_with('/') {
        let extension = match format {
            FileFormat::Template => "out",
            other => other.extension(),
        };
        relative.push(format!("{name}.{extension}"));
        info!(group = name, path = %relative.display(), "Using default file name for secret group");
    }

    let base = clean_path(secrets_base_path);
    let absolute = clean_path(&base.join(&relative));
    if absolute == base || !absolute.starts_with(&base) {
        return Err(SecretGroupError::OutsideBasePath {
            group: name.to_string(),
            path: relative.display().to_string(),
        });
    }

    let filename = absolute
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    if filename.len() > MAX_FILENAME_LEN {
        return Err(SecretGroupError::FilenameTooLong {
            group: name.to_string(),
            filename,
        });
    }

    Ok(absolute)
}

/// Lexically normalise a path, resolving `.` and `..` without touching the filesystem
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let last = cleaned.components().next_back();
                match last {
                    Some(Component::Normal(_)) => {
                        cleaned.pop();
                    }
                    Some(Component::RootDir | Component::Prefix(_)) => {}
                    _ => cleaned.push(".."),
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// One error per destination path claimed by more than one group
fn validate_group_file_paths(groups: &[SecretGroup]) -> Vec<SecretGroupError> {
    let mut by_path: BTreeMap<&Path, Vec<String>> = BTreeMap::new();
    for group in groups {
        by_path
            .entry(group.file_path.as_path())
            .or_default()
            .push(group.name.clone());
    }

    by_path
        .into_iter()
        .filter(|(_, names)| names.len() > 1)
        .map(|(path, groups)| SecretGroupError::DuplicatePath {
            path: path.to_path_buf(),
            groups,
        })
        .collect()
}
