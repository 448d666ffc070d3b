//! # Standard File Formats
//!
//! Built-in templates for the `yaml`, `json`, `dotenv` and `bash` formats, and
//! the alias rules each format imposes. Aliases are checked before any secret
//! is fetched, so a group that could never render is rejected up front.

use super::secret_spec::SecretSpec;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_YAML_KEY_LEN: usize = 1024;
const MAX_JSON_KEY_LEN: usize = 2_097_152;

static BASH_VAR_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$")
        .expect("Failed to compile variable name pattern - this should never happen")
});

const YAML_TEMPLATE: &str = "{% for s in secrets_array %}{% if not loop.first %}\n{% endif %}\
{{ s.alias | quote }}: {{ s.value | quote }}{% endfor %}";

const JSON_TEMPLATE: &str = "{{ \"{\" }}{% for s in secrets_array %}{% if not loop.first %},{% endif %}\
{{ s.alias | quote }}:{{ s.value | quote }}{% endfor %}}";

const DOTENV_TEMPLATE: &str = "{% for s in secrets_array %}{% if not loop.first %}\n{% endif %}\
{{ s.alias }}={{ s.value | quote }}{% endfor %}";

const BASH_TEMPLATE: &str = "{% for s in secrets_array %}{% if not loop.first %}\n{% endif %}\
export {{ s.alias }}={{ s.value | quote }}{% endfor %}";

/// Output format of a secret group's file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
    Dotenv,
    Bash,
    /// User-supplied template
    Template,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unrecognized standard file format, \"{0}\"")]
pub struct UnknownFormat(pub String);

impl FromStr for FileFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yaml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "dotenv" => Ok(Self::Dotenv),
            "bash" => Ok(Self::Bash),
            "template" => Ok(Self::Template),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Alias rejected by a standard format
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AliasError {
    #[error("the key '{0}' is too long for YAML")]
    TooLongForYaml(String),
    #[error("invalid YAML character: '{0}'")]
    InvalidYamlChar(char),
    #[error("the key '{0}' is too long for JSON")]
    TooLongForJson(String),
    #[error("invalid JSON character: '{0}'")]
    InvalidJsonChar(char),
    #[error(
        "invalid alias {0:?}: variable names can only include alphanumerics and underscores, \
         with first char being a non-digit"
    )]
    InvalidVariableName(String),
}

impl FileFormat {
    /// File extension used for default file names
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Dotenv => "dotenv",
            Self::Bash => "bash",
            Self::Template => "template",
        }
    }

    /// Built-in template, `None` for [`FileFormat::Template`]
    #[must_use]
    pub fn standard_template(self) -> Option<&'static str> {
        match self {
            Self::Yaml => Some(YAML_TEMPLATE),
            Self::Json => Some(JSON_TEMPLATE),
            Self::Dotenv => Some(DOTENV_TEMPLATE),
            Self::Bash => Some(BASH_TEMPLATE),
            Self::Template => None,
        }
    }

    /// Check that `alias` can be expressed in this format
    pub fn validate_alias(self, alias: &str) -> Result<(), AliasError> {
        match self {
            Self::Yaml => validate_yaml_key(alias),
            Self::Json => validate_json_key(alias),
            Self::Dotenv | Self::Bash => validate_bash_var_name(alias),
            Self::Template => Ok(()),
        }
    }
}

/// Standard template for `format` after validating every alias in `specs`
///
/// Returns `Ok(None)` for [`FileFormat::Template`].
pub fn template_for_format(
    format: FileFormat,
    specs: &[SecretSpec],
) -> Result<Option<&'static str>, AliasError> {
    for spec in specs {
        format.validate_alias(&spec.alias)?;
    }
    Ok(format.standard_template())
}

fn validate_yaml_key(key: &str) -> Result<(), AliasError> {
    if key.len() > MAX_YAML_KEY_LEN {
        return Err(AliasError::TooLongForYaml(key.to_string()));
    }
    match key.chars().find(|c| !is_valid_yaml_char(*c)) {
        Some(c) => Err(AliasError::InvalidYamlChar(c)),
        None => Ok(()),
    }
}

/// YAML 1.2 printable character set
fn is_valid_yaml_char(c: char) -> bool {
    matches!(c,
        '\u{09}' | '\u{0A}' | '\u{0D}'
        | '\u{20}'..='\u{7E}'
        | '\u{85}'
        | '\u{A0}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

fn validate_json_key(key: &str) -> Result<(), AliasError> {
    if key.len() > MAX_JSON_KEY_LEN {
        return Err(AliasError::TooLongForJson(key.to_string()));
    }
    match key.chars().find(|c| !is_valid_json_char(*c)) {
        Some(c) => Err(AliasError::InvalidJsonChar(c)),
        None => Ok(()),
    }
}

fn is_valid_json_char(c: char) -> bool {
    !matches!(c, '\u{00}'..='\u{1F}' | '\u{7F}' | '"' | '\\')
}

fn validate_bash_var_name(name: &str) -> Result<(), AliasError> {
    if BASH_VAR_NAME.is_match(name) {
        Ok(())
    } else {
        Err(AliasError::InvalidVariableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(alias: &str) -> SecretSpec {
        SecretSpec {
            alias: alias.to_string(),
            path: format!("path/to/{alias}"),
        }
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!("yaml".parse::<FileFormat>().unwrap(), FileFormat::Yaml);
        assert_eq!("json".parse::<FileFormat>().unwrap(), FileFormat::Json);
        assert_eq!("dotenv".parse::<FileFormat>().unwrap(), FileFormat::Dotenv);
        assert_eq!("bash".parse::<FileFormat>().unwrap(), FileFormat::Bash);
        assert_eq!(
            "template".parse::<FileFormat>().unwrap(),
            FileFormat::Template
        );
        assert_eq!(
            "xml".parse::<FileFormat>().unwrap_err().to_string(),
            "unrecognized standard file format, \"xml\""
        );
    }

    #[test]
    fn test_yaml_aliases() {
        assert!(FileFormat::Yaml.validate_alias("db-password.v1 ünïcode").is_ok());
        assert!(FileFormat::Yaml.validate_alias("tab\there").is_ok());
        assert_eq!(
            FileFormat::Yaml.validate_alias("bell\u{07}"),
            Err(AliasError::InvalidYamlChar('\u{07}'))
        );
        // C1 control other than NEL
        assert!(FileFormat::Yaml.validate_alias("c1\u{90}").is_err());
        assert!(FileFormat::Yaml.validate_alias("nel\u{85}").is_ok());
        assert!(FileFormat::Yaml.validate_alias("\u{FFFE}").is_err());
        assert!(FileFormat::Yaml.validate_alias("\u{1F600}").is_ok());

        let long = "a".repeat(1025);
        assert!(matches!(
            FileFormat::Yaml.validate_alias(&long),
            Err(AliasError::TooLongForYaml(_))
        ));
        assert!(FileFormat::Yaml.validate_alias(&"a".repeat(1024)).is_ok());
    }

    #[test]
    fn test_json_aliases() {
        assert!(FileFormat::Json.validate_alias("any thing: goes/here").is_ok());
        assert_eq!(
            FileFormat::Json.validate_alias("quote\"d"),
            Err(AliasError::InvalidJsonChar('"'))
        );
        assert_eq!(
            FileFormat::Json.validate_alias("back\\slash"),
            Err(AliasError::InvalidJsonChar('\\'))
        );
        assert!(FileFormat::Json.validate_alias("del\u{7F}").is_err());
        assert!(FileFormat::Json.validate_alias("nl\n").is_err());

        let long = "a".repeat(2_097_153);
        assert!(matches!(
            FileFormat::Json.validate_alias(&long),
            Err(AliasError::TooLongForJson(_))
        ));
    }

    #[test]
    fn test_bash_and_dotenv_aliases() {
        for format in [FileFormat::Bash, FileFormat::Dotenv] {
            assert!(format.validate_alias("DB_PASSWORD").is_ok());
            assert!(format.validate_alias("_private1").is_ok());
            assert!(format.validate_alias("1starts_with_digit").is_err());
            assert!(format.validate_alias("has-dash").is_err());
            assert!(format.validate_alias("").is_err());
        }
        let err = FileFormat::Bash.validate_alias("a.b").unwrap_err();
        assert!(err
            .to_string()
            .contains("can only include alphanumerics and underscores"));
    }

    #[test]
    fn test_template_for_format_validates_every_alias() {
        let specs = vec![spec("good"), spec("bad\"alias")];
        assert!(template_for_format(FileFormat::Yaml, &specs)
            .unwrap()
            .is_some());
        assert!(template_for_format(FileFormat::Json, &specs).is_err());
        assert_eq!(
            template_for_format(FileFormat::Template, &specs).unwrap(),
            None
        );
    }
}
