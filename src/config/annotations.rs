//! # Annotations File
//!
//! Reads the pod annotations that the Downward API projects into a volume.
//! Each line has the form `key="value"`, where the value is a double-quoted
//! string with backslash escapes (`\n`, `\"`, `\\`, `\t`, `\uXXXX`, ...).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AnnotationsError {
    #[error("failed to read annotations file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("annotations file line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Parse the annotations file at `path`
pub fn read_annotations_file(path: &Path) -> Result<HashMap<String, String>, AnnotationsError> {
    let contents = std::fs::read_to_string(path).map_err(|source| AnnotationsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let annotations = parse_annotations(&contents)?;
    debug!(path = %path.display(), count = annotations.len(), "Read pod annotations");
    Ok(annotations)
}

/// Parse Downward API annotation lines
///
/// Blank lines are skipped. A repeated key keeps its last value.
pub fn parse_annotations(contents: &str) -> Result<HashMap<String, String>, AnnotationsError> {
    let mut annotations = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let line_number = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let malformed = |reason: &str| AnnotationsError::Malformed {
            line: line_number,
            reason: reason.to_string(),
        };

        let (key, quoted) = line
            .split_once('=')
            .ok_or_else(|| malformed("expected key=\"value\""))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed("empty annotation key"));
        }
        let value = unquote(quoted.trim()).map_err(|reason| malformed(&reason))?;
        annotations.insert(key.to_string(), value);
    }
    Ok(annotations)
}

/// Undo double-quote escaping of an annotation value
fn unquote(quoted: &str) -> Result<String, String> {
    let inner = quoted
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| quoted.len() >= 2)
        .ok_or_else(|| "value must be enclosed in double quotes".to_string())?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let escaped = chars
                    .next()
                    .ok_or_else(|| "dangling escape at end of value".to_string())?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'a' => out.push('\u{07}'),
                    'b' => out.push('\u{08}'),
                    'f' => out.push('\u{0C}'),
                    'v' => out.push('\u{0B}'),
                    '\\' => out.push('\\'),
                    '"' => out.push('"'),
                    '\'' => out.push('\''),
                    'x' => out.push(hex_char(&mut chars, 2)?),
                    'u' => out.push(hex_char(&mut chars, 4)?),
                    'U' => out.push(hex_char(&mut chars, 8)?),
                    other => return Err(format!("unknown escape sequence \\{other}")),
                }
            }
            '"' => return Err("unescaped quote inside value".to_string()),
            other => out.push(other),
        }
    }
    Ok(out)
}

fn hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Result<char, String> {
    let hex: String = chars.by_ref().take(digits).collect();
    if hex.len() != digits {
        return Err("truncated hex escape".to_string());
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| format!("invalid hex escape {hex:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_annotations() {
        let contents = concat!(
            "conjur.org/container-mode=\"sidecar\"\n",
            "\n",
            "conjur.org/conjur-secrets.cache=\"- url: policy/url\\n- policy/password\\n\"\n",
            "conjur.org/secret-file-template.cache=\"{{ secret(\\\"url\\\") }}\"\n",
            "kubernetes.io/config.seen=\"2024-01-01T00:00:00Z\"\n",
        );
        let annotations = parse_annotations(contents).unwrap();

        assert_eq!(annotations.len(), 4);
        assert_eq!(annotations["conjur.org/container-mode"], "sidecar");
        assert_eq!(
            annotations["conjur.org/conjur-secrets.cache"],
            "- url: policy/url\n- policy/password\n"
        );
        assert_eq!(
            annotations["conjur.org/secret-file-template.cache"],
            "{{ secret(\"url\") }}"
        );
    }

    #[test]
    fn test_unicode_escapes() {
        let annotations = parse_annotations("a=\"caf\\u00e9 \\x41\"").unwrap();
        assert_eq!(annotations["a"], "café A");
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let err = parse_annotations("a=\"ok\"\nb=unquoted\n").unwrap_err();
        match err {
            AnnotationsError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_annotations("no-equals-sign").is_err());
        assert!(parse_annotations("a=\"dangling\\\"").is_err());
        assert!(parse_annotations("a=\"bad \\q escape\"").is_err());
        assert!(parse_annotations("=\"no key\"").is_err());
    }

    #[test]
    fn test_read_annotations_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "conjur.org/secrets-destination=\"file\"").unwrap();

        let annotations = read_annotations_file(file.path()).unwrap();
        assert_eq!(annotations["conjur.org/secrets-destination"], "file");

        let missing = read_annotations_file(Path::new("/nonexistent/annotations"));
        assert!(matches!(missing, Err(AnnotationsError::Read { .. })));
    }
}
