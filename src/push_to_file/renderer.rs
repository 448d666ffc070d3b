//! # Template Renderer
//!
//! Renders a secret group's values through a template (Jinja syntax).
//!
//! Templates see:
//!
//! - `secrets_array`: the group's secrets in spec order, each with `alias` and `value`
//! - `secrets_map`: the same secrets keyed by alias
//!
//! and may call `secret(alias)`, `b64enc(value)` and `b64dec(value)`. The
//! latter two and `quote` are also available as filters.
//!
//! Templates execute with real secret values, so every failure is reported
//! as a [`RenderError`] carrying only the group name and a failure kind. The
//! underlying engine message, which may quote values or template input, is
//! never surfaced.

use super::fetch::Secret;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use minijinja::value::Value;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, State, UndefinedBehavior};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;
use unicode_properties::{GeneralCategoryGroup, UnicodeGeneralCategory};
use zeroize::Zeroizing;

// Details attached to engine errors raised by our own functions
const ALIAS_NOT_FOUND: &str = "secret alias not present in specified secrets for group";
const DECODE_FAILURE: &str = "value could not be base64 decoded";

/// Why a render failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    /// `secret(alias)` named an alias the group does not define
    AliasNotFound,
    /// `b64dec` received input that is not valid base64
    DecodeFailure,
    /// The template could not be parsed
    Syntax { line: Option<usize> },
    /// Any other failure while executing the template
    Execution,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to execute template, with secret values, on push to file for secret group {group:?}: {}", describe(.kind))]
pub struct RenderError {
    pub group: String,
    pub kind: RenderErrorKind,
}

fn describe(kind: &RenderErrorKind) -> String {
    match kind {
        RenderErrorKind::AliasNotFound => ALIAS_NOT_FOUND.to_string(),
        RenderErrorKind::DecodeFailure => DECODE_FAILURE.to_string(),
        RenderErrorKind::Syntax { line: Some(line) } => format!("template syntax error on line {line}"),
        RenderErrorKind::Syntax { line: None } => "template syntax error".to_string(),
        RenderErrorKind::Execution => "template execution error".to_string(),
    }
}

#[derive(Serialize)]
struct TemplateSecret<'a> {
    alias: &'a str,
    value: &'a str,
}

/// Render `template` for `group` with `secrets`
pub fn render(
    group: &str,
    template: &str,
    secrets: &[Secret],
) -> Result<Zeroizing<String>, RenderError> {
    let fail = |err: &Error| RenderError {
        group: group.to_string(),
        kind: classify(err),
    };

    let secrets_array: Vec<TemplateSecret<'_>> = secrets
        .iter()
        .map(|s| TemplateSecret {
            alias: &s.alias,
            value: &s.value,
        })
        .collect();
    let secrets_map: BTreeMap<&str, TemplateSecret<'_>> = secrets
        .iter()
        .map(|s| {
            (
                s.alias.as_str(),
                TemplateSecret {
                    alias: &s.alias,
                    value: &s.value,
                },
            )
        })
        .collect();

    environment()
        .render_str(template, minijinja::context! { secrets_array, secrets_map })
        .map(Zeroizing::new)
        .map_err(|e| fail(&e))
}

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::None);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);

    env.add_function("secret", secret);
    env.add_function("b64enc", b64enc);
    env.add_function("b64dec", b64dec);
    env.add_filter("b64enc", b64enc);
    env.add_filter("b64dec", b64dec);
    env.add_filter("quote", quote);
    env
}

fn classify(err: &Error) -> RenderErrorKind {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(engine_err) = e.downcast_ref::<Error>() {
            match engine_err.detail() {
                Some(ALIAS_NOT_FOUND) => return RenderErrorKind::AliasNotFound,
                Some(DECODE_FAILURE) => return RenderErrorKind::DecodeFailure,
                _ => {}
            }
        }
        current = e.source();
    }

    if err.kind() == ErrorKind::SyntaxError {
        RenderErrorKind::Syntax { line: err.line() }
    } else {
        RenderErrorKind::Execution
    }
}

/// `secret(alias)`: value of the group secret named `alias`
fn secret(state: &State, alias: &str) -> Result<Value, Error> {
    state
        .lookup("secrets_map")
        .and_then(|map| map.get_attr(alias).ok())
        .filter(|entry| !entry.is_undefined() && !entry.is_none())
        .and_then(|entry| entry.get_attr("value").ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, ALIAS_NOT_FOUND))
}

fn b64enc(value: &str) -> String {
    STANDARD.encode(value)
}

fn b64dec(value: &str) -> Result<String, Error> {
    STANDARD
        .decode(value)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidOperation, DECODE_FAILURE))
}

/// Double-quote `value` with backslash escapes
///
/// Backslash and double quote are escaped, common control characters use
/// their short escapes. Any other non-printable character is written as
/// `\xNN` below U+0080, `\uNNNN` in the BMP and `\UNNNNNNNN` above it.
/// Printable means a letter, mark, number, punctuation, symbol or the ASCII
/// space.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0B}' => out.push_str("\\v"),
            c if c < ' ' || c == '\u{7F}' => {
                let _ = write!(out, "\\x{:02x}", u32::from(c));
            }
            c if is_printable(c) => out.push(c),
            c if u32::from(c) < 0x1_0000 => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => {
                let _ = write!(out, "\\U{:08x}", u32::from(c));
            }
        }
    }
    out.push('"');
    out
}

fn is_printable(c: char) -> bool {
    c == ' '
        || matches!(
            c.general_category_group(),
            GeneralCategoryGroup::Letter
                | GeneralCategoryGroup::Mark
                | GeneralCategoryGroup::Number
                | GeneralCategoryGroup::Punctuation
                | GeneralCategoryGroup::Symbol
        )
}
