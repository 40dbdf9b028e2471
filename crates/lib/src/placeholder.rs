//! Placeholder parsing and substitution for overlay argument templates.
//!
//! Overlay manifests declare argument templates that reference values only
//! known once the provisioning configuration is chosen, such as the flash
//! board configuration name. This module parses those templates and
//! substitutes resolved values.
//!
//! # Placeholder Format
//!
//! - `<KEY>` - value of `KEY` in the active key map
//!
//! A key is one or more ASCII letters, digits, `_` or `-`. Any other use of
//! `<` or `>` passes through unchanged, so shell redirections like
//! `2>/dev/null` or comparisons like `a < b` need no escaping.
//!
//! # Example
//!
//! ```
//! use dcs_deploy_lib::placeholder::{parse, Segment};
//!
//! let segments = parse("--board=<BOARD>").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("--board=".to_string()),
//!     Segment::Placeholder("BOARD".to_string()),
//! ]);
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  /// Literal text (no placeholders)
  Literal(String),

  /// A key to be resolved
  Placeholder(String),
}

/// Errors that can occur during placeholder resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PlaceholderError {
  #[error("unmapped placeholder <{0}>")]
  Unmapped(String),
}

/// Trait for resolving placeholder values.
pub trait Resolver {
  /// Resolve a key to its value.
  fn resolve(&self, key: &str) -> Result<&str, PlaceholderError>;
}

/// Runtime substitution table for argument templates.
///
/// Keys are matched exactly and case-sensitively.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMap(BTreeMap<String, String>);

impl KeyMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.0.insert(key.into(), value.into());
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl Resolver for KeyMap {
  fn resolve(&self, key: &str) -> Result<&str, PlaceholderError> {
    self.get(key).ok_or_else(|| PlaceholderError::Unmapped(key.to_string()))
  }
}

fn is_key_char(c: char) -> bool {
  c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parse a template into literal and placeholder segments.
///
/// Parsing never fails: text that does not form a `<KEY>` token is literal.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut rest = input;

  while let Some(open) = rest.find('<') {
    literal.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let key_len = after.find(|c: char| !is_key_char(c)).unwrap_or(after.len());

    if key_len > 0 && after[key_len..].starts_with('>') {
      if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(&mut literal)));
      }
      segments.push(Segment::Placeholder(after[..key_len].to_string()));
      rest = &after[key_len + 1..];
    } else {
      // Not a placeholder, keep the '<' and continue after it
      literal.push('<');
      rest = after;
    }
  }

  literal.push_str(rest);
  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Substitute all placeholders in a string using the provided resolver.
pub fn substitute(input: &str, resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let segments = parse(input)?;
  substitute_segments(&segments, resolver)
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &impl Resolver) -> Result<String, PlaceholderError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(key) => result.push_str(resolver.resolve(key)?),
    }
  }

  Ok(result)
}

/// Keys referenced by a template, in order of appearance.
pub fn referenced_keys(input: &str) -> Vec<String> {
  parse(input)
    .unwrap_or_default()
    .into_iter()
    .filter_map(|segment| match segment {
      Segment::Placeholder(key) => Some(key),
      Segment::Literal(_) => None,
    })
    .collect()
}
