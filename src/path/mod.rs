//! `$`-rooted paths over [`Value`] trees.
//!
//! ```text
//! Path    := "$" Segment*
//! Segment := "." Key | "[" Integer "]"
//! Key     := any run of characters other than '.' and '['
//! ```
//!
//! A path is tokenized once, when it is parsed, and can then be evaluated
//! against any number of values. An empty key (`$..a`) is skipped.
//!
//! # Examples
//!
//! ```ignore
//! use iotdatatunnel::{json, path::Path};
//!
//! let value = json::parse(r#"{"sensor":[{"value":39}]}"#)?;
//! let path: Path = "$.sensor[0].value".parse()?;
//! assert_eq!(path.evaluate(&value), Some(&json::Value::from(39)));
//! ```

use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::json::Value;

pub mod filter;

pub use filter::{Extraction, FromValue, MessageFilter, PathFilter};

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    Key(String),
    Index(usize),
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Key(key) => write!(f, ".{key}"),
            PathToken::Index(index) => write!(f, "[{index}]"),
        }
    }
}

/// Malformed path text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path must start with '$'")]
    MissingRoot,

    #[error("invalid index '{index}' at position {position}")]
    InvalidIndex { index: String, position: usize },

    #[error("unterminated index at position {0}")]
    UnterminatedIndex(usize),

    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
}

/// A tokenized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    raw: String,
    tokens: Vec<PathToken>,
}

impl Path {
    /// Tokenizes `raw`.
    ///
    /// # Errors
    /// [`PathError`] when the text does not follow the path grammar.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let rest = raw.strip_prefix('$').ok_or(PathError::MissingRoot)?;
        let mut tokens = Vec::new();
        let mut chars = rest.char_indices().peekable();

        while let Some((offset, ch)) = chars.next() {
            let position = offset + 1;
            match ch {
                '.' => {
                    let mut key = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if c == '.' || c == '[' {
                            break;
                        }
                        key.push(c);
                        chars.next();
                    }
                    if !key.is_empty() {
                        tokens.push(PathToken::Key(key));
                    }
                }
                '[' => {
                    let mut index = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        index.push(c);
                    }
                    if !closed {
                        return Err(PathError::UnterminatedIndex(position));
                    }
                    let parsed = index
                        .parse::<usize>()
                        .map_err(|_| PathError::InvalidIndex { index, position })?;
                    tokens.push(PathToken::Index(parsed));
                }
                other => {
                    return Err(PathError::UnexpectedChar {
                        ch: other,
                        position,
                    })
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.tokens
    }

    /// The text the path was parsed from.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks `root` left to right. `None` as soon as a key is missing, an
    /// index is out of range, or a step meets the wrong kind of node. A
    /// `null` at the end of the path is absent too.
    pub fn evaluate<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.tokens
            .iter()
            .try_fold(root, |current, token| match token {
                PathToken::Key(key) => current.get(key),
                PathToken::Index(index) => current.at(*index),
            })
            .filter(|found| !found.is_null())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Path::parse(s)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json;

    fn tokens(raw: &str) -> Vec<PathToken> {
        Path::parse(raw).unwrap().tokens().to_vec()
    }

    #[test]
    fn test_tokenizes_keys_and_indices() {
        assert_eq!(
            tokens("$.sensor[0].value"),
            vec![
                PathToken::Key("sensor".into()),
                PathToken::Index(0),
                PathToken::Key("value".into()),
            ]
        );
        assert_eq!(tokens("$[1][2]"), vec![PathToken::Index(1), PathToken::Index(2)]);
        assert_eq!(tokens("$..a"), vec![PathToken::Key("a".into())]);
        assert_eq!(tokens("$.a-b c"), vec![PathToken::Key("a-b c".into())]);
        assert!(tokens("$").is_empty());
    }

    #[test]
    fn test_rejects_malformed_paths() {
        assert_eq!(Path::parse("a.b"), Err(PathError::MissingRoot));
        assert_eq!(Path::parse(""), Err(PathError::MissingRoot));
        assert_eq!(Path::parse("$[0"), Err(PathError::UnterminatedIndex(1)));
        assert!(matches!(
            Path::parse("$.a[x]"),
            Err(PathError::InvalidIndex { position: 3, .. })
        ));
        assert!(matches!(
            Path::parse("$[-1]"),
            Err(PathError::InvalidIndex { .. })
        ));
        assert!(matches!(
            Path::parse("$[ 2 ]"),
            Err(PathError::InvalidIndex { position: 1, .. })
        ));
        assert_eq!(
            Path::parse("$x"),
            Err(PathError::UnexpectedChar { ch: 'x', position: 1 })
        );
    }

    #[test]
    fn test_root_path_returns_the_value_itself() {
        let value = json::parse(r#"{"a":[1,2]}"#).unwrap();
        let root = Path::parse("$").unwrap();
        assert_eq!(root.evaluate(&value), Some(&value));
    }

    #[test]
    fn test_evaluate_misses() {
        let value = json::parse(r#"{"a":[{"b":1}],"s":"x"}"#).unwrap();
        let eval = |raw: &str| Path::parse(raw).unwrap().evaluate(&value).cloned();

        assert_eq!(eval("$.a[0].b"), Some(json::Value::from(1)));
        assert_eq!(eval("$.a[1].b"), None);
        assert_eq!(eval("$.missing"), None);
        assert_eq!(eval("$[0]"), None);
        assert_eq!(eval("$.s.len"), None);
        assert_eq!(eval("$.a.b"), None);
    }

    #[test]
    fn test_null_leaf_is_absent() {
        let value = json::parse(r#"{"n":null,"list":[null,1]}"#).unwrap();
        let eval = |raw: &str| Path::parse(raw).unwrap().evaluate(&value).cloned();

        assert_eq!(eval("$.n"), None);
        assert_eq!(eval("$.n.deeper"), None);
        assert_eq!(eval("$.list[0]"), None);
        assert_eq!(eval("$.list[1]"), Some(json::Value::from(1)));
    }

    #[test]
    fn test_display_keeps_source_text() {
        let path: Path = "$.a[3]".parse().unwrap();
        assert_eq!(path.to_string(), "$.a[3]");
        let rebuilt: String = path.tokens().iter().map(ToString::to_string).collect();
        assert_eq!(format!("${rebuilt}"), "$.a[3]");
    }
}
