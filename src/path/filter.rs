//! Predicate-and-extract filtering of payload text.
//!
//! A [`PathFilter`] holds equality predicates and extraction paths. For each
//! message it parses the text once, checks every predicate in declaration
//! order, then tries the extraction paths in declaration order and returns
//! the first value that converts to the requested type.
//!
//! # Comparison
//!
//! Number against number compares as `f64`, so `1`, `1.0` and `1i64` are all
//! equal. Any other pairing compares exactly: the string `"12"` never equals
//! the number `12`.
//!
//! # Conversion
//!
//! An extracted value of the requested kind is returned as-is. A number
//! requested as another numeric type goes through an `as` cast. Anything
//! else is skipped and the next extraction path is tried.
//!
//! # Examples
//!
//! ```ignore
//! use iotdatatunnel::path::PathFilter;
//!
//! let filter = PathFilter::new()
//!     .predicate("$.companyCode", "0012")
//!     .predicate("$.sensor[0].type", "temp")
//!     .extract("$.sensor[0].value");
//!
//! let temperature: Option<i32> = filter.extract_first(payload);
//! ```

use tracing::{debug, trace};

use super::{Path, PathError};
use crate::json::{self, Number, ParseError, Value};

/// Outcome of evaluating a filter against one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    /// Every predicate held and an extraction path produced a value.
    Found(T),

    /// A predicate failed, or no extraction path produced a convertible
    /// value.
    NotFound,

    /// The message text could not be parsed.
    ParseFailed(ParseError),
}

impl<T> Extraction<T> {
    /// The found value, discarding why there is none otherwise.
    pub fn found(self) -> Option<T> {
        match self {
            Extraction::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Extraction::Found(_))
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Extraction<U> {
        match self {
            Extraction::Found(value) => Extraction::Found(f(value)),
            Extraction::NotFound => Extraction::NotFound,
            Extraction::ParseFailed(err) => Extraction::ParseFailed(err),
        }
    }
}

/// Types an extracted [`Value`] can be adapted to.
pub trait FromValue: Sized {
    /// `None` when the value cannot be adapted.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

macro_rules! impl_from_value_numeric {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Option<Self> {
                    value.as_number().map(|number| match number {
                        Number::Int(i) => i as $ty,
                        Number::Float(f) => f as $ty,
                    })
                }
            }
        )*
    };
}

impl_from_value_numeric!(i8, i16, i32, i64, f32, f64);

#[derive(Debug, Clone)]
struct Predicate {
    path: Result<Path, PathError>,
    expected: Value,
}

/// Reusable filter: predicates plus ordered extraction paths.
///
/// Immutable once built and safe to share across threads; each evaluation
/// works on its own parsed value.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    predicates: Vec<Predicate>,
    extractions: Vec<Result<Path, PathError>>,
}

impl PathFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a filter to one message for a single-shot extraction.
    pub fn for_message(message: impl Into<String>) -> MessageFilter {
        MessageFilter {
            message: message.into(),
            filter: PathFilter::new(),
        }
    }

    /// Requires the value at `path` to equal `expected`.
    ///
    /// A malformed path never matches.
    pub fn predicate(mut self, path: &str, expected: impl Into<Value>) -> Self {
        self.predicates.push(Predicate {
            path: compile(path),
            expected: expected.into(),
        });
        self
    }

    /// Adds an extraction path, tried after all earlier ones.
    ///
    /// A malformed path never yields a value.
    pub fn extract(mut self, path: &str) -> Self {
        self.extractions.push(compile(path));
        self
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn extraction_count(&self) -> usize {
        self.extractions.len()
    }

    /// Parses `message` and evaluates the filter against it.
    pub fn evaluate<T: FromValue>(&self, message: &str) -> Extraction<T> {
        match json::parse(message) {
            Ok(root) => match self.evaluate_parsed(&root) {
                Some(value) => Extraction::Found(value),
                None => Extraction::NotFound,
            },
            Err(err) => {
                trace!("Payload is not parseable: {}", err);
                Extraction::ParseFailed(err)
            }
        }
    }

    /// Like [`evaluate`](Self::evaluate), folding a parse failure into
    /// `None`.
    pub fn extract_first<T: FromValue>(&self, message: &str) -> Option<T> {
        self.evaluate(message).found()
    }

    /// Evaluates an already parsed message. Lets several filters share one
    /// parse.
    pub fn evaluate_parsed<T: FromValue>(&self, root: &Value) -> Option<T> {
        if !self.matches_parsed(root) {
            return None;
        }
        self.extractions
            .iter()
            .filter_map(|path| path.as_ref().ok())
            .filter_map(|path| path.evaluate(root))
            .find_map(T::from_value)
    }

    /// Whether every predicate holds for `root`. True when there are none.
    pub fn matches_parsed(&self, root: &Value) -> bool {
        self.predicates.iter().all(|predicate| {
            let Ok(path) = &predicate.path else {
                return false;
            };
            path.evaluate(root)
                .is_some_and(|actual| values_match(actual, &predicate.expected))
        })
    }

    /// Parses `message` and checks the predicates only.
    pub fn matches(&self, message: &str) -> bool {
        json::parse(message).is_ok_and(|root| self.matches_parsed(&root))
    }
}

/// [`PathFilter`] bound to a single message.
#[derive(Debug, Clone)]
pub struct MessageFilter {
    message: String,
    filter: PathFilter,
}

impl MessageFilter {
    pub fn predicate(mut self, path: &str, expected: impl Into<Value>) -> Self {
        self.filter = self.filter.predicate(path, expected);
        self
    }

    pub fn extract(mut self, path: &str) -> Self {
        self.filter = self.filter.extract(path);
        self
    }

    pub fn evaluate<T: FromValue>(&self) -> Extraction<T> {
        self.filter.evaluate(&self.message)
    }

    pub fn extract_first<T: FromValue>(&self) -> Option<T> {
        self.filter.extract_first(&self.message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn compile(raw: &str) -> Result<Path, PathError> {
    Path::parse(raw).inspect_err(|e| debug!("Path '{}' never matches: {}", raw, e))
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    const MESSAGE: &str = r#"
        {
          "id":1,
          "gateways":[{"id":1},{"id":2}],
          "companyCode":"0012",
          "sensor":[
            {"type":"temp","value":39},
            {"type":"airFlow","value":12},
            {"type":"humidity","value":57}
          ]
        }
    "#;

    #[test]
    fn test_extracts_when_all_predicates_hold() {
        let value = PathFilter::for_message(MESSAGE)
            .predicate("$.id", 1)
            .predicate("$.gateways[0].id", 1)
            .predicate("$.companyCode", "0012")
            .extract("$.sensor[0].value")
            .extract_first::<i32>();

        assert_eq!(value, Some(39));
    }

    #[test]
    fn test_failed_predicate_is_not_found() {
        let filter = PathFilter::new()
            .predicate("$.id", 2)
            .extract("$.sensor[0].value");

        assert_eq!(filter.evaluate::<i32>(MESSAGE), Extraction::NotFound);
        assert_eq!(filter.extract_first::<i32>(MESSAGE), None);
    }

    #[test]
    fn test_array_root() {
        let message = r#"[{"id":1,"value":10},{"id":2,"value":20}]"#;
        let value = PathFilter::for_message(message)
            .predicate("$[0].id", 1)
            .extract("$[1].value")
            .extract_first::<i32>();

        assert_eq!(value, Some(20));
    }

    #[test]
    fn test_nested_array_predicate() {
        let value = PathFilter::for_message(MESSAGE)
            .predicate("$.sensor[1].type", "airFlow")
            .extract("$.sensor[1].value")
            .extract_first::<i32>();

        assert_eq!(value, Some(12));
    }

    #[test]
    fn test_bool_extraction() {
        let value = PathFilter::for_message(r#"{"active":true,"count":5}"#)
            .predicate("$.count", 5)
            .extract("$.active")
            .extract_first::<bool>();

        assert_eq!(value, Some(true));
    }

    #[test]
    fn test_numeric_predicates_compare_across_kinds() {
        let value = PathFilter::for_message(MESSAGE)
            .predicate("$.id", 1i64)
            .predicate("$.gateways[1].id", 2.0)
            .extract("$.sensor[0].value")
            .extract_first::<f64>();

        assert_eq!(value, Some(39.0));
    }

    #[test]
    fn test_numeric_conversion_to_target() {
        let filter = PathFilter::new().extract("$.sensor[0].value");
        assert_eq!(filter.extract_first::<i64>(MESSAGE), Some(39));
        assert_eq!(filter.extract_first::<f32>(MESSAGE), Some(39.0));
        assert_eq!(filter.extract_first::<i8>(MESSAGE), Some(39));

        let truncated = PathFilter::new()
            .extract("$.t")
            .extract_first::<i16>(r#"{"t":21.9}"#);
        assert_eq!(truncated, Some(21));
    }

    #[test]
    fn test_no_coercion_between_strings_and_numbers() {
        let filter = PathFilter::new()
            .predicate("$.companyCode", 12)
            .extract("$.id");
        assert_eq!(filter.extract_first::<i32>(MESSAGE), None);

        let as_string = PathFilter::new()
            .extract("$.id")
            .extract_first::<String>(MESSAGE);
        assert_eq!(as_string, None);
    }

    #[test]
    fn test_extraction_falls_through_to_next_convertible_path() {
        let filter = PathFilter::new()
            .extract("$.missing")
            .extract("$.sensor[0].type")
            .extract("$.sensor[2].value");

        assert_eq!(filter.extract_first::<i32>(MESSAGE), Some(57));
        assert_eq!(filter.extract_first::<String>(MESSAGE), Some("temp".into()));
    }

    #[test]
    fn test_malformed_payload() {
        let filter = PathFilter::new().extract("$.id");
        assert!(matches!(
            filter.evaluate::<i32>(r#"{"id":"#),
            Extraction::ParseFailed(_)
        ));
        assert_eq!(filter.extract_first::<i32>("not json"), None);
        assert!(!filter.matches(""));
    }

    #[test]
    fn test_malformed_paths_never_match() {
        let bad_predicate = PathFilter::new()
            .predicate("id", 1)
            .extract("$.id");
        assert_eq!(bad_predicate.extract_first::<i32>(MESSAGE), None);

        let bad_extraction = PathFilter::new()
            .extract("$.sensor[x].value")
            .extract("$.id");
        assert_eq!(bad_extraction.extract_first::<i32>(MESSAGE), Some(1));
    }

    #[test]
    fn test_whole_value_and_predicates_only() {
        let filter = PathFilter::new().predicate("$.id", 1).extract("$");
        let root = filter.extract_first::<Value>(MESSAGE).unwrap();
        assert_eq!(root, json::parse(MESSAGE).unwrap());

        let no_extraction = PathFilter::new().predicate("$.id", 1);
        assert!(no_extraction.matches(MESSAGE));
        assert_eq!(no_extraction.evaluate::<i32>(MESSAGE), Extraction::NotFound);
    }

    #[test]
    fn test_null_field_is_absent() {
        let message = r#"{"v":null}"#;
        assert!(!PathFilter::new().predicate("$.v", Value::Null).matches(message));
        assert!(!PathFilter::new().predicate("$.v", false).matches(message));
        assert_eq!(
            PathFilter::new().extract("$.v").evaluate::<Value>(message),
            Extraction::NotFound
        );
    }

    #[test]
    fn test_null_extraction_falls_through_to_next_path() {
        let filter = PathFilter::new().extract("$.a").extract("$.b");
        assert_eq!(
            filter.extract_first::<Value>(r#"{"a":null,"b":7}"#),
            Some(Value::from(7))
        );
        assert_eq!(filter.extract_first::<i64>(r#"{"a":null,"b":7}"#), Some(7));
    }

    #[test]
    fn test_shared_across_threads() {
        let filter = Arc::new(
            PathFilter::new()
                .predicate("$.type", "temp")
                .extract("$.value"),
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let filter = filter.clone();
                thread::spawn(move || {
                    let message = format!(r#"{{"type":"temp","value":{i}}}"#);
                    filter.extract_first::<i64>(&message)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec![Some(0), Some(1), Some(2), Some(3)]);
    }
}
