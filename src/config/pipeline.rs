//! `[pipeline]` section: how buffered messages are drained and which rules
//! run against them.
//!
//! ```toml
//! [pipeline]
//! poll_interval_ms = 500
//!
//! [[pipeline.rules]]
//! name = "temperature"
//! topic = "sensors/+/telemetry"
//! predicates = [{ path = "$.sensor[0].type", equals = "temp" }]
//! extract = ["$.sensor[0].value"]
//! target = "f64"
//! ```

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{json::Value, path::PathFilter};

/// A primitive literal a predicate compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<Literal> for Value {
    fn from(literal: Literal) -> Self {
        match literal {
            Literal::Bool(b) => Value::from(b),
            Literal::Int(i) => Value::from(i),
            Literal::Float(f) => Value::from(f),
            Literal::Text(s) => Value::from(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateConfig {
    pub path: String,
    pub equals: Literal,
}

/// Type the extracted value is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Bool,
    String,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    #[default]
    Value,
}

/// One filter/extract rule.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RuleConfig {
    #[validate(length(min = 1, message = "Rule name must not be empty"))]
    pub name: String,

    /// Topic filter (MQTT wildcards allowed). All topics when absent.
    #[serde(default)]
    pub topic: Option<String>,

    #[serde(default)]
    pub predicates: Vec<PredicateConfig>,

    #[validate(length(min = 1, message = "A rule needs at least one extract path"))]
    pub extract: Vec<String>,

    #[serde(default)]
    pub target: TargetKind,
}

impl RuleConfig {
    /// Compiles the predicates and extraction paths.
    pub fn to_filter(&self) -> PathFilter {
        let filter = self
            .predicates
            .iter()
            .fold(PathFilter::new(), |filter, predicate| {
                filter.predicate(&predicate.path, predicate.equals.clone())
            });
        self.extract
            .iter()
            .fold(filter, |filter, path| filter.extract(path))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pause between buffer drains, in milliseconds.
    #[validate(range(min = 10, message = "Poll interval must be at least 10 ms"))]
    pub poll_interval_ms: u64,

    /// Upper bound on messages handled per drain.
    #[validate(range(min = 1, message = "Batch size must be at least 1"))]
    pub batch_size: usize,

    #[validate(nested)]
    pub rules: Vec<RuleConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 256,
            rules: Vec::new(),
        }
    }
}
