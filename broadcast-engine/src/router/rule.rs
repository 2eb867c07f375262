//! Routing rule declarations (§4.2, §3 RoutingRule).

use crate::priority::Priority;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// How a matched rule's destinations are resolved into recipients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    BroadcastAll,
    ContentBased,
    PriorityFirst,
    LoadBalanced,
}

/// A single content-filter predicate evaluated against `event_data[field]`.
///
/// Maps the source's duck-typed filter dict onto a closed set of variants —
/// see DESIGN.md for why arbitrary callables aren't carried over.
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(Value),
    RangeMinMax { min: Option<f64>, max: Option<f64> },
    Contains(String),
    In(Vec<Value>),
}

impl Predicate {
    /// Evaluate against the field's actual value. Returns `false` on any
    /// type mismatch rather than erroring — callers count the rule as
    /// non-matching, never a hard failure.
    fn evaluate(&self, actual: &Value) -> bool {
        match self {
            Predicate::Equals(expected) => actual == expected,
            Predicate::RangeMinMax { min, max } => {
                let Some(n) = actual.as_f64() else { return false };
                min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m)
            }
            Predicate::Contains(alternation) => {
                let Some(s) = actual.as_str() else { return false };
                alternation.split('|').any(|alt| s.contains(alt))
            }
            Predicate::In(values) => values.contains(actual),
        }
    }
}

/// A built-in content transform, applied after a rule matches and before
/// delivery. Errors are counted and swallowed — the event is delivered
/// unchanged (§7 `TransformFailure`).
#[derive(Debug, Clone)]
pub enum ContentTransformer {
    /// Insert a constant field, e.g. tagging the event with the rule id.
    AddField { key: String, value: Value },
    /// Rename a top-level field, dropping the original key.
    RenameField { from: String, to: String },
}

impl ContentTransformer {
    fn apply(&self, data: &Value) -> Option<Value> {
        let mut obj = data.as_object()?.clone();
        match self {
            ContentTransformer::AddField { key, value } => {
                obj.insert(key.clone(), value.clone());
            }
            ContentTransformer::RenameField { from, to } => {
                let value = obj.remove(from)?;
                obj.insert(to.clone(), value);
            }
        }
        Some(Value::Object(obj))
    }
}

pub struct RoutingRule {
    pub rule_id: String,
    pub priority: Priority,
    event_type_patterns: Vec<Result<Regex, String>>,
    pub content_filters: HashMap<String, Predicate>,
    pub user_criteria: HashMap<String, Value>,
    pub strategy: Strategy,
    pub destinations: Vec<String>,
    pub content_transformer: Option<ContentTransformer>,
}

impl RoutingRule {
    pub fn new(
        rule_id: impl Into<String>,
        priority: Priority,
        event_type_patterns: Vec<String>,
        content_filters: HashMap<String, Predicate>,
        user_criteria: HashMap<String, Value>,
        strategy: Strategy,
        destinations: Vec<String>,
        content_transformer: Option<ContentTransformer>,
    ) -> Self {
        let compiled = event_type_patterns
            .into_iter()
            .map(|p| Regex::new(&p).map_err(|e| e.to_string()))
            .collect();
        Self {
            rule_id: rule_id.into(),
            priority,
            event_type_patterns: compiled,
            content_filters,
            user_criteria,
            strategy,
            destinations,
            content_transformer,
        }
    }

    /// True if any configured pattern matches `event_type`. A bad regex
    /// never matches and is counted by the caller, not here — keeping this
    /// function infallible.
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_type_patterns
            .iter()
            .any(|p| matches!(p, Ok(re) if re.is_match(event_type)))
    }

    pub fn has_bad_regex(&self) -> bool {
        self.event_type_patterns.iter().any(|p| p.is_err())
    }

    /// Evaluate every content filter against `event_data`. Missing fields or
    /// type mismatches fail the match; nothing panics.
    pub fn content_matches(&self, event_data: &Value) -> bool {
        self.content_filters.iter().all(|(field, predicate)| {
            event_data
                .get(field)
                .map(|actual| predicate.evaluate(actual))
                .unwrap_or(false)
        })
    }

    /// Apply the transformer if present. Returns `None` on failure so the
    /// caller can count it and fall back to the original payload.
    pub fn apply_transform(&self, event_data: &Value) -> Option<Value> {
        self.content_transformer.as_ref()?.apply(event_data)
    }
}
