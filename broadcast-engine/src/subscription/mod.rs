//! Subscription types shared by the index and the coordinator (§3).

mod index;

pub use index::SubscriptionIndex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub type UserId = String;
pub type SubscriptionType = String;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A single filter value: a scalar (equality), a set of alternatives
/// (`symbols ⊂ {...}` in the spec's data model), or a numeric threshold
/// (`confidence_min`, `priority_min` in §3's filter vocabulary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(Value),
    Set(Vec<Value>),
    /// Admits only criteria whose numeric value is `>=` the threshold.
    Min(f64),
    /// Admits only criteria whose numeric value is `<=` the threshold.
    Max(f64),
}

impl FilterValue {
    /// True if `criterion` is compatible with this filter value: equal to the
    /// scalar, a member of the set, or on the admitted side of a threshold.
    ///
    /// Threshold comparisons read the criterion as a plain number first; if
    /// that fails (e.g. a `priority` criterion carries a string like
    /// `"high"`), it falls back to [`priority_ordinal`] so `priority_min`
    /// filters work against the enum's natural ordering.
    pub fn matches(&self, criterion: &Value) -> bool {
        match self {
            FilterValue::Scalar(v) => v == criterion,
            FilterValue::Set(values) => values.contains(criterion),
            FilterValue::Min(threshold) => numeric_rank(criterion).is_some_and(|n| n >= *threshold),
            FilterValue::Max(threshold) => numeric_rank(criterion).is_some_and(|n| n <= *threshold),
        }
    }

    /// All concrete values this filter contributes to the inverted index.
    /// Threshold filters aren't enumerable, so they contribute nothing here —
    /// they're cross-referenced against criteria directly instead (§4.1).
    pub fn posting_values(&self) -> Vec<Value> {
        match self {
            FilterValue::Scalar(v) => vec![v.clone()],
            FilterValue::Set(values) => values.clone(),
            FilterValue::Min(_) | FilterValue::Max(_) => vec![],
        }
    }
}

/// A value's position on a threshold's number line: the value itself for a
/// plain number, or its ordinal position for a `Priority` name.
fn numeric_rank(value: &Value) -> Option<f64> {
    value.as_f64().or_else(|| value.as_str().and_then(priority_ordinal))
}

fn priority_ordinal(name: &str) -> Option<f64> {
    match name {
        "low" => Some(0.0),
        "medium" => Some(1.0),
        "high" => Some(2.0),
        "critical" => Some(3.0),
        _ => None,
    }
}

pub type Filters = HashMap<String, FilterValue>;

/// A user's subscription to a class of events (§3 Subscription).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: UserId,
    pub subscription_type: SubscriptionType,
    pub filters: Filters,
    pub created_at: u64,
    pub last_activity_at: u64,
}

impl Subscription {
    pub fn new(user_id: impl Into<UserId>, subscription_type: impl Into<SubscriptionType>, filters: Filters) -> Self {
        let now = now_millis();
        Self {
            user_id: user_id.into(),
            subscription_type: subscription_type.into(),
            filters,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity_at = now_millis();
    }
}
