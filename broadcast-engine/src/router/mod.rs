//! Event Router (§4.2): matches events against declarable rules and expands
//! them into per-room recipient sets, with an LRU result cache.

mod rule;

pub use rule::{ContentTransformer, Predicate, RoutingRule, Strategy};

use crate::subscription::{SubscriptionIndex, UserId};
use broadcast_core::canonical::canonicalize;
use broadcast_core::config::RouterCacheConfig;
use broadcast_core::{Error, Result};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub event_id: String,
    pub matched_rules: Vec<String>,
    pub destinations: HashMap<String, HashSet<UserId>>,
    pub transformations_applied: Vec<String>,
    pub transformed_event_data: Value,
    pub routing_time_ms: f64,
    pub total_users: usize,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingStats {
    pub total_events: u64,
    pub events_routed: u64,
    pub cache_hit_rate: f64,
    pub avg_routing_time_ms: f64,
    pub routing_errors: u64,
    pub transformation_errors: u64,
    pub total_rules: usize,
    pub cache_size: usize,
}

#[derive(Default)]
struct Counters {
    total_events: AtomicU64,
    events_routed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    routing_errors: AtomicU64,
    transformation_errors: AtomicU64,
    total_routing_time_micros: AtomicU64,
}

pub struct EventRouter {
    rules: RwLock<Vec<Arc<RoutingRule>>>,
    cache: Option<Mutex<LruCache<String, RoutingResult>>>,
    cache_threshold: usize,
    index: Arc<SubscriptionIndex>,
    counters: Counters,
}

impl EventRouter {
    pub fn new(index: Arc<SubscriptionIndex>, cache_config: &RouterCacheConfig) -> Self {
        let cache = cache_config.enabled.then(|| {
            let capacity = NonZeroUsize::new(cache_config.capacity.max(1)).unwrap();
            Mutex::new(LruCache::new(capacity))
        });
        Self {
            rules: RwLock::new(Vec::new()),
            cache,
            cache_threshold: cache_config.cache_threshold,
            index,
            counters: Counters::default(),
        }
    }

    /// Copy-on-write insert. A duplicate `rule_id` is a genuine caller
    /// mistake and is rejected rather than counted (§7 admin-facing API).
    pub fn add_rule(&self, rule: RoutingRule) -> Result<()> {
        if rule.has_bad_regex() {
            tracing::warn!(
                rule_id = %rule.rule_id,
                "routing rule installed with an unparsable event-type pattern; it will never match on that pattern"
            );
        }
        let mut guard = self.rules.write();
        if guard.iter().any(|r| r.rule_id == rule.rule_id) {
            return Err(Error::DuplicateRule(rule.rule_id));
        }
        let mut next = (*guard).clone();
        next.push(Arc::new(rule));
        *guard = next;
        Ok(())
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut guard = self.rules.write();
        let before = guard.len();
        let next: Vec<_> = guard.iter().filter(|r| r.rule_id != rule_id).cloned().collect();
        let removed = next.len() != before;
        *guard = next;
        removed
    }

    /// Match `event_type`/`event_data` against installed rules and resolve
    /// destinations. `user_context` supplies additional targeting criteria
    /// (e.g. `subscription_type`) merged with the event's own fields.
    pub fn route(
        &self,
        event_type: &str,
        event_data: &Value,
        user_context: Option<&HashMap<String, Value>>,
    ) -> RoutingResult {
        self.counters.total_events.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let cache_key = Self::make_cache_key(event_type, event_data, user_context);
        if let Some(cache) = &self.cache {
            let mut guard = cache.lock();
            if let Some(hit) = guard.get(&cache_key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                let mut result = hit.clone();
                result.cache_hit = true;
                result.routing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
                return result;
            }
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let rules = self.rules.read().clone();
        let mut matched_rules = Vec::new();
        let mut destinations: HashMap<String, HashSet<UserId>> = HashMap::new();
        let mut transformations_applied = Vec::new();
        let mut transformed_event_data = event_data.clone();
        let base_criteria = Self::flatten_object(event_data);

        for rule in rules.iter() {
            if !rule.matches_event_type(event_type) {
                if rule.has_bad_regex() {
                    self.counters.routing_errors.fetch_add(1, Ordering::Relaxed);
                }
                continue;
            }
            if !rule.content_matches(event_data) {
                continue;
            }
            matched_rules.push(rule.rule_id.clone());

            if rule.content_transformer.is_some() {
                match rule.apply_transform(&transformed_event_data) {
                    Some(transformed) => {
                        transformed_event_data = transformed;
                        transformations_applied.push(rule.rule_id.clone());
                    }
                    None => {
                        self.counters.transformation_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            let mut criteria = base_criteria.clone();
            if let Some(ctx) = user_context {
                criteria.extend(ctx.clone());
            }
            criteria.extend(rule.user_criteria.clone());

            for room in Self::resolve_destinations(rule, event_type, event_data) {
                let recipients = if let Some(user_id) = room.strip_prefix("user_") {
                    HashSet::from([user_id.to_string()])
                } else {
                    self.index.find_matching_users(&criteria)
                };
                destinations.entry(room).or_default().extend(recipients);
            }
        }

        let total_users: usize = destinations.values().map(|s| s.len()).sum();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.counters
            .total_routing_time_micros
            .fetch_add((elapsed_ms * 1000.0) as u64, Ordering::Relaxed);
        if !matched_rules.is_empty() {
            self.counters.events_routed.fetch_add(1, Ordering::Relaxed);
        }

        let result = RoutingResult {
            event_id: uuid::Uuid::new_v4().to_string(),
            matched_rules,
            destinations,
            transformations_applied,
            transformed_event_data,
            routing_time_ms: elapsed_ms,
            total_users,
            cache_hit: false,
        };

        if let Some(cache) = &self.cache {
            if total_users >= self.cache_threshold {
                cache.lock().put(cache_key, result.clone());
            }
        }

        result
    }

    /// Literal destinations win; otherwise `CONTENT_BASED` rules synthesize
    /// a room name from `pattern_type`/`symbol`, falling back to the event
    /// type itself (§4.2 step 4).
    fn resolve_destinations(rule: &RoutingRule, event_type: &str, event_data: &Value) -> Vec<String> {
        if !rule.destinations.is_empty() {
            return rule.destinations.clone();
        }
        if rule.strategy == Strategy::ContentBased {
            if let (Some(pattern_type), Some(symbol)) = (
                event_data.get("pattern_type").and_then(Value::as_str),
                event_data.get("symbol").and_then(Value::as_str),
            ) {
                return vec![format!("pattern_{pattern_type}_{symbol}")];
            }
        }
        vec![format!("event_{event_type}")]
    }

    fn flatten_object(value: &Value) -> HashMap<String, Value> {
        value
            .as_object()
            .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn make_cache_key(event_type: &str, event_data: &Value, user_context: Option<&HashMap<String, Value>>) -> String {
        let ctx_value = user_context
            .map(|m| Value::Object(m.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            .unwrap_or(Value::Null);
        let composite = serde_json::json!({
            "event_type": event_type,
            "event_data": event_data,
            "user_context": ctx_value,
        });
        canonicalize(&composite)
    }

    /// Highest priority among the given matched rule ids, defaulting to
    /// medium if none are found (e.g. they were removed between routing and
    /// this lookup).
    pub fn priority_of_rules(&self, rule_ids: &[String]) -> crate::priority::Priority {
        let rules = self.rules.read();
        rule_ids
            .iter()
            .filter_map(|id| rules.iter().find(|r| &r.rule_id == id))
            .map(|r| r.priority)
            .max()
            .unwrap_or_default()
    }

    pub fn get_routing_stats(&self) -> RoutingStats {
        let total_events = self.counters.total_events.load(Ordering::Relaxed);
        let hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let cache_hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64
        } else {
            0.0
        };
        let avg_routing_time_ms = if total_events > 0 {
            (self.counters.total_routing_time_micros.load(Ordering::Relaxed) as f64 / 1000.0) / total_events as f64
        } else {
            0.0
        };
        RoutingStats {
            total_events,
            events_routed: self.counters.events_routed.load(Ordering::Relaxed),
            cache_hit_rate,
            avg_routing_time_ms,
            routing_errors: self.counters.routing_errors.load(Ordering::Relaxed),
            transformation_errors: self.counters.transformation_errors.load(Ordering::Relaxed),
            total_rules: self.rules.read().len(),
            cache_size: self.cache.as_ref().map(|c| c.lock().len()).unwrap_or(0),
        }
    }
}
