//! In-memory membership index (§4.1): expands targeting criteria into a
//! recipient set without scanning every subscribed user.

use super::{Filters, Subscription, SubscriptionType, UserId};
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// `subscription_type` is pulled out of the generic criteria map and used as
/// the primary (most selective, in practice) narrowing dimension before the
/// remaining predicates are checked by linear scan over the narrowed set —
/// see DESIGN.md for why a full posting-list intersection across all filter
/// keys is not sound here (a subscription silent on a dimension is
/// unconstrained on it, not absent from the match).
const SUBSCRIPTION_TYPE_KEY: &str = "subscription_type";
const THRESHOLD_MIN_SUFFIX: &str = "_min";
const THRESHOLD_MAX_SUFFIX: &str = "_max";

#[derive(Default)]
pub struct SubscriptionIndex {
    forward: DashMap<UserId, DashMap<SubscriptionType, Subscription>>,
    by_type: DashMap<SubscriptionType, DashSet<UserId>>,
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: replaces any previous subscription of the same
    /// `(user_id, subscription_type)`.
    pub fn upsert(&self, subscription: Subscription) {
        let user_id = subscription.user_id.clone();
        let sub_type = subscription.subscription_type.clone();

        self.by_type
            .entry(sub_type.clone())
            .or_default()
            .insert(user_id.clone());

        self.forward
            .entry(user_id)
            .or_default()
            .insert(sub_type, subscription);
    }

    /// Remove every subscription belonging to `user_id`.
    pub fn remove(&self, user_id: &str) {
        if let Some((_, subs)) = self.forward.remove(user_id) {
            for (sub_type, _) in subs {
                self.remove_postings(user_id, &sub_type);
            }
        }
    }

    /// Remove a single `(user_id, subscription_type)` subscription.
    pub fn remove_type(&self, user_id: &str, subscription_type: &str) {
        let emptied = if let Some(user_subs) = self.forward.get(user_id) {
            user_subs.remove(subscription_type);
            user_subs.is_empty()
        } else {
            false
        };
        self.remove_postings(user_id, subscription_type);
        if emptied {
            self.forward.remove(user_id);
        }
    }

    fn remove_postings(&self, user_id: &str, subscription_type: &str) {
        if let Some(set) = self.by_type.get(subscription_type) {
            set.remove(user_id);
        }
    }

    /// Resolve a targeting-criteria map into the set of users whose
    /// subscription filters are compatible with it (§8 invariant 1).
    pub fn find_matching_users(&self, criteria: &HashMap<String, Value>) -> HashSet<UserId> {
        if criteria.is_empty() {
            return self.forward.iter().map(|entry| entry.key().clone()).collect();
        }

        let subscription_type = criteria
            .get(SUBSCRIPTION_TYPE_KEY)
            .and_then(|v| v.as_str());

        let mut result = HashSet::new();

        let mut check = |user_id: &UserId, sub_type: &str| {
            let Some(user_subs) = self.forward.get(user_id) else { return };
            let Some(subscription) = user_subs.get(sub_type) else { return };
            if Self::filters_compatible(&subscription.filters, criteria) {
                result.insert(user_id.clone());
            }
        };

        if let Some(sub_type) = subscription_type {
            if let Some(users) = self.by_type.get(sub_type) {
                for user_id in users.iter() {
                    check(&user_id, sub_type);
                }
            }
        } else {
            for entry in self.forward.iter() {
                let user_id = entry.key().clone();
                for sub_type_entry in entry.value().iter() {
                    check(&user_id, sub_type_entry.key());
                }
            }
        }

        result
    }

    fn filters_compatible(filters: &Filters, criteria: &HashMap<String, Value>) -> bool {
        for (key, criterion) in criteria {
            if key == SUBSCRIPTION_TYPE_KEY {
                continue;
            }
            if let Some(filter_value) = filters.get(key) {
                if !filter_value.matches(criterion) {
                    return false;
                }
            }
            // Filter silent on this dimension: unconstrained, passes.
        }

        // Threshold filters (`confidence_min`, `priority_min`, ...) are keyed
        // by `<field>_min`/`<field>_max`, not the field's own name, so the
        // direct key lookup above never finds them — cross-reference them
        // against the matching criteria field here instead.
        for (filter_key, filter_value) in filters {
            let Some(field) = filter_key
                .strip_suffix(THRESHOLD_MIN_SUFFIX)
                .or_else(|| filter_key.strip_suffix(THRESHOLD_MAX_SUFFIX))
            else {
                continue;
            };
            if let Some(criterion) = criteria.get(field) {
                if !filter_value.matches(criterion) {
                    return false;
                }
            }
        }
        true
    }

    /// Remove subscriptions whose `last_activity_at` is older than
    /// `max_inactive_ms` relative to `now_ms`. Returns the number removed.
    pub fn cleanup_stale(&self, now_ms: u64, max_inactive_ms: u64) -> usize {
        let stale: Vec<(UserId, SubscriptionType)> = self
            .forward
            .iter()
            .flat_map(|entry| {
                let user_id = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .filter(|sub_entry| {
                        now_ms.saturating_sub(sub_entry.value().last_activity_at) > max_inactive_ms
                    })
                    .map(|sub_entry| (user_id.clone(), sub_entry.key().clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for (user_id, sub_type) in &stale {
            self.remove_type(user_id, sub_type);
        }
        stale.len()
    }

    pub fn total_users(&self) -> usize {
        self.forward.len()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.forward.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::FilterValue;
    use proptest::prelude::*;
    use serde_json::json;

    fn filters(pairs: &[(&str, FilterValue)]) -> Filters {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn upsert_then_find_by_subscription_type() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new("u1", "tier_patterns", Filters::new()));

        let criteria = HashMap::from([(SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns"))]);
        let matches = index.find_matching_users(&criteria);
        assert_eq!(matches, HashSet::from(["u1".to_string()]));
    }

    #[test]
    fn filter_set_membership_narrows_matches() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new(
            "u1",
            "tier_patterns",
            filters(&[("symbols", FilterValue::Set(vec![json!("AAPL")]))]),
        ));
        index.upsert(Subscription::new(
            "u2",
            "tier_patterns",
            filters(&[("symbols", FilterValue::Set(vec![json!("MSFT")]))]),
        ));

        let criteria = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("symbols".to_string(), json!("AAPL")),
        ]);
        let matches = index.find_matching_users(&criteria);
        assert_eq!(matches, HashSet::from(["u1".to_string()]));
    }

    #[test]
    fn missing_filter_key_is_unconstrained() {
        let index = SubscriptionIndex::new();
        // u1 never specified a "symbols" filter at all.
        index.upsert(Subscription::new("u1", "tier_patterns", Filters::new()));

        let criteria = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("symbols".to_string(), json!("AAPL")),
        ]);
        let matches = index.find_matching_users(&criteria);
        assert!(matches.contains("u1"));
    }

    #[test]
    fn upsert_is_idempotent_per_user_and_type() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new("u1", "tier_patterns", Filters::new()));
        index.upsert(Subscription::new(
            "u1",
            "tier_patterns",
            filters(&[("symbols", FilterValue::Set(vec![json!("AAPL")]))]),
        ));
        assert_eq!(index.total_subscriptions(), 1);

        let criteria = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("symbols".to_string(), json!("AAPL")),
        ]);
        assert!(index.find_matching_users(&criteria).contains("u1"));
    }

    #[test]
    fn remove_drops_user_from_every_index() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new(
            "u1",
            "tier_patterns",
            filters(&[("symbols", FilterValue::Set(vec![json!("AAPL")]))]),
        ));
        index.remove("u1");

        let criteria = HashMap::from([(SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns"))]);
        assert!(index.find_matching_users(&criteria).is_empty());
        assert_eq!(index.total_users(), 0);
    }

    #[test]
    fn empty_criteria_returns_all_subscribed_users() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new("u1", "tier_patterns", Filters::new()));
        index.upsert(Subscription::new("u2", "tier_news", Filters::new()));
        let matches = index.find_matching_users(&HashMap::new());
        assert_eq!(matches, HashSet::from(["u1".to_string(), "u2".to_string()]));
    }

    #[test]
    fn cleanup_stale_removes_inactive_subscriptions() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new("u1", "tier_patterns", Filters::new()));
        let removed = index.cleanup_stale(1_000_000, 10);
        assert_eq!(removed, 1);
        assert_eq!(index.total_users(), 0);
    }

    #[test]
    fn confidence_min_excludes_users_below_threshold() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new(
            "u1",
            "tier_patterns",
            filters(&[("confidence_min", FilterValue::Min(0.8))]),
        ));
        index.upsert(Subscription::new("u2", "tier_patterns", Filters::new()));

        let criteria = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("confidence".to_string(), json!(0.5)),
        ]);
        let matches = index.find_matching_users(&criteria);
        assert!(!matches.contains("u1"), "u1's confidence_min should have excluded it");
        assert!(matches.contains("u2"), "u2 has no confidence_min and stays unconstrained");
    }

    #[test]
    fn priority_min_compares_by_ordinal() {
        let index = SubscriptionIndex::new();
        index.upsert(Subscription::new(
            "u1",
            "tier_patterns",
            filters(&[("priority_min", FilterValue::Min(2.0))]), // "high"
        ));

        let criteria_low = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("priority".to_string(), json!("medium")),
        ]);
        assert!(!index.find_matching_users(&criteria_low).contains("u1"));

        let criteria_high = HashMap::from([
            (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
            ("priority".to_string(), json!("critical")),
        ]);
        assert!(index.find_matching_users(&criteria_high).contains("u1"));
    }

    // Invariant 1 (§8): find_matching_users(C) returns exactly the users
    // whose current subscription filters intersect C. Modeled here over a
    // single scalar "symbols" filter against a single-symbol criteria map,
    // checked against a brute-force reference intersection.
    proptest! {
        #[test]
        fn find_matching_users_matches_brute_force_intersection(
            subscribed_symbols in prop::collection::hash_set("[A-E]", 0..5),
            query_symbol in "[A-E]",
        ) {
            let index = SubscriptionIndex::new();
            for symbol in &subscribed_symbols {
                index.upsert(Subscription::new(
                    format!("u_{symbol}"),
                    "tier_patterns",
                    filters(&[("symbols", FilterValue::Set(vec![json!(symbol)]))]),
                ));
            }

            let criteria = HashMap::from([
                (SUBSCRIPTION_TYPE_KEY.to_string(), json!("tier_patterns")),
                ("symbols".to_string(), json!(query_symbol)),
            ]);
            let matches = index.find_matching_users(&criteria);

            let expected: HashSet<UserId> = subscribed_symbols
                .iter()
                .filter(|symbol| symbol.as_str() == query_symbol.as_str())
                .map(|symbol| format!("u_{symbol}"))
                .collect();
            prop_assert_eq!(matches, expected);
        }
    }
}
