//! Coordinator façade (§4.5): composes the Index, Router, and Broadcaster
//! and owns the mapping from targeting criteria to recipient sets.

use crate::broadcaster::{Broadcaster, HealthStatus};
use crate::priority::Priority;
use crate::router::{EventRouter, RoutingRule};
use crate::subscription::{FilterValue, Filters, Subscription, SubscriptionIndex, SubscriptionType, UserId};
use crate::transport::Transport;
use broadcast_core::config::BroadcastConfig;
use broadcast_core::Result;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionStats {
    pub total_users: usize,
    pub total_subscriptions: usize,
    pub avg_filtering_latency_ms: f64,
}

/// Tracks how many live connections a user currently has, so
/// `handle_user_disconnection` only unsubscribes once the last one drops.
#[derive(Default)]
struct ConnectionTracker {
    connections: DashMap<UserId, Vec<String>>,
}

impl ConnectionTracker {
    fn add(&self, user_id: &str, connection_id: &str) {
        self.connections
            .entry(user_id.to_string())
            .or_default()
            .push(connection_id.to_string());
    }

    /// Removes `connection_id`, returning true if no connections remain.
    fn remove(&self, user_id: &str, connection_id: &str) -> bool {
        let Some(mut entry) = self.connections.get_mut(user_id) else { return true };
        entry.retain(|c| c != connection_id);
        entry.is_empty()
    }
}

pub struct Coordinator {
    index: Arc<SubscriptionIndex>,
    router: Arc<EventRouter>,
    broadcaster: Arc<Broadcaster>,
    connections: ConnectionTracker,
    filtering_time_micros: AtomicU64,
    filtering_calls: AtomicU64,
}

impl Coordinator {
    pub fn new(config: BroadcastConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let index = Arc::new(SubscriptionIndex::new());
        let router = Arc::new(EventRouter::new(index.clone(), &config.router_cache));
        let broadcaster = Broadcaster::new(config.broadcaster, transport);
        Arc::new(Self {
            index,
            router,
            broadcaster,
            connections: ConnectionTracker::default(),
            filtering_time_micros: AtomicU64::new(0),
            filtering_calls: AtomicU64::new(0),
        })
    }

    pub fn add_routing_rule(&self, rule: RoutingRule) -> Result<()> {
        self.router.add_rule(rule)
    }

    pub fn remove_routing_rule(&self, rule_id: &str) -> bool {
        self.router.remove_rule(rule_id)
    }

    pub fn subscribe_user(&self, user_id: impl Into<UserId>, subscription_type: impl Into<SubscriptionType>, filters: Filters) -> bool {
        self.index.upsert(Subscription::new(user_id, subscription_type, filters));
        true
    }

    pub fn unsubscribe_user(&self, user_id: &str, subscription_type: Option<&str>) -> bool {
        match subscription_type {
            Some(t) => self.index.remove_type(user_id, t),
            None => self.index.remove(user_id),
        }
        true
    }

    pub fn register_connection(&self, user_id: &str, connection_id: &str) {
        self.connections.add(user_id, connection_id);
    }

    /// Unsubscribes the user once their last connection drops (§8 invariant 8).
    pub fn handle_user_disconnection(&self, user_id: &str, connection_id: &str) {
        if self.connections.remove(user_id, connection_id) {
            self.index.remove(user_id);
        }
    }

    /// Routes the event, then admits each resolved destination to the
    /// broadcaster. Returns the total number of recipients admitted.
    pub fn broadcast_event(self: &Arc<Self>, event_type: &str, event_data: &Value, targeting_criteria: &HashMap<String, Value>) -> usize {
        let start = std::time::Instant::now();
        let routing_result = self.router.route(event_type, event_data, Some(targeting_criteria));
        self.filtering_time_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        self.filtering_calls.fetch_add(1, Ordering::Relaxed);

        let priority = self.router.priority_of_rules(&routing_result.matched_rules);
        let mut admitted = 0;
        for (room, users) in routing_result.destinations {
            if !users.is_empty() {
                admitted += self.broadcaster.broadcast_to_users(
                    event_type,
                    &routing_result.transformed_event_data,
                    &users,
                    priority,
                );
            } else if self.broadcaster.broadcast_to_room(&room, event_type, &routing_result.transformed_event_data, priority) {
                admitted += 1;
            }
        }
        admitted
    }

    pub fn broadcast_to_room(self: &Arc<Self>, room: &str, event_type: &str, event_data: &Value, priority: Priority) -> bool {
        self.broadcaster.broadcast_to_room(room, event_type, event_data, priority)
    }

    pub fn optimize_performance(self: &Arc<Self>) -> usize {
        self.broadcaster.optimize_performance()
    }

    pub fn cleanup_inactive_subscriptions(&self, max_inactive: Duration) -> usize {
        self.index.cleanup_stale(now_millis(), max_inactive.as_millis() as u64)
    }

    #[tracing::instrument(skip(self))]
    pub async fn shutdown(self: &Arc<Self>) {
        self.broadcaster.shutdown().await;
    }

    pub fn get_subscription_stats(&self) -> SubscriptionStats {
        let calls = self.filtering_calls.load(Ordering::Relaxed);
        let avg = if calls > 0 {
            (self.filtering_time_micros.load(Ordering::Relaxed) as f64 / 1000.0) / calls as f64
        } else {
            0.0
        };
        SubscriptionStats {
            total_users: self.index.total_users(),
            total_subscriptions: self.index.total_subscriptions(),
            avg_filtering_latency_ms: avg,
        }
    }

    pub fn get_routing_stats(&self) -> crate::router::RoutingStats {
        self.router.get_routing_stats()
    }

    pub fn get_broadcast_stats(&self) -> crate::broadcaster::BroadcastStats {
        self.broadcaster.get_broadcast_stats()
    }

    pub fn get_health_status(&self) -> HealthStatus {
        self.broadcaster.get_health_status()
    }
}
