//! Scalable Broadcaster (§4.4): coalesces routed events into per-destination
//! batches and dispatches them via bounded worker pools in priority order.

mod health;

pub use health::{HealthStatus, PerformanceTargets, Status};

use crate::priority::Priority;
use crate::rate_limiter::RateLimiter;
use crate::subscription::UserId;
use crate::transport::{BatchEnvelope, Transport};
use broadcast_core::config::BroadcasterConfig;
use broadcast_core::canonical::approximate_byte_size;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct EventMessage {
    pub event_type: String,
    pub event_data: Value,
    pub target_users: HashSet<UserId>,
    pub priority: Priority,
    pub timestamp: u64,
    pub message_id: String,
}

impl EventMessage {
    pub fn new(event_type: impl Into<String>, event_data: Value, target_users: HashSet<UserId>, priority: Priority) -> Self {
        Self {
            event_type: event_type.into(),
            event_data,
            target_users,
            priority,
            timestamp: now_millis(),
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBatch {
    pub room_name: String,
    pub events: Vec<EventMessage>,
    pub batch_id: String,
    pub created_at: u64,
    pub priority: Priority,
    bytes: usize,
}

impl EventBatch {
    fn new(room_name: String, first: EventMessage) -> Self {
        let bytes = approximate_byte_size(&first.event_data);
        let priority = first.priority;
        Self {
            room_name,
            events: vec![first],
            batch_id: uuid::Uuid::new_v4().to_string(),
            created_at: now_millis(),
            priority,
            bytes,
        }
    }

    fn can_fit(&self, additional_bytes: usize, max_size: usize, max_bytes: usize) -> bool {
        self.events.len() < max_size && self.bytes + additional_bytes <= max_bytes
    }

    fn push(&mut self, message: EventMessage) {
        self.bytes += approximate_byte_size(&message.event_data);
        self.priority = self.priority.max(message.priority);
        self.events.push(message);
    }
}

struct PendingBatch {
    batch: EventBatch,
    timer: JoinHandle<()>,
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub total_events: u64,
    pub events_delivered: u64,
    pub events_rate_limited: u64,
    pub events_dropped: u64,
    pub batches_created: u64,
    pub batches_delivered: u64,
    pub avg_batch_size: f64,
    pub avg_delivery_latency_ms: f64,
    pub max_delivery_latency_ms: f64,
    pub rate_limit_violations: u64,
    pub transformation_errors: u64,
    pub batch_errors: u64,
    pub delivery_errors: u64,
    pub pending_batches: usize,
    pub delivery_success_rate_percent: f64,
    pub uptime_seconds: f64,
}

#[derive(Default)]
struct Counters {
    total_events: AtomicU64,
    events_delivered: AtomicU64,
    events_rate_limited: AtomicU64,
    events_dropped: AtomicU64,
    batches_created: AtomicU64,
    batches_delivered: AtomicU64,
    rate_limit_violations: AtomicU64,
    transformation_errors: AtomicU64,
    batch_errors: AtomicU64,
    delivery_errors: AtomicU64,
    batch_size_sum: AtomicU64,
    latency_sum_micros: AtomicU64,
    latency_count: AtomicU64,
    max_latency_micros: AtomicU64,
}

pub struct Broadcaster {
    config: BroadcasterConfig,
    transport: Arc<dyn Transport>,
    pending: DashMap<String, PendingBatch>,
    rate_limiters: DashMap<UserId, Arc<RateLimiter>>,
    counters: Counters,
    shutdown: AtomicBool,
    batch_semaphore: Arc<Semaphore>,
    delivery_semaphore: Arc<Semaphore>,
    started_at: Instant,
}

impl Broadcaster {
    pub fn new(config: BroadcasterConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let batch_workers = config.batch_worker_count;
        let delivery_workers = config.delivery_worker_count;
        Arc::new(Self {
            config,
            transport,
            pending: DashMap::new(),
            rate_limiters: DashMap::new(),
            counters: Counters::default(),
            shutdown: AtomicBool::new(false),
            batch_semaphore: Arc::new(Semaphore::new(batch_workers)),
            delivery_semaphore: Arc::new(Semaphore::new(delivery_workers)),
            started_at: Instant::now(),
        })
    }

    fn rate_limiter_for(&self, user_id: &str) -> Arc<RateLimiter> {
        self.rate_limiters
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(self.config.max_events_per_user, Duration::from_secs(1))))
            .clone()
    }

    /// Admits events to a per-recipient room (`user_<id>`). Returns the
    /// number of recipients actually admitted after rate limiting.
    pub fn broadcast_to_users(
        self: &Arc<Self>,
        event_type: &str,
        event_data: &Value,
        user_set: &HashSet<UserId>,
        priority: Priority,
    ) -> usize {
        if self.shutdown.load(Ordering::Acquire) {
            return 0;
        }
        self.counters.total_events.fetch_add(user_set.len() as u64, Ordering::Relaxed);
        if user_set.is_empty() {
            return 0;
        }

        let admitted: Vec<UserId> = user_set
            .iter()
            .filter(|user_id| self.rate_limiter_for(user_id).allow())
            .cloned()
            .collect();

        let rejected = user_set.len() - admitted.len();
        if rejected > 0 {
            self.counters.events_rate_limited.fetch_add(rejected as u64, Ordering::Relaxed);
            self.counters.rate_limit_violations.fetch_add(rejected as u64, Ordering::Relaxed);
        }

        for user_id in &admitted {
            let room = format!("user_{user_id}");
            let message = EventMessage::new(
                event_type,
                event_data.clone(),
                HashSet::from([user_id.clone()]),
                priority,
            );
            self.queue_for_delivery(room, message);
        }

        admitted.len()
    }

    /// Enqueues a single event to a shared room. Returns whether it was
    /// admitted (rooms are not rate-limited; only per-user delivery is).
    pub fn broadcast_to_room(self: &Arc<Self>, room: &str, event_type: &str, event_data: &Value, priority: Priority) -> bool {
        if self.shutdown.load(Ordering::Acquire) {
            return false;
        }
        self.counters.total_events.fetch_add(1, Ordering::Relaxed);
        let message = EventMessage::new(event_type, event_data.clone(), HashSet::new(), priority);
        self.queue_for_delivery(room.to_string(), message);
        true
    }

    fn queue_for_delivery(self: &Arc<Self>, room: String, message: EventMessage) {
        let additional_bytes = approximate_byte_size(&message.event_data);
        let mut overflowed = None;

        match self.pending.entry(room.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied
                    .get()
                    .batch
                    .can_fit(additional_bytes, self.config.max_batch_size, self.config.max_batch_bytes)
                {
                    occupied.get_mut().batch.push(message);
                    return;
                }
                overflowed = Some(occupied.remove());
            }
            Entry::Vacant(vacant) => {
                let timer = self.spawn_batch_timer(room.clone());
                self.counters.batches_created.fetch_add(1, Ordering::Relaxed);
                vacant.insert(PendingBatch { batch: EventBatch::new(room, message), timer });
                return;
            }
        }

        if let Some(old) = overflowed {
            old.timer.abort();
            self.dispatch_batch(old.batch);
        }
        let timer = self.spawn_batch_timer(room.clone());
        self.counters.batches_created.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(room.clone(), PendingBatch { batch: EventBatch::new(room, message), timer });
    }

    fn spawn_batch_timer(self: &Arc<Self>, room: String) -> JoinHandle<()> {
        let broadcaster = Arc::clone(self);
        let window = self.config.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            broadcaster.flush_room(&room);
        })
    }

    /// Detach and dispatch a single room's pending batch, if any. Used by
    /// the timer callback, overflow handling, and `flush_all_batches`.
    fn flush_room(self: &Arc<Self>, room: &str) {
        if let Some((_, pending)) = self.pending.remove(room) {
            // The timer that fired is this one; nothing to abort.
            self.dispatch_batch(pending.batch);
        }
    }

    /// Force-flush every pending batch, bypassing the batch window.
    pub fn flush_all_batches(self: &Arc<Self>) {
        let rooms: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        for room in rooms {
            if let Some((_, pending)) = self.pending.remove(&room) {
                pending.timer.abort();
                self.dispatch_batch(pending.batch);
            }
        }
    }

    /// Represents the source's two `ThreadPoolExecutor`s as two semaphores:
    /// a batch permit is held only while handing the batch off, a delivery
    /// permit for the actual (potentially slow) `Transport::emit` call.
    fn dispatch_batch(self: &Arc<Self>, batch: EventBatch) {
        let broadcaster = Arc::clone(self);
        let batch_semaphore = Arc::clone(&self.batch_semaphore);
        tokio::spawn(async move {
            let batch_permit = batch_semaphore.acquire_owned().await;
            drop(batch_permit);

            let delivery_semaphore = Arc::clone(&broadcaster.delivery_semaphore);
            let delivery_permit = delivery_semaphore.acquire_owned().await;
            broadcaster.deliver_batch(batch).await;
            drop(delivery_permit);
        });
    }

    async fn deliver_batch(&self, mut batch: EventBatch) {
        batch.events.sort_by(|a, b| b.priority.cmp(&a.priority));
        let room = batch.room_name.clone();
        let event_count = batch.events.len();

        let (event_name, payload) = if batch.events.len() == 1 {
            let event = &batch.events[0];
            (event.event_type.clone(), event.event_data.clone())
        } else {
            let envelope = BatchEnvelope::from_batch(&batch);
            (
                "event_batch".to_string(),
                serde_json::to_value(envelope).unwrap_or(Value::Null),
            )
        };

        let start = Instant::now();
        match self.transport.emit(&event_name, payload, &room).await {
            Ok(()) => {
                self.counters.events_delivered.fetch_add(event_count as u64, Ordering::Relaxed);
                self.counters.batches_delivered.fetch_add(1, Ordering::Relaxed);
                self.counters.batch_size_sum.fetch_add(event_count as u64, Ordering::Relaxed);
            }
            Err(error) => {
                tracing::warn!(room = %room, %error, "transport emit failed; batch dropped");
                self.counters.batch_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.delivery_errors.fetch_add(event_count as u64, Ordering::Relaxed);
                self.counters.events_dropped.fetch_add(event_count as u64, Ordering::Relaxed);
            }
        }

        let micros = start.elapsed().as_micros() as u64;
        self.counters.latency_sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.counters.latency_count.fetch_add(1, Ordering::Relaxed);
        self.counters.max_latency_micros.fetch_max(micros, Ordering::Relaxed);
    }

    /// Flushes pending batches and reaps rate limiters idle past the
    /// configured threshold.
    pub fn optimize_performance(self: &Arc<Self>) -> usize {
        self.flush_all_batches();
        let idle_timeout = self.config.rate_limiter_idle_timeout;
        let stale: Vec<UserId> = self
            .rate_limiters
            .iter()
            .filter(|entry| entry.value().idle_for() > idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();
        for user_id in &stale {
            self.rate_limiters.remove(user_id);
        }
        stale.len()
    }

    /// Stop admitting new events, flush outstanding batches, wait (bounded)
    /// for in-flight deliveries, and cancel anything still outstanding.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutdown.store(true, Ordering::Release);
        self.flush_all_batches();

        let batch_drain = Arc::clone(&self.batch_semaphore).acquire_many_owned(self.config.batch_worker_count as u32);
        if tokio::time::timeout(Duration::from_secs(5), batch_drain).await.is_err() {
            tracing::warn!("broadcaster shutdown timed out waiting for batch workers to drain");
        }

        let delivery_drain =
            Arc::clone(&self.delivery_semaphore).acquire_many_owned(self.config.delivery_worker_count as u32);
        if tokio::time::timeout(Duration::from_secs(5), delivery_drain).await.is_err() {
            tracing::warn!("broadcaster shutdown timed out waiting for delivery workers to drain");
        }
    }

    pub fn get_broadcast_stats(&self) -> BroadcastStats {
        let batches_delivered = self.counters.batches_delivered.load(Ordering::Relaxed);
        let batch_size_sum = self.counters.batch_size_sum.load(Ordering::Relaxed);
        let latency_count = self.counters.latency_count.load(Ordering::Relaxed);
        let latency_sum_micros = self.counters.latency_sum_micros.load(Ordering::Relaxed);
        let events_delivered = self.counters.events_delivered.load(Ordering::Relaxed);
        let delivery_errors = self.counters.delivery_errors.load(Ordering::Relaxed);
        let attempted = events_delivered + delivery_errors;

        BroadcastStats {
            total_events: self.counters.total_events.load(Ordering::Relaxed),
            events_delivered,
            events_rate_limited: self.counters.events_rate_limited.load(Ordering::Relaxed),
            events_dropped: self.counters.events_dropped.load(Ordering::Relaxed),
            batches_created: self.counters.batches_created.load(Ordering::Relaxed),
            batches_delivered,
            avg_batch_size: if batches_delivered > 0 { batch_size_sum as f64 / batches_delivered as f64 } else { 0.0 },
            avg_delivery_latency_ms: if latency_count > 0 {
                (latency_sum_micros as f64 / 1000.0) / latency_count as f64
            } else {
                0.0
            },
            max_delivery_latency_ms: self.counters.max_latency_micros.load(Ordering::Relaxed) as f64 / 1000.0,
            rate_limit_violations: self.counters.rate_limit_violations.load(Ordering::Relaxed),
            transformation_errors: self.counters.transformation_errors.load(Ordering::Relaxed),
            batch_errors: self.counters.batch_errors.load(Ordering::Relaxed),
            delivery_errors,
            pending_batches: self.pending.len(),
            delivery_success_rate_percent: if attempted > 0 {
                100.0 * events_delivered as f64 / attempted as f64
            } else {
                100.0
            },
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        health::compute(self.get_broadcast_stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use std::sync::Arc;

    fn broadcaster(config: BroadcasterConfig) -> (Arc<Broadcaster>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        (Broadcaster::new(config, transport.clone()), transport)
    }

    #[tokio::test]
    async fn broadcast_to_users_returns_zero_for_empty_set() {
        let (broadcaster, _transport) = broadcaster(BroadcasterConfig::default());
        let admitted = broadcaster.broadcast_to_users("pattern_alert", &Value::Null, &HashSet::new(), Priority::Medium);
        assert_eq!(admitted, 0);
    }

    #[tokio::test]
    async fn single_event_flushes_after_window_and_reaches_transport() {
        let mut config = BroadcasterConfig::default();
        config.batch_window = Duration::from_millis(20);
        let (broadcaster, transport) = broadcaster(config);

        let users = HashSet::from(["u1".to_string()]);
        let admitted = broadcaster.broadcast_to_users("pattern_alert", &serde_json::json!({"a": 1}), &users, Priority::High);
        assert_eq!(admitted, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.emit_count(), 1);
        assert_eq!(transport.recorded()[0].2, "user_u1");
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_threshold() {
        let mut config = BroadcasterConfig::default();
        config.max_events_per_user = 2;
        let (broadcaster, _transport) = broadcaster(config);

        let users = HashSet::from(["u1".to_string()]);
        for _ in 0..2 {
            assert_eq!(
                broadcaster.broadcast_to_users("pattern_alert", &Value::Null, &users, Priority::Low),
                1
            );
        }
        assert_eq!(
            broadcaster.broadcast_to_users("pattern_alert", &Value::Null, &users, Priority::Low),
            0
        );
    }

    #[tokio::test]
    async fn overflow_flushes_full_batch_immediately() {
        let mut config = BroadcasterConfig::default();
        config.max_batch_size = 2;
        config.batch_window = Duration::from_secs(10);
        let (broadcaster, transport) = broadcaster(config);

        broadcaster.broadcast_to_room("room_r", "pattern_alert", &serde_json::json!({"i": 1}), Priority::Low);
        broadcaster.broadcast_to_room("room_r", "pattern_alert", &serde_json::json!({"i": 2}), Priority::Low);
        broadcaster.broadcast_to_room("room_r", "pattern_alert", &serde_json::json!({"i": 3}), Priority::Low);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // The first two fill a batch and overflow on the third, triggering
        // an immediate flush of the first batch; the third starts a new one
        // still pending.
        assert_eq!(transport.emit_count(), 1);
    }

    #[tokio::test]
    async fn priority_ordering_within_a_batch_is_descending() {
        let mut config = BroadcasterConfig::default();
        config.batch_window = Duration::from_millis(20);
        let (broadcaster, transport) = broadcaster(config);

        for priority in [Priority::Low, Priority::Critical, Priority::Medium, Priority::High] {
            broadcaster.broadcast_to_room("room_r", "pattern_alert", &Value::Null, priority);
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        let recorded = transport.recorded();
        assert_eq!(recorded.len(), 1);
        let envelope = &recorded[0].1;
        let priorities: Vec<&str> = envelope["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["priority"].as_str().unwrap())
            .collect();
        assert_eq!(priorities, vec!["critical", "high", "medium", "low"]);
    }

    #[tokio::test]
    async fn shutdown_stops_admitting_new_events() {
        let (broadcaster, _transport) = broadcaster(BroadcasterConfig::default());
        broadcaster.shutdown().await;
        let users = HashSet::from(["u1".to_string()]);
        assert_eq!(broadcaster.broadcast_to_users("x", &Value::Null, &users, Priority::Low), 0);
    }
}
