//! Real-time event broadcasting engine: Subscription Index, Event Router,
//! and Scalable Broadcaster composed behind a [`Coordinator`] façade.

pub mod broadcaster;
pub mod coordinator;
pub mod priority;
pub mod rate_limiter;
pub mod router;
pub mod subscription;
pub mod telemetry;
pub mod transport;

pub use broadcaster::{BroadcastStats, Broadcaster, EventBatch, EventMessage, HealthStatus};
pub use coordinator::{Coordinator, SubscriptionStats};
pub use priority::Priority;
pub use rate_limiter::RateLimiter;
pub use router::{ContentTransformer, EventRouter, Predicate, RoutingResult, RoutingRule, RoutingStats, Strategy};
pub use subscription::{FilterValue, Filters, Subscription, SubscriptionIndex};
pub use transport::{BatchEnvelope, NullTransport, RecordingTransport, Transport};
