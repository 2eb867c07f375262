//! Health thresholds (§4.4): map broadcast statistics onto a status a
//! monitoring system can page on.

use super::BroadcastStats;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Healthy,
    Warning,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Healthy => "healthy",
            Status::Warning => "warning",
            Status::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PerformanceTargets {
    pub delivery_latency_target_ms: f64,
    pub batch_efficiency_target: f64,
    pub success_rate_target_percent: f64,
}

impl Default for PerformanceTargets {
    fn default() -> Self {
        Self {
            delivery_latency_target_ms: 100.0,
            batch_efficiency_target: 10.0,
            success_rate_target_percent: 95.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub service: &'static str,
    pub status: Status,
    pub message: String,
    pub timestamp: u64,
    pub stats: BroadcastStats,
    pub performance_targets: PerformanceTargets,
}

pub fn compute(stats: BroadcastStats) -> HealthStatus {
    let (status, message) = if stats.avg_delivery_latency_ms > 200.0 || stats.delivery_success_rate_percent < 95.0 {
        (
            Status::Error,
            format!(
                "delivery degraded: {:.1}ms avg latency, {:.1}% success rate",
                stats.avg_delivery_latency_ms, stats.delivery_success_rate_percent
            ),
        )
    } else if stats.avg_delivery_latency_ms > 100.0 {
        (Status::Warning, format!("elevated delivery latency: {:.1}ms", stats.avg_delivery_latency_ms))
    } else if stats.pending_batches > 50 {
        (Status::Warning, format!("high pending batch count: {}", stats.pending_batches))
    } else if stats.delivery_success_rate_percent < 99.0 {
        (
            Status::Warning,
            format!("delivery success rate below target: {:.1}%", stats.delivery_success_rate_percent),
        )
    } else {
        (Status::Healthy, format!("broadcasting healthy - {:.1}ms avg latency", stats.avg_delivery_latency_ms))
    };

    HealthStatus {
        service: "scalable_broadcaster",
        status,
        message,
        timestamp: SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
        stats,
        performance_targets: PerformanceTargets::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(latency: f64, success_rate: f64, pending: usize) -> BroadcastStats {
        BroadcastStats {
            avg_delivery_latency_ms: latency,
            delivery_success_rate_percent: success_rate,
            pending_batches: pending,
            ..Default::default()
        }
    }

    #[test]
    fn high_latency_is_error() {
        assert_eq!(compute(stats(250.0, 100.0, 0)).status, Status::Error);
    }

    #[test]
    fn low_success_rate_is_error() {
        assert_eq!(compute(stats(10.0, 90.0, 0)).status, Status::Error);
    }

    #[test]
    fn elevated_latency_is_warning() {
        assert_eq!(compute(stats(150.0, 100.0, 0)).status, Status::Warning);
    }

    #[test]
    fn many_pending_batches_is_warning() {
        assert_eq!(compute(stats(10.0, 100.0, 51)).status, Status::Warning);
    }

    #[test]
    fn nominal_stats_are_healthy() {
        assert_eq!(compute(stats(10.0, 100.0, 0)).status, Status::Healthy);
    }
}
