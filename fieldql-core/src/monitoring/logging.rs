//! Structured logging with tracing
//!
//! Subscriber setup (text or JSON) and slow projection tracking

use crate::config::{LogFormat, LoggingSettings};
use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Number of slow projections kept for reporting
const MAX_SLOW_PROJECTIONS: usize = 1000;

/// Initialize the global tracing subscriber. Logs go to stderr.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));

    let subscriber = Registry::default().with(env_filter);

    match settings.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(std::io::stderr);
            subscriber.with(json_layer).try_init()?;
        }
        LogFormat::Text => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact();
            subscriber.with(fmt_layer).try_init()?;
        }
    }

    tracing::debug!(
        "Logging initialized: level={}, format={:?}, slow_projections={}",
        settings.level.as_str(),
        settings.format,
        settings.slow_projection_logging
    );

    Ok(())
}

/// Records projections slower than a threshold
#[derive(Debug)]
pub struct SlowProjectionLogger {
    threshold: Duration,
    enabled: bool,
    projections: RwLock<Vec<SlowProjection>>,
}

/// Slow projection record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlowProjection {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
    pub query: String,
    pub model: Option<String>,
    pub records: usize,
}

/// In-flight projection
#[derive(Debug)]
pub struct ProjectionTracker {
    start_time: Instant,
    query: String,
    model: Option<String>,
    records: usize,
}

/// Slow projection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlowProjectionStats {
    pub total_count: usize,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
    pub threshold_ms: u64,
}

impl SlowProjectionLogger {
    pub fn new(threshold: Duration, enabled: bool) -> Self {
        Self {
            threshold,
            enabled,
            projections: RwLock::new(Vec::new()),
        }
    }

    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.slow_projection_threshold_ms),
            settings.slow_projection_logging,
        )
    }

    /// Start timing a projection of `records` entities
    pub fn start(&self, query: &str, model: Option<&str>, records: usize) -> ProjectionTracker {
        ProjectionTracker {
            start_time: Instant::now(),
            query: query.to_string(),
            model: model.map(str::to_string),
            records,
        }
    }

    /// Finish timing; returns whether the projection was slow
    pub fn finish(&self, tracker: ProjectionTracker) -> bool {
        if !self.enabled {
            return false;
        }

        let duration = tracker.start_time.elapsed();
        if duration < self.threshold {
            return false;
        }

        let slow = SlowProjection {
            timestamp: Utc::now(),
            duration_ms: duration.as_millis() as u64,
            query: tracker.query,
            model: tracker.model,
            records: tracker.records,
        };

        tracing::warn!(
            target: "slow_projection",
            duration_ms = slow.duration_ms,
            query = %slow.query,
            model = ?slow.model,
            records = slow.records,
            "Slow projection detected"
        );

        let mut projections = self.projections.write();
        projections.push(slow);
        if projections.len() > MAX_SLOW_PROJECTIONS {
            let excess = projections.len() - MAX_SLOW_PROJECTIONS;
            projections.drain(..excess);
        }

        true
    }

    /// Most recent slow projections, newest first
    pub fn recent(&self, limit: usize) -> Vec<SlowProjection> {
        self.projections.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn get_stats(&self) -> SlowProjectionStats {
        let projections = self.projections.read();
        let threshold_ms = self.threshold.as_millis() as u64;

        if projections.is_empty() {
            return SlowProjectionStats {
                threshold_ms,
                ..SlowProjectionStats::default()
            };
        }

        let total_count = projections.len();
        let total_duration: u64 = projections.iter().map(|p| p.duration_ms).sum();

        SlowProjectionStats {
            total_count,
            avg_duration_ms: total_duration / total_count as u64,
            max_duration_ms: projections.iter().map(|p| p.duration_ms).max().unwrap_or(0),
            threshold_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threshold_records_everything() {
        let logger = SlowProjectionLogger::new(Duration::ZERO, true);
        let tracker = logger.start("{*}", Some("res.partner"), 3);
        assert!(logger.finish(tracker));

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].query, "{*}");
        assert_eq!(recent[0].model.as_deref(), Some("res.partner"));
        assert_eq!(recent[0].records, 3);

        let stats = logger.get_stats();
        assert_eq!(stats.total_count, 1);
        assert_eq!(stats.threshold_ms, 0);
    }

    #[test]
    fn test_fast_projection_not_recorded() {
        let logger = SlowProjectionLogger::new(Duration::from_secs(3600), true);
        let tracker = logger.start("{id}", None, 1);
        assert!(!logger.finish(tracker));
        assert_eq!(logger.get_stats().total_count, 0);
        assert_eq!(logger.get_stats().threshold_ms, 3_600_000);
    }

    #[test]
    fn test_disabled_logger() {
        let logger = SlowProjectionLogger::new(Duration::ZERO, false);
        let tracker = logger.start("{id}", None, 1);
        assert!(!logger.finish(tracker));
        assert!(logger.recent(10).is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let logger = SlowProjectionLogger::new(Duration::ZERO, true);
        for i in 0..MAX_SLOW_PROJECTIONS + 5 {
            let tracker = logger.start(&format!("{{f{}}}", i), None, 1);
            logger.finish(tracker);
        }
        assert_eq!(logger.get_stats().total_count, MAX_SLOW_PROJECTIONS);
        assert_eq!(
            logger.recent(1)[0].query,
            format!("{{f{}}}", MAX_SLOW_PROJECTIONS + 4)
        );
    }
}
