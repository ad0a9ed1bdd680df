// Monitoring - tracing setup and engine counters

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{AppError, AppResult};

/// Install the global tracing subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LoggingConfig) -> AppResult<()> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| {
        AppError::ConfigurationError(format!("Invalid log filter {:?}: {}", config.filter, e))
    })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| AppError::ConfigurationError(format!("Failed to initialize tracing: {}", e)))
}

/// Business counters for the voting engine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    votes_cast: AtomicU64,
    votes_retracted: AtomicU64,
    votes_switched: AtomicU64,
    conflicts_retried: AtomicU64,
    unavailable: AtomicU64,
    comments_created: AtomicU64,
    comments_deleted: AtomicU64,
    posts_deleted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub votes_cast: u64,
    pub votes_retracted: u64,
    pub votes_switched: u64,
    pub conflicts_retried: u64,
    pub unavailable: u64,
    pub comments_created: u64,
    pub comments_deleted: u64,
    pub posts_deleted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    VoteCast,
    VoteRetracted,
    VoteSwitched,
    ConflictRetried,
    Unavailable,
    CommentCreated,
    CommentDeleted,
    PostDeleted,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: EngineEvent) {
        let counter = match event {
            EngineEvent::VoteCast => &self.votes_cast,
            EngineEvent::VoteRetracted => &self.votes_retracted,
            EngineEvent::VoteSwitched => &self.votes_switched,
            EngineEvent::ConflictRetried => &self.conflicts_retried,
            EngineEvent::Unavailable => &self.unavailable,
            EngineEvent::CommentCreated => &self.comments_created,
            EngineEvent::CommentDeleted => &self.comments_deleted,
            EngineEvent::PostDeleted => &self.posts_deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            votes_cast: self.votes_cast.load(Ordering::Relaxed),
            votes_retracted: self.votes_retracted.load(Ordering::Relaxed),
            votes_switched: self.votes_switched.load(Ordering::Relaxed),
            conflicts_retried: self.conflicts_retried.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            comments_created: self.comments_created.load(Ordering::Relaxed),
            comments_deleted: self.comments_deleted.load(Ordering::Relaxed),
            posts_deleted: self.posts_deleted.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = EngineMetrics::new();
        metrics.record(EngineEvent::VoteCast);
        metrics.record(EngineEvent::VoteCast);
        metrics.record(EngineEvent::ConflictRetried);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.votes_cast, 2);
        assert_eq!(snapshot.conflicts_retried, 1);
        assert_eq!(snapshot.unavailable, 0);
    }

    #[test]
    fn test_invalid_filter_is_configuration_error() {
        let config = LoggingConfig {
            filter: "forum_ranking=verbose".to_string(),
        };
        assert!(matches!(init_tracing(&config), Err(AppError::ConfigurationError(_))));
    }
}
