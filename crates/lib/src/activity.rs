//! Activity log: bounded, append-only record of gateway events for the `/activity` endpoint.
//!
//! Oldest entries are evicted first once capacity is reached. Every append is mirrored to the
//! process log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::RwLock;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Error,
}

/// One immutable log entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub message: String,
}

pub struct ActivityLog {
    capacity: usize,
    entries: RwLock<VecDeque<ActivityEntry>>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry stamped with the current time, evicting the oldest when full.
    pub async fn append(&self, level: ActivityLevel, message: impl Into<String>) {
        let entry = ActivityEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };
        match level {
            ActivityLevel::Error => log::warn!("[activity] {}", entry.message),
            _ => log::info!("[activity] {}", entry.message),
        }
        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub async fn info(&self, message: impl Into<String>) {
        self.append(ActivityLevel::Info, message).await
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.append(ActivityLevel::Error, message).await
    }

    /// Entries oldest-first.
    pub async fn snapshot(&self) -> Vec<ActivityEntry> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
