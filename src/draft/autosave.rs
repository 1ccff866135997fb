use std::time::{Duration, Instant};

use time::OffsetDateTime;

use crate::config::AutoSaveConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveStatus {
    Disabled,
    Idle {
        last_saved_at: Option<OffsetDateTime>,
    },
    Pending {
        since: OffsetDateTime,
    },
    Error {
        message: String,
        occurred_at: OffsetDateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoSaveEvent {
    Saved { timestamp: OffsetDateTime },
    Error { message: String },
}

#[derive(Debug)]
pub struct AutoSaveTimer {
    enabled: bool,
    debounce: Duration,
    deadline: Option<Instant>,
    pending_since: Option<OffsetDateTime>,
    last_saved_at: Option<OffsetDateTime>,
    last_error: Option<AutoSaveFailure>,
}

#[derive(Debug, Clone)]
struct AutoSaveFailure {
    message: String,
    occurred_at: OffsetDateTime,
}

impl AutoSaveTimer {
    pub fn new(config: &AutoSaveConfig) -> Self {
        Self {
            enabled: config.enabled,
            debounce: config.debounce(),
            deadline: None,
            pending_since: None,
            last_saved_at: None,
            last_error: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn schedule(&mut self, now: Instant) {
        if !self.enabled {
            return;
        }
        self.deadline = Some(now + self.debounce);
        self.pending_since
            .get_or_insert_with(OffsetDateTime::now_utc);
        self.last_error = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.map(|deadline| now >= deadline).unwrap_or(false)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending_since = None;
    }

    pub fn record_saved(&mut self, timestamp: OffsetDateTime) -> AutoSaveEvent {
        self.cancel();
        self.last_saved_at = Some(timestamp);
        self.last_error = None;
        AutoSaveEvent::Saved { timestamp }
    }

    pub fn record_failure(&mut self, message: String, occurred_at: OffsetDateTime) -> AutoSaveEvent {
        self.cancel();
        self.last_error = Some(AutoSaveFailure {
            message: message.clone(),
            occurred_at,
        });
        AutoSaveEvent::Error { message }
    }

    pub fn status(&self) -> AutoSaveStatus {
        if let Some(failure) = &self.last_error {
            return AutoSaveStatus::Error {
                message: failure.message.clone(),
                occurred_at: failure.occurred_at,
            };
        }
        if !self.enabled {
            return AutoSaveStatus::Disabled;
        }
        if let Some(since) = self.pending_since {
            return AutoSaveStatus::Pending { since };
        }
        AutoSaveStatus::Idle {
            last_saved_at: self.last_saved_at,
        }
    }
}
