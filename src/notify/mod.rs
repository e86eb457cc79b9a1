// src/notify/mod.rs
//! Review notifications. Analysis emits one event per queued learning so a
//! human knows there is something to approve; delivery is best effort.

pub mod slack;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::learning_queue::{LearningQueueItem, LearningType, ScopeLevel};

pub use slack::SlackNotifier;

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub queue_item_id: String,
    pub title: String,
    pub scope_level: ScopeLevel,
    pub learning_type: LearningType,
    pub missed_opportunity_id: Option<String>,
    pub ts: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn review_requested(item: &LearningQueueItem) -> Self {
        Self {
            queue_item_id: item.id.clone(),
            title: item.suggested_title.clone(),
            scope_level: item.suggested_scope_level,
            learning_type: item.suggested_learning_type,
            missed_opportunity_id: item.source_missed_opportunity_id.clone(),
            ts: Utc::now(),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, ev: &NotificationEvent) -> Result<()>;
}

/// Fan-out to every configured channel. Failures are logged, never returned.
#[derive(Clone, Default)]
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    /// No channels; `notify` is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Slack when `SLACK_WEBHOOK_URL` is set.
    pub fn from_env() -> Self {
        let mut mux = Self::disabled();
        if let Ok(url) = std::env::var("SLACK_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                mux = mux.with(Arc::new(SlackNotifier::new(url).with_timeout(5).with_retries(3)));
            }
        }
        mux
    }

    pub fn with(mut self, ch: Arc<dyn Notifier>) -> Self {
        self.channels.push(ch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub async fn notify(&self, ev: &NotificationEvent) {
        for ch in &self.channels {
            match ch.send(ev).await {
                Ok(()) => tracing::debug!(
                    target: "notify",
                    channel = ch.name(),
                    item = %ev.queue_item_id,
                    "sent"
                ),
                Err(e) => tracing::warn!(
                    target: "notify",
                    channel = ch.name(),
                    item = %ev.queue_item_id,
                    "notify failed: {e:#}"
                ),
            }
        }
    }
}
