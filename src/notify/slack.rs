// src/notify/slack.rs
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use std::time::Duration;

use super::{NotificationEvent, Notifier};

pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl SlackNotifier {
    pub fn new(url: String) -> Self {
        Self {
            webhook_url: url,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 1,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, n: u8) -> Self {
        self.max_retries = n.max(1);
        self
    }

    pub fn render(ev: &NotificationEvent) -> String {
        let origin = ev
            .missed_opportunity_id
            .as_deref()
            .map(|id| format!("\nFrom missed opportunity `{id}`"))
            .unwrap_or_default();
        format!(
            "*Learning awaiting review:* {}\n{} at {} scope (`{}`){}\n@ {}",
            ev.title,
            ev.learning_type.as_str(),
            ev.scope_level.as_str(),
            ev.queue_item_id,
            origin,
            ev.ts.to_rfc3339()
        )
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn send(&self, ev: &NotificationEvent) -> Result<()> {
        let body = serde_json::json!({ "text": Self::render(ev) });

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook_url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
                .context("slack post")
                .and_then(|rsp| rsp.error_for_status().context("slack non-2xx"));
            match res {
                Ok(_) => return Ok(()),
                Err(e) if attempt < self.max_retries => {
                    tracing::debug!(target: "notify", attempt, "slack retry: {e:#}");
                    tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                }
                Err(e) => return Err(anyhow!("slack failed after {attempt} attempt(s): {e:#}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning_queue::{LearningType, ScopeLevel};
    use chrono::Utc;

    #[test]
    fn message_names_item_and_origin() {
        let ev = NotificationEvent {
            queue_item_id: "lq_000007".into(),
            title: "Lower thresholds for equity signals".into(),
            scope_level: ScopeLevel::Domain,
            learning_type: LearningType::Threshold,
            missed_opportunity_id: Some("mo_ab12".into()),
            ts: Utc::now(),
        };
        let text = SlackNotifier::render(&ev);
        assert!(text.contains("lq_000007"));
        assert!(text.contains("threshold at domain scope"));
        assert!(text.contains("mo_ab12"));
    }
}
