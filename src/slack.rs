// ===============================
// src/slack.rs
// ===============================
//
// Slack incoming-webhook poster. Every announcement is also logged, so running
// without a webhook URL is a usable dry-run mode.
//
// Delivery happens after a configurable delay on a detached task: the delay
// keeps announcements behind live TV, and detaching keeps slow deliveries out
// of the watch loop's cancellation domain entirely.
//

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::metrics::SLACK_POSTS;

#[derive(Serialize)]
struct WebhookMessage {
    channel: String,
    text: String,
    username: String,
    icon_emoji: String,
}

pub struct SlackHandler {
    http: reqwest::Client,
    webhook_url: Option<String>,
    channel: String,
    username: String,
    post_delay: Duration,
}

impl SlackHandler {
    pub fn new(
        webhook_url: Option<String>,
        channel: String,
        username: String,
        post_delay: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
            channel,
            username,
            post_delay,
        }
    }

    /// Queue one announcement. Returns immediately; the webhook POST runs on
    /// its own task after the post delay.
    pub fn post(&self, text: &str) {
        info!(%text, "announce");

        let Some(url) = self.webhook_url.clone() else {
            debug!("no webhook configured, dry run only");
            SLACK_POSTS.with_label_values(&["dry_run"]).inc();
            return;
        };

        let payload = WebhookMessage {
            channel: self.channel.clone(),
            text: text.to_string(),
            username: self.username.clone(),
            icon_emoji: ":ice_hockey:".to_string(),
        };
        let http = self.http.clone();
        let delay = self.post_delay;

        tokio::spawn(async move {
            sleep(delay).await;
            match http.post(&url).json(&payload).send().await {
                Ok(rsp) if rsp.status().is_success() => {
                    SLACK_POSTS.with_label_values(&["ok"]).inc();
                    debug!(text = %payload.text, "posted");
                }
                Ok(rsp) => {
                    let code = rsp.status();
                    let body = rsp.text().await.unwrap_or_default();
                    SLACK_POSTS.with_label_values(&["rejected"]).inc();
                    error!(%code, %body, "slack post rejected");
                }
                Err(e) => {
                    SLACK_POSTS.with_label_values(&["error"]).inc();
                    error!(error = %e, "slack post failed");
                }
            }
        });
    }
}
