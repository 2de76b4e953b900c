// xtrabackup-assistant/src/utils/slack.rs
use serde::Serialize;
use std::time::Duration;

use crate::config::SlackConfig;
use crate::errors::{AppError, Result};

const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";
const ERROR_TITLE: &str = "XtraBackup Assistant error!";

#[derive(Debug, Serialize)]
struct Attachment<'a> {
    title: &'a str,
    text: &'a str,
    footer: &'a str,
    color: &'a str,
}

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    attachments: Vec<Attachment<'a>>,
}

/// Posts failure reports to a Slack channel.
pub struct Notifier {
    config: SlackConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: SlackConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Notification(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Notifier { config, client })
    }

    pub async fn notify(&self, project: &str, error_text: &str) -> Result<()> {
        let body = error_payload(&self.config.channel, project, error_text);

        let response = self
            .client
            .post(POST_MESSAGE_URL)
            .bearer_auth(&self.config.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Notification(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::Notification(format!("Slack responded with {}", response.status())));
        }

        // Slack reports API errors with HTTP 200 and `ok: false`.
        let reply: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Notification(e.to_string()))?;
        if reply.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let reason = reply.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
            return Err(AppError::Notification(format!("Slack rejected the message: {}", reason)));
        }

        Ok(())
    }
}

fn error_payload<'a>(channel: &'a str, project: &'a str, error_text: &'a str) -> PostMessage<'a> {
    PostMessage {
        channel,
        attachments: vec![Attachment {
            title: ERROR_TITLE,
            text: error_text,
            footer: project,
            color: "danger",
        }],
    }
}
