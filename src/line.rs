use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::LineConfig;

const REPLY_URL: &str = "https://api.line.me/v2/bot/message/reply";

// Reply tokens expire within seconds of the webhook, so a slow call is as
// good as a failed one.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Outbound confirmation channel back into the chat.
///
/// Reply tokens are single-use and short-lived, so a failed dispatch is
/// final: callers log it and move on. No retry, by contract.
#[async_trait]
pub trait ReplyDispatcher: Send + Sync {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest<'a> {
    reply_token: &'a str,
    messages: Vec<ReplyMessage<'a>>,
}

#[derive(Serialize)]
struct ReplyMessage<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    text: &'a str,
}

/// LINE Messaging API reply client.
pub struct LineClient {
    client: reqwest::Client,
    access_token: String,
}

impl LineClient {
    pub fn new(config: &LineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPLY_TIMEOUT)
            .build()
            .context("Failed to build LINE HTTP client")?;

        Ok(Self {
            client,
            access_token: config.channel_access_token.clone(),
        })
    }
}

#[async_trait]
impl ReplyDispatcher for LineClient {
    async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        debug!(chars = text.chars().count(), "sending LINE reply");

        let request = ReplyRequest {
            reply_token,
            messages: vec![ReplyMessage {
                message_type: "text",
                text,
            }],
        };

        let response = self
            .client
            .post(REPLY_URL)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .json(&request)
            .send()
            .await
            .context("Failed to send reply to LINE")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply API error ({status}): {body}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_payload_shape() {
        let request = ReplyRequest {
            reply_token: "tok-1",
            messages: vec![ReplyMessage {
                message_type: "text",
                text: "บันทึกแล้ว",
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["replyToken"], "tok-1");
        assert_eq!(value["messages"][0]["type"], "text");
        assert_eq!(value["messages"][0]["text"], "บันทึกแล้ว");
    }
}
