//! Thin Slack Web API client over reqwest.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use aily_platform::error::{PlatformError, Result};

const API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone)]
pub struct SlackApi {
    http: reqwest::Client,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    messages: Option<Vec<HistoryMessage>>,
    #[serde(default)]
    url: Option<String>,
}

/// A channel-history message; only the fields the relay inspects.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl SlackApi {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
        }
    }

    /// Validate the bot token. Auth failures here are unrecoverable.
    pub async fn auth_test(&self) -> Result<()> {
        self.call("auth.test", &json!({})).await.map(|_| ())
    }

    /// Post a message; `thread_ts` targets a thread reply. Returns the new
    /// message's ts.
    pub async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<String> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = json!(ts);
        }
        let envelope = self.call("chat.postMessage", &body).await?;
        envelope
            .ts
            .ok_or_else(|| PlatformError::Protocol("chat.postMessage returned no ts".into()))
    }

    /// Recent top-level channel messages, newest first.
    pub async fn history(&self, channel: &str, limit: u32) -> Result<Vec<HistoryMessage>> {
        let envelope = self
            .call(
                "conversations.history",
                &json!({ "channel": channel, "limit": limit }),
            )
            .await?;
        Ok(envelope.messages.unwrap_or_default())
    }

    pub async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        match self
            .call(
                "reactions.add",
                &json!({ "channel": channel, "timestamp": ts, "name": name }),
            )
            .await
        {
            Ok(_) => Ok(()),
            // an existing marker is success for our purposes
            Err(PlatformError::Protocol(m)) if m.contains("already_reacted") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_message(&self, channel: &str, ts: &str) -> Result<()> {
        self.call("chat.delete", &json!({ "channel": channel, "ts": ts }))
            .await
            .map(|_| ())
    }

    /// Open a Socket Mode connection; needs the app-level token.
    pub async fn connections_open(&self, app_token: &str) -> Result<String> {
        let response = self
            .http
            .post(format!("{API_BASE}/apps.connections.open"))
            .bearer_auth(app_token)
            .send()
            .await
            .map_err(|e| PlatformError::Unreachable(e.to_string()))?;
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| PlatformError::Protocol(e.to_string()))?;
        if !envelope.ok {
            return Err(classify(envelope.error.as_deref().unwrap_or("unknown")));
        }
        envelope
            .url
            .ok_or_else(|| PlatformError::Protocol("apps.connections.open returned no url".into()))
    }

    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<ApiEnvelope> {
        debug!(method, "slack api call");
        let response = self
            .http
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.bot_token)
            .json(body)
            .send()
            .await
            .map_err(|e| PlatformError::Unreachable(e.to_string()))?;

        if response.status().as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(2);
            return Err(PlatformError::RateLimited { retry_after_secs });
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| PlatformError::Protocol(e.to_string()))?;
        if !envelope.ok {
            return Err(classify(envelope.error.as_deref().unwrap_or("unknown")));
        }
        Ok(envelope)
    }
}

/// Map Slack's error strings onto the adapter error kinds.
fn classify(error: &str) -> PlatformError {
    match error {
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" => {
            PlatformError::Auth(error.to_string())
        }
        "channel_not_found" | "thread_not_found" | "message_not_found" => PlatformError::Gone,
        "ratelimited" | "rate_limited" => PlatformError::RateLimited {
            retry_after_secs: 2,
        },
        other => PlatformError::Protocol(format!("slack: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_classify_as_auth() {
        assert!(matches!(classify("invalid_auth"), PlatformError::Auth(_)));
        assert!(matches!(classify("token_revoked"), PlatformError::Auth(_)));
    }

    #[test]
    fn missing_targets_classify_as_gone() {
        assert!(matches!(classify("channel_not_found"), PlatformError::Gone));
        assert!(matches!(classify("thread_not_found"), PlatformError::Gone));
    }

    #[test]
    fn unknown_errors_are_protocol() {
        assert!(matches!(classify("msg_too_long"), PlatformError::Protocol(_)));
    }
}
