use std::time::Duration;

use serde_json::json;
use serenity::model::id::ChannelId;
use tracing::warn;

use aily_platform::error::{PlatformError, Result};
use aily_platform::format::split_chunks;

const API_BASE: &str = "https://discord.com/api/v10";
/// Discord's limit is 2000 characters; stay under it for safety margin.
const CHUNK_MAX: usize = 1950;
/// Tries per chunk when the platform pushes back.
const MAX_TRIES: u32 = 3;
/// Last-resort wait when a 429 carries no readable window.
const RETRY_AFTER_FALLBACK_SECS: u64 = 2;

/// Message posting over the REST API directly. serenity's typed error drops
/// the response headers, so the posting path owns its HTTP to read the real
/// `Retry-After` window instead of guessing.
#[derive(Debug, Clone)]
pub struct DiscordRest {
    http: reqwest::Client,
    bot_token: String,
}

impl DiscordRest {
    pub fn new(bot_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token: bot_token.to_string(),
        }
    }

    /// POST one message to a channel/thread.
    async fn create_message(&self, channel: ChannelId, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{API_BASE}/channels/{channel}/messages"))
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| PlatformError::Unreachable(e.to_string()))?;

        let status = response.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(());
        }

        let header = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: serde_json::Value = response.json().await.unwrap_or_default();

        match status {
            429 => Err(PlatformError::RateLimited {
                retry_after_secs: retry_after_from(header.as_deref(), &body),
            }),
            404 | 410 => Err(PlatformError::Gone),
            401 | 403 => Err(PlatformError::Auth(
                body["message"].as_str().unwrap_or("forbidden").to_string(),
            )),
            _ => Err(PlatformError::Protocol(format!(
                "discord http {status}: {}",
                body["message"].as_str().unwrap_or("unknown")
            ))),
        }
    }
}

/// The rate-limit window in whole seconds: the `Retry-After` header first,
/// then the `retry_after` field Discord puts in the 429 body, then the
/// fallback. Fractional windows round up so we never under-sleep.
fn retry_after_from(header: Option<&str>, body: &serde_json::Value) -> u64 {
    let from_header = header.and_then(|v| v.trim().parse::<f64>().ok());
    let from_body = body.get("retry_after").and_then(|v| v.as_f64());
    match from_header.or(from_body) {
        Some(secs) if secs.is_finite() && secs >= 0.0 => (secs.ceil() as u64).max(1),
        _ => RETRY_AFTER_FALLBACK_SECS,
    }
}

/// Send `text` to a channel/thread in ≤[`CHUNK_MAX`]-byte chunks, honouring
/// the platform's `Retry-After` per chunk.
pub async fn send_chunked(rest: &DiscordRest, channel: ChannelId, text: &str) -> Result<()> {
    for chunk in split_chunks(text, CHUNK_MAX) {
        let mut attempt = 0;
        loop {
            match rest.create_message(channel, &chunk).await {
                Ok(()) => break,
                Err(PlatformError::RateLimited { retry_after_secs })
                    if attempt + 1 < MAX_TRIES =>
                {
                    attempt += 1;
                    warn!(retry_after_secs, attempt, "discord rate limited, waiting");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

/// Map a serenity error (gateway and thread-management calls) onto the
/// adapter error kinds. serenity's own ratelimiter has already slept on the
/// route's `Retry-After` before a 429 ever surfaces here, and its typed
/// error carries no window, so the fallback applies.
pub fn map_error(e: serenity::Error) -> PlatformError {
    match &e {
        serenity::Error::Http(serenity::http::HttpError::UnsuccessfulRequest(resp)) => {
            match resp.status_code.as_u16() {
                429 => PlatformError::RateLimited {
                    retry_after_secs: RETRY_AFTER_FALLBACK_SECS,
                },
                404 | 410 => PlatformError::Gone,
                401 | 403 => PlatformError::Auth(resp.error.message.clone()),
                _ => PlatformError::Protocol(format!(
                    "discord http {}: {}",
                    resp.status_code, resp.error.message
                )),
            }
        }
        serenity::Error::Gateway(_) | serenity::Error::Tungstenite(_) => {
            PlatformError::Unreachable(e.to_string())
        }
        _ => PlatformError::Protocol(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_takes_precedence_over_body() {
        let body = json!({ "retry_after": 9.0 });
        assert_eq!(retry_after_from(Some("64"), &body), 64);
    }

    #[test]
    fn body_retry_after_is_used_when_no_header() {
        let body = json!({ "message": "You are being rate limited.", "retry_after": 12.34 });
        // fractional windows round up
        assert_eq!(retry_after_from(None, &body), 13);
    }

    #[test]
    fn unreadable_window_falls_back() {
        assert_eq!(
            retry_after_from(None, &json!({})),
            RETRY_AFTER_FALLBACK_SECS
        );
        assert_eq!(
            retry_after_from(Some("soon"), &json!({})),
            RETRY_AFTER_FALLBACK_SECS
        );
        assert_eq!(
            retry_after_from(Some("nan"), &json!({ "retry_after": "also-bad" })),
            RETRY_AFTER_FALLBACK_SECS
        );
    }

    #[test]
    fn zero_window_still_waits_a_beat() {
        assert_eq!(retry_after_from(Some("0"), &json!({})), 1);
    }
}
