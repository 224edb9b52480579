//! Notification transports.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::http_client::{HttpClient, HttpError, HttpRequest, ReqwestHttpClient};
use crate::retry::RetryConfig;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("send timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("channel answered with status {status}: {description}")]
    Status { status: u16, description: String },

    #[error("channel rejected the message: {0}")]
    Rejected(String),

    #[error("send_blocking called from a current-thread runtime; use send().await instead")]
    BlockingInAsyncContext,

    #[error("failed to start dispatch runtime: {0}")]
    Runtime(String),

    #[error("sender misconfigured: {0}")]
    Config(String),
}

impl From<HttpError> for SendError {
    fn from(error: HttpError) -> Self {
        Self::Transport(error.message().to_string())
    }
}

/// Boxed future returned by [`Sender::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), SendError>> + Send + 'a>>;

/// Delivers one notification text to an external channel.
pub trait Sender: Send + Sync {
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, text: &'a str) -> SendFuture<'a>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSender;

impl Sender for LogSender {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            info!(target: "tickwatch::notify", %text, "notification");
            Ok(())
        })
    }
}

#[derive(Clone, PartialEq)]
pub struct TelegramConfig {
    pub token: String,
    pub chat_id: String,
    pub api_base: String,
    pub timeout_ms: u64,
    /// Outbound messages per minute. Zero disables pacing.
    pub max_per_minute: u32,
    pub retry: RetryConfig,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chat_id: chat_id.into(),
            api_base: String::from(TELEGRAM_API_BASE),
            timeout_ms: 10_000,
            max_per_minute: 20,
            retry: RetryConfig::disabled(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.token
        )
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_per_minute", &self.max_per_minute)
            .field("retry", &self.retry)
            .finish()
    }
}

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API sender. Holds one HTTP session for its whole lifetime.
pub struct TelegramSender {
    config: TelegramConfig,
    http: Arc<dyn HttpClient>,
    limiter: Option<DirectRateLimiter>,
}

impl TelegramSender {
    /// Build a sender with its own reqwest session.
    pub fn from_config(config: TelegramConfig) -> Result<Self, SendError> {
        let http =
            ReqwestHttpClient::new().map_err(|error| SendError::Config(error.to_string()))?;
        Self::with_http_client(config, Arc::new(http))
    }

    pub fn with_http_client(
        config: TelegramConfig,
        http: Arc<dyn HttpClient>,
    ) -> Result<Self, SendError> {
        if config.token.trim().is_empty() {
            return Err(SendError::Config(String::from("telegram token is empty")));
        }
        if config.chat_id.trim().is_empty() {
            return Err(SendError::Config(String::from("telegram chat_id is empty")));
        }

        let limiter = NonZeroU32::new(config.max_per_minute)
            .map(|limit| RateLimiter::direct(Quota::per_minute(limit)));
        Ok(Self {
            config,
            http,
            limiter,
        })
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    async fn attempt(&self, text: &str) -> Result<(), SendError> {
        let body = json!({
            "chat_id": self.config.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let request = HttpRequest::post_json(self.config.endpoint(), body.to_string())
            .with_timeout_ms(self.config.timeout_ms);

        let response = self.http.execute(request).await.map_err(|error| {
            if error.is_timeout() {
                SendError::Timeout {
                    timeout_ms: self.config.timeout_ms,
                }
            } else {
                SendError::from(error)
            }
        })?;

        let reply = serde_json::from_str::<TelegramReply>(&response.body).ok();
        if !response.is_success() {
            let description = reply
                .and_then(|reply| reply.description)
                .unwrap_or_else(|| truncate(&response.body, 200));
            return Err(SendError::Status {
                status: response.status,
                description,
            });
        }

        match reply {
            Some(reply) if reply.ok => Ok(()),
            Some(reply) => Err(SendError::Rejected(
                reply
                    .description
                    .unwrap_or_else(|| String::from("ok=false")),
            )),
            None => Err(SendError::Rejected(String::from(
                "response body is not a Bot API reply",
            ))),
        }
    }

    fn retryable(&self, error: &SendError) -> bool {
        let retry = &self.config.retry;
        match error {
            SendError::Status { status, .. } => retry.should_retry_status(*status),
            SendError::Timeout { .. } => retry.retry_on_timeout,
            SendError::Transport(_) => true,
            _ => false,
        }
    }
}

impl Sender for TelegramSender {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn send<'a>(&'a self, text: &'a str) -> SendFuture<'a> {
        Box::pin(async move {
            let mut attempt = 0_u32;
            loop {
                if let Some(limiter) = &self.limiter {
                    limiter.until_ready().await;
                }

                match self.attempt(text).await {
                    Ok(()) => {
                        debug!(attempt, "telegram message delivered");
                        return Ok(());
                    }
                    Err(error)
                        if attempt < self.config.retry.max_retries && self.retryable(&error) =>
                    {
                        let delay = self.config.retry.delay_for_attempt(attempt);
                        warn!(attempt, ?delay, %error, "telegram send failed, retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(error) => return Err(error),
                }
            }
        })
    }
}

impl fmt::Debug for TelegramSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramSender")
            .field("config", &self.config)
            .field("paced", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
