//! Delivery client: every call hookcord makes to Discord goes through here.
//!
//! One retry policy covers thread creation and message posts:
//! - transport errors and 5xx back off exponentially up to `max_attempts`,
//!   then surface as [`DeliveryError::Exhausted`];
//! - 429 waits the server's `retry_after` (only this call, unless Discord
//!   marks the limit global) and counts against the same ceiling;
//! - any other 4xx is final: [`DeliveryError::Rejected`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use hookcord_protocol::wire::{
    ChannelResponse, MessageBody, MessageResponse, ThreadCreateBody, AUTO_ARCHIVE_MINUTES,
    PUBLIC_THREAD,
};
use hookcord_protocol::{Embed, OutboundMessage};

use crate::config::{ChannelType, Config, Credentials};
use crate::limits;
use crate::rate_limit::{parse_rate_limit, RateLimitBudget, RateLimited};

/// Zero-based attempt number sent with every request, for log correlation
const ATTEMPT_HEADER: &str = "x-hookcord-attempt";
const STARTER_COLOR: u32 = 0x5865F2;
const ERROR_BODY_MAX: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// Bound on each individual HTTP attempt
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(8),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Where a message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostTarget {
    Channel(String),
    Thread(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{operation} gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last_error: String,
    },
    #[error("{operation} rejected with HTTP {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
    /// Warning only: the message was still sent, shortened
    #[error("{field} truncated from {original} to {limit} characters")]
    Truncated {
        field: &'static str,
        original: usize,
        limit: usize,
    },
    #[error("{0}")]
    Unsupported(&'static str),
}

/// Result of a single HTTP attempt
#[derive(Debug)]
pub enum DeliveryOutcome<T> {
    Delivered(T),
    RateLimited(RateLimited),
    /// Transport error or 5xx; worth another attempt
    Failed { reason: String },
    /// Final answer from Discord
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait Delivery: Send + Sync {
    /// Open a thread named `title` under `channel_id`, returning its id
    async fn create_thread(&self, channel_id: &str, title: &str) -> Result<String, DeliveryError>;

    /// Post `message`, returning the remote message id
    async fn post_message(
        &self,
        target: &PostTarget,
        message: &OutboundMessage,
    ) -> Result<String, DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct DiscordClient {
    http: reqwest::Client,
    credentials: Credentials,
    channel_type: ChannelType,
    policy: RetryPolicy,
    budget: Arc<RateLimitBudget>,
}

impl DiscordClient {
    pub fn new(
        credentials: Credentials,
        channel_type: ChannelType,
        policy: RetryPolicy,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .user_agent(concat!("hookcord/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            credentials,
            channel_type,
            policy,
            budget: Arc::new(RateLimitBudget::new()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.credentials.clone(),
            config.channel_type,
            config.retry.clone(),
        )
    }

    fn post(&self, url: Url) -> RequestBuilder {
        let request = self.http.post(url);
        match &self.credentials {
            Credentials::Bot { token, .. } => request.header(AUTHORIZATION, format!("Bot {}", token)),
            Credentials::Webhook { .. } => request,
        }
    }

    async fn send<B, T>(
        &self,
        operation: &'static str,
        route: &str,
        url: &Url,
        body: &B,
    ) -> Result<T, DeliveryError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let policy = &self.policy;
        let mut last_error = String::new();

        for attempt in 1..=policy.max_attempts {
            self.budget.acquire(route).await;

            let request = self
                .post(url.clone())
                .header(ATTEMPT_HEADER, (attempt - 1).to_string())
                .json(body);

            let wait = match self.attempt::<T>(request, route).await {
                DeliveryOutcome::Delivered(value) => {
                    debug!(
                        component = "delivery",
                        event = "delivery.sent",
                        operation = operation,
                        attempt = attempt,
                    );
                    return Ok(value);
                }
                DeliveryOutcome::Rejected { status, body } => {
                    return Err(DeliveryError::Rejected {
                        operation,
                        status,
                        body,
                    });
                }
                DeliveryOutcome::RateLimited(limit) => {
                    let wait = limit.retry_after.unwrap_or_else(|| policy.backoff(attempt));
                    last_error = format!("rate limited for {}ms", wait.as_millis());
                    warn!(
                        component = "delivery",
                        event = "delivery.rate_limited",
                        operation = operation,
                        attempt = attempt,
                        global = limit.global,
                        retry_after_ms = wait.as_millis() as u64,
                    );
                    if limit.global {
                        // acquire() at the top of the next attempt does the waiting
                        self.budget.block_global(wait);
                        Duration::ZERO
                    } else {
                        wait
                    }
                }
                DeliveryOutcome::Failed { reason } => {
                    let wait = policy.backoff(attempt);
                    warn!(
                        component = "delivery",
                        event = "delivery.retryable_failure",
                        operation = operation,
                        attempt = attempt,
                        reason = %reason,
                        backoff_ms = wait.as_millis() as u64,
                    );
                    last_error = reason;
                    wait
                }
            };

            if attempt < policy.max_attempts && !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }

        Err(DeliveryError::Exhausted {
            operation,
            attempts: policy.max_attempts,
            last_error,
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        route: &str,
    ) -> DeliveryOutcome<T> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    reason: format!("transport error: {}", e),
                }
            }
        };

        let status = response.status();
        self.budget.observe_headers(route, response.headers());
        let headers = response.headers().clone();

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if status.is_success() => {
                // The call landed; retrying would duplicate it
                return DeliveryOutcome::Rejected {
                    status: status.as_u16(),
                    body: format!("unreadable response body: {}", e),
                };
            }
            Err(e) => {
                return DeliveryOutcome::Failed {
                    reason: format!("HTTP {}: unreadable body: {}", status.as_u16(), e),
                }
            }
        };

        if status.is_success() {
            return match serde_json::from_str::<T>(&body) {
                Ok(value) => DeliveryOutcome::Delivered(value),
                Err(e) => DeliveryOutcome::Rejected {
                    status: status.as_u16(),
                    body: format!("unexpected response ({}): {}", e, snippet(&body)),
                },
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            return DeliveryOutcome::RateLimited(parse_rate_limit(&headers, &body));
        }

        if status.is_server_error() {
            return DeliveryOutcome::Failed {
                reason: format!("HTTP {}: {}", status.as_u16(), snippet(&body)),
            };
        }

        DeliveryOutcome::Rejected {
            status: status.as_u16(),
            body: snippet(&body),
        }
    }

    fn webhook_url(url: &Url, thread_id: Option<&str>) -> Url {
        let mut url = url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wait", "true");
            if let Some(thread_id) = thread_id {
                query.append_pair("thread_id", thread_id);
            }
        }
        url
    }

    fn api_url(api_base: &Url, path: &str) -> Result<Url, DeliveryError> {
        let joined = format!("{}{}", api_base.as_str().trim_end_matches('/'), path);
        Url::parse(&joined).map_err(|_| DeliveryError::Unsupported("invalid Discord API URL"))
    }
}

#[async_trait]
impl Delivery for DiscordClient {
    async fn create_thread(&self, channel_id: &str, title: &str) -> Result<String, DeliveryError> {
        let starter = starter_message(title);

        match (&self.credentials, self.channel_type) {
            (Credentials::Bot { api_base, .. }, channel_type) => {
                let path = format!("/channels/{}/threads", channel_id);
                let url = Self::api_url(api_base, &path)?;
                let body = ThreadCreateBody {
                    name: title.to_string(),
                    kind: (channel_type == ChannelType::Text).then_some(PUBLIC_THREAD),
                    auto_archive_duration: AUTO_ARCHIVE_MINUTES,
                    message: (channel_type == ChannelType::Forum)
                        .then(|| MessageBody::from_message(&starter)),
                };
                let created: ChannelResponse =
                    self.send("create_thread", &path, &url, &body).await?;
                Ok(created.id)
            }
            (Credentials::Webhook { url, webhook_id }, ChannelType::Forum) => {
                let route = format!("/webhooks/{}", webhook_id);
                let mut body = MessageBody::from_message(&starter);
                body.thread_name = Some(title.to_string());
                let posted: MessageResponse = self
                    .send("create_thread", &route, &Self::webhook_url(url, None), &body)
                    .await?;
                // A forum post's starter message lives in the new thread
                Ok(posted.channel_id)
            }
            (Credentials::Webhook { .. }, ChannelType::Text) => Err(DeliveryError::Unsupported(
                "webhooks cannot open threads in text channels",
            )),
        }
    }

    async fn post_message(
        &self,
        target: &PostTarget,
        message: &OutboundMessage,
    ) -> Result<String, DeliveryError> {
        let mut message = message.clone();
        for cut in limits::enforce(&mut message) {
            warn!(
                component = "delivery",
                event = "delivery.truncated",
                detail = %cut,
            );
        }
        let body = MessageBody::from_message(&message);

        let posted: MessageResponse = match &self.credentials {
            Credentials::Bot { api_base, .. } => {
                let id = match target {
                    PostTarget::Channel(id) | PostTarget::Thread(id) => id,
                };
                let path = format!("/channels/{}/messages", id);
                let url = Self::api_url(api_base, &path)?;
                self.send("post_message", &path, &url, &body).await?
            }
            Credentials::Webhook { url, webhook_id } => {
                let thread_id = match target {
                    PostTarget::Channel(_) => None,
                    PostTarget::Thread(id) => Some(id.as_str()),
                };
                // Discord buckets executions per webhook, whatever the thread
                let route = format!("/webhooks/{}", webhook_id);
                self.send(
                    "post_message",
                    &route,
                    &Self::webhook_url(url, thread_id),
                    &body,
                )
                .await?
            }
        };

        Ok(posted.id)
    }
}

/// First message of a thread. Forum posts cannot exist without one.
fn starter_message(title: &str) -> OutboundMessage {
    OutboundMessage::new(Embed {
        title: title.to_string(),
        description: "Hook events for this session are relayed here.".to_string(),
        color: STARTER_COLOR,
        ..Default::default()
    })
}

fn snippet(body: &str) -> String {
    limits::truncate_chars(body, ERROR_BODY_MAX).unwrap_or_else(|| body.to_string())
}
