//! Process-wide rate-limit budget shared by every in-flight Discord call.
//!
//! Two gates: a global one (set by a 429 with `global: true`, stalls every
//! caller) and per-route ones (set when Discord reports an exhausted bucket,
//! stalls only calls on that route). A plain per-call 429 does not touch
//! either gate; the caller that received it sleeps on its own.

use std::sync::Mutex;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tracing::debug;

use hookcord_protocol::wire::RateLimitResponse;

const REMAINING: &str = "x-ratelimit-remaining";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const RETRY_AFTER: &str = "retry-after";

/// Longest wait honored from a server directive; larger values are clamped
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
pub struct RateLimitBudget {
    global_until: Mutex<Option<Instant>>,
    routes: DashMap<String, Instant>,
}

impl RateLimitBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until neither the global gate nor `route`'s gate is closed.
    pub async fn acquire(&self, route: &str) {
        while let Some(until) = self.blocked_until(route) {
            debug!(
                component = "rate_limit",
                event = "rate_limit.waiting",
                route = %route,
                wait_ms = until.saturating_duration_since(Instant::now()).as_millis() as u64,
            );
            tokio::time::sleep_until(until).await;
        }
    }

    /// Latest instant any gate covering `route` stays closed, if still in the future
    pub fn blocked_until(&self, route: &str) -> Option<Instant> {
        let now = Instant::now();
        let global = *self
            .global_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let route_until = self.routes.get(route).map(|entry| *entry.value());

        let until = match (global, route_until) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }?;

        if until > now {
            Some(until)
        } else {
            self.routes.remove_if(route, |_, t| *t <= now);
            None
        }
    }

    pub fn block_route(&self, route: &str, wait: Duration) {
        let until = gate_until(wait);
        self.routes
            .entry(route.to_string())
            .and_modify(|t| *t = (*t).max(until))
            .or_insert(until);
    }

    pub fn block_global(&self, wait: Duration) {
        let until = gate_until(wait);
        let mut guard = self
            .global_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(guard.map_or(until, |t| t.max(until)));
    }

    /// Close `route` until its bucket resets when Discord says it is empty.
    pub fn observe_headers(&self, route: &str, headers: &HeaderMap) {
        let remaining = header_str(headers, REMAINING).and_then(|v| v.parse::<u64>().ok());
        if remaining != Some(0) {
            return;
        }
        if let Some(reset) = header_str(headers, RESET_AFTER).and_then(parse_seconds) {
            debug!(
                component = "rate_limit",
                event = "rate_limit.bucket_exhausted",
                route = %route,
                reset_ms = reset.as_millis() as u64,
            );
            self.block_route(route, reset);
        }
    }
}

/// What a 429 response asks of us
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimited {
    pub retry_after: Option<Duration>,
    pub global: bool,
}

/// Read the retry directive from a 429. The JSON body is authoritative; the
/// `Retry-After` header (whole seconds) is the fallback.
pub fn parse_rate_limit(headers: &HeaderMap, body: &str) -> RateLimited {
    let parsed: Option<RateLimitResponse> = serde_json::from_str(body).ok();
    let from_body = parsed
        .as_ref()
        .and_then(|b| b.retry_after)
        .and_then(seconds_to_duration);
    let from_header = header_str(headers, RETRY_AFTER).and_then(parse_seconds);

    let global = parsed.map(|b| b.global).unwrap_or(false)
        || header_str(headers, GLOBAL).is_some_and(|v| v.eq_ignore_ascii_case("true"));

    RateLimited {
        retry_after: from_body.or(from_header),
        global,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_seconds(value: &str) -> Option<Duration> {
    seconds_to_duration(value.trim().parse().ok()?)
}

/// Non-negative, finite seconds, clamped to [`MAX_RETRY_AFTER`]
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let secs = secs.min(MAX_RETRY_AFTER.as_secs_f64());
    Duration::try_from_secs_f64(secs).ok()
}

fn gate_until(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(MAX_RETRY_AFTER)).unwrap_or(now)
}
