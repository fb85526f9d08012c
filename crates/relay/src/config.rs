//! Relay configuration.
//!
//! Every option is a CLI flag with an environment fallback (the hook host
//! exports the variables). [`Config::from_args`] validates once; the result is
//! immutable and handed to the dispatch engine and delivery client.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Args, ValueEnum};
use reqwest::Url;
use thiserror::Error;

use hookcord_protocol::{EventKind, HookEvent};

use crate::delivery::RetryPolicy;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord's shortest snowflake
const MIN_SNOWFLAKE_LEN: usize = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ChannelType {
    Text,
    Forum,
}

#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    /// Webhook URL (webhook mode)
    #[arg(long, env = "DISCORD_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,

    /// Bot token (bot mode, requires --channel-id)
    #[arg(long, env = "DISCORD_TOKEN", hide_env_values = true)]
    pub bot_token: Option<String>,

    #[arg(long, env = "DISCORD_CHANNEL_ID")]
    pub channel_id: Option<String>,

    /// Group each session's messages into its own thread
    #[arg(
        long,
        env = "DISCORD_USE_THREADS",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set,
        default_value = "false"
    )]
    pub use_threads: bool,

    #[arg(long, env = "DISCORD_CHANNEL_TYPE", value_enum, default_value = "text")]
    pub channel_type: ChannelType,

    #[arg(long, env = "DISCORD_THREAD_PREFIX", default_value = "Session")]
    pub thread_prefix: String,

    /// Only relay these events (comma separated; empty = all)
    #[arg(long, env = "DISCORD_ENABLED_EVENTS", value_delimiter = ',')]
    pub enabled_events: Vec<String>,

    #[arg(long, env = "DISCORD_DISABLED_EVENTS", value_delimiter = ',')]
    pub disabled_events: Vec<String>,

    /// Never relay tool events for these tools (comma separated)
    #[arg(long, env = "DISCORD_DISABLED_TOOLS", value_delimiter = ',')]
    pub disabled_tools: Vec<String>,

    /// User pinged on Notification and Stop events
    #[arg(long, env = "DISCORD_MENTION_USER_ID")]
    pub mention_user_id: Option<String>,

    #[arg(
        long,
        env = "DISCORD_DEBUG",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set,
        default_value = "false"
    )]
    pub debug: bool,

    #[arg(long, env = "DISCORD_API_BASE", default_value = DEFAULT_API_BASE, hide = true)]
    pub api_base: String,

    #[arg(long, env = "HOOKCORD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Attempts per Discord call, including the first
    #[arg(long, env = "HOOKCORD_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    #[arg(long, env = "HOOKCORD_BASE_DELAY_MS", default_value_t = 500)]
    pub base_delay_ms: u64,

    #[arg(long, env = "HOOKCORD_MAX_DELAY_MS", default_value_t = 8_000)]
    pub max_delay_ms: u64,

    #[arg(long, env = "HOOKCORD_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Upper bound on one whole dispatch
    #[arg(long, env = "HOOKCORD_DEADLINE_SECS", default_value_t = 60)]
    pub deadline_secs: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "no Discord credentials: set DISCORD_WEBHOOK_URL, or DISCORD_TOKEN together with DISCORD_CHANNEL_ID"
    )]
    MissingCredentials,
    #[error("invalid webhook URL '{0}': expected .../webhooks/<id>/<token>")]
    InvalidWebhookUrl(String),
    #[error("invalid channel id '{0}': must be numeric")]
    InvalidChannelId(String),
    #[error("invalid mention user id '{0}': must be at least 17 digits")]
    InvalidMentionUserId(String),
    #[error("invalid API base URL '{0}'")]
    InvalidApiBase(String),
    #[error("{0}")]
    UnknownEvent(String),
    #[error("thread mode on a text channel needs bot credentials; webhooks can only open threads in forum channels")]
    ThreadsNeedBot,
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Webhook { url: Url, webhook_id: String },
    Bot {
        token: String,
        channel_id: String,
        api_base: Url,
    },
}

/// Allow/deny lists applied before any lookup or network call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilters {
    /// Empty means every kind is enabled
    pub enabled_events: BTreeSet<EventKind>,
    pub disabled_events: BTreeSet<EventKind>,
    pub disabled_tools: BTreeSet<String>,
}

impl EventFilters {
    pub fn allows(&self, event: &HookEvent) -> bool {
        let kind = event.kind();
        if !self.enabled_events.is_empty() && !self.enabled_events.contains(&kind) {
            return false;
        }
        if self.disabled_events.contains(&kind) {
            return false;
        }
        match event.tool_name() {
            Some(tool) => !self.disabled_tools.contains(tool),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub use_threads: bool,
    pub channel_type: ChannelType,
    pub thread_prefix: String,
    pub filters: EventFilters,
    pub mention_user_id: Option<String>,
    pub retry: RetryPolicy,
    pub deadline: Duration,
    pub debug: bool,
}

impl Config {
    pub fn from_args(args: &RelayArgs) -> Result<Self, ConfigError> {
        let credentials = resolve_credentials(args)?;

        if args.use_threads
            && args.channel_type == ChannelType::Text
            && matches!(credentials, Credentials::Webhook { .. })
        {
            return Err(ConfigError::ThreadsNeedBot);
        }

        let mention_user_id = match non_empty(args.mention_user_id.as_deref()) {
            Some(id) if is_snowflake(id) => Some(id.to_string()),
            Some(id) => return Err(ConfigError::InvalidMentionUserId(id.to_string())),
            None => None,
        };

        if args.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }

        let filters = EventFilters {
            enabled_events: parse_events(&args.enabled_events)?,
            disabled_events: parse_events(&args.disabled_events)?,
            disabled_tools: list_entries(&args.disabled_tools)
                .map(str::to_string)
                .collect(),
        };

        let thread_prefix = non_empty(Some(&args.thread_prefix))
            .unwrap_or("Session")
            .to_string();

        Ok(Self {
            credentials,
            use_threads: args.use_threads,
            channel_type: args.channel_type,
            thread_prefix,
            filters,
            mention_user_id,
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                base_delay: Duration::from_millis(args.base_delay_ms),
                multiplier: 2,
                max_delay: Duration::from_millis(args.max_delay_ms.max(args.base_delay_ms)),
                request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            },
            deadline: Duration::from_secs(args.deadline_secs.max(1)),
            debug: args.debug,
        })
    }

    /// Key the thread store files bindings under: the channel id in bot mode,
    /// the webhook id in webhook mode (a webhook is pinned to one channel).
    pub fn channel_key(&self) -> String {
        match &self.credentials {
            Credentials::Bot { channel_id, .. } => channel_id.clone(),
            Credentials::Webhook { webhook_id, .. } => format!("webhook:{}", webhook_id),
        }
    }

    pub fn mode_label(&self) -> &'static str {
        match self.credentials {
            Credentials::Bot { .. } => "bot",
            Credentials::Webhook { .. } => "webhook",
        }
    }
}

fn resolve_credentials(args: &RelayArgs) -> Result<Credentials, ConfigError> {
    let token = non_empty(args.bot_token.as_deref());
    let channel = non_empty(args.channel_id.as_deref());

    if let (Some(token), Some(channel_id)) = (token, channel) {
        if !channel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidChannelId(channel_id.to_string()));
        }
        let api_base = Url::parse(args.api_base.trim_end_matches('/'))
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ConfigError::InvalidApiBase(args.api_base.clone()))?;
        return Ok(Credentials::Bot {
            token: token.to_string(),
            channel_id: channel_id.to_string(),
            api_base,
        });
    }

    match non_empty(args.webhook_url.as_deref()) {
        Some(raw) => {
            let url = Url::parse(raw)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .ok_or_else(|| ConfigError::InvalidWebhookUrl(raw.to_string()))?;
            let webhook_id = webhook_id(&url)
                .ok_or_else(|| ConfigError::InvalidWebhookUrl(raw.to_string()))?;
            Ok(Credentials::Webhook { url, webhook_id })
        }
        None => Err(ConfigError::MissingCredentials),
    }
}

/// `<id>` from `.../webhooks/<id>/<token>`
fn webhook_id(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let idx = segments.iter().position(|s| *s == "webhooks")?;
    let id = segments.get(idx + 1)?;
    let token = segments.get(idx + 2)?;
    let id_ok = !id.is_empty() && id.chars().all(|c| c.is_ascii_digit());
    (id_ok && !token.is_empty()).then(|| id.to_string())
}

fn is_snowflake(id: &str) -> bool {
    id.len() >= MIN_SNOWFLAKE_LEN && id.chars().all(|c| c.is_ascii_digit())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn list_entries<'a>(raw: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
    raw.iter().map(|s| s.trim()).filter(|s| !s.is_empty())
}

fn parse_events(raw: &[String]) -> Result<BTreeSet<EventKind>, ConfigError> {
    list_entries(raw)
        .map(|name| name.parse::<EventKind>().map_err(ConfigError::UnknownEvent))
        .collect()
}
