//! Discord REST request and response bodies (only the subset hookcord uses)

use serde::{Deserialize, Serialize};

use crate::embed::{Embed, OutboundMessage};

/// Discord channel type for a public thread under a text channel
pub const PUBLIC_THREAD: u8 = 11;

/// Threads archive after a day of inactivity
pub const AUTO_ARCHIVE_MINUTES: u32 = 1440;

/// Body for `POST /channels/{id}/messages` and `POST /webhooks/{id}/{token}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
    pub allowed_mentions: AllowedMentions,
    /// Webhooks on forum channels open a new post when this is set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
}

impl MessageBody {
    pub fn from_message(message: &OutboundMessage) -> Self {
        Self {
            content: message.content.clone(),
            embeds: vec![message.embed.clone()],
            allowed_mentions: AllowedMentions::only(message.mention_user_id.as_deref()),
            thread_name: None,
        }
    }
}

/// Restricts which mentions in `content` Discord resolves. `parse` stays empty
/// so `@everyone` or role text inside tool output never pings anyone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllowedMentions {
    pub parse: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

impl AllowedMentions {
    pub fn only(user_id: Option<&str>) -> Self {
        Self {
            parse: Vec::new(),
            users: user_id.map(|id| vec![id.to_string()]).unwrap_or_default(),
        }
    }
}

/// Body for `POST /channels/{id}/threads`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadCreateBody {
    pub name: String,
    /// Set for text channels; forum channels infer the type
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<u8>,
    pub auto_archive_duration: u32,
    /// Forum posts require a starter message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    pub channel_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelResponse {
    pub id: String,
}

/// 429 body. `retry_after` is in seconds and may be fractional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RateLimitResponse {
    #[serde(default)]
    pub retry_after: Option<f64>,
    #[serde(default)]
    pub global: bool,
}
