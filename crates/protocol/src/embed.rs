//! Rich message types shared by the formatter and the delivery client

use serde::{Deserialize, Serialize};

/// A Discord embed. Field names match the Discord API so the struct can be
/// serialized straight into a request body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub color: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

impl EmbedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline: false,
        }
    }

    pub fn inline(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            inline: true,
            ..Self::new(name, value)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Wire-ready message built from one hook event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Plain content, used for mention pings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub embed: Embed,
    /// User pinged by `content`; the only mention Discord is allowed to resolve
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention_user_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(embed: Embed) -> Self {
        Self {
            content: None,
            embed,
            mention_user_id: None,
        }
    }

    /// Ping `user_id` alongside the embed
    pub fn with_mention(mut self, user_id: &str) -> Self {
        self.content = Some(format!("<@{}>", user_id));
        self.mention_user_id = Some(user_id.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_skips_empty_optional_parts() {
        let embed = Embed {
            title: "Stop".to_string(),
            color: 0x9B59B6,
            ..Default::default()
        };
        let json = serde_json::to_value(&embed).expect("serialize embed");
        assert_eq!(json, serde_json::json!({"title":"Stop","color":0x9B59B6}));
    }

    #[test]
    fn mention_sets_content_and_allowed_user() {
        let msg = OutboundMessage::new(Embed::default()).with_mention("123456789012345678");
        assert_eq!(msg.content.as_deref(), Some("<@123456789012345678>"));
        assert_eq!(msg.mention_user_id.as_deref(), Some("123456789012345678"));
    }
}
