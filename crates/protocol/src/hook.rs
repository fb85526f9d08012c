//! Host → relay hook payloads

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields every hook payload carries regardless of kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<String>,
}

/// `PreToolUse` / `PostToolUse` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    #[serde(flatten)]
    pub context: EventContext,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub tool_response: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(flatten)]
    pub context: EventContext,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// `Stop` / `SubagentStop` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    #[serde(flatten)]
    pub context: EventContext,
    #[serde(default)]
    pub stop_hook_active: bool,
}

/// One hook invocation, discriminated by `hook_event_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookEvent {
    PreToolUse(ToolEvent),
    PostToolUse(ToolEvent),
    Notification(NotificationEvent),
    Stop(StopEvent),
    SubagentStop(StopEvent),
}

impl HookEvent {
    /// Decode a raw payload. A missing `timestamp` is filled from `now` so
    /// everything downstream can treat the event as complete.
    pub fn decode(raw: &str, now: impl FnOnce() -> String) -> Result<Self, serde_json::Error> {
        let mut event: HookEvent = serde_json::from_str(raw)?;
        let context = event.context_mut();
        if context.timestamp.is_none() {
            context.timestamp = Some(now());
        }
        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            HookEvent::PreToolUse(_) => EventKind::PreToolUse,
            HookEvent::PostToolUse(_) => EventKind::PostToolUse,
            HookEvent::Notification(_) => EventKind::Notification,
            HookEvent::Stop(_) => EventKind::Stop,
            HookEvent::SubagentStop(_) => EventKind::SubagentStop,
        }
    }

    pub fn context(&self) -> &EventContext {
        match self {
            HookEvent::PreToolUse(e) | HookEvent::PostToolUse(e) => &e.context,
            HookEvent::Notification(e) => &e.context,
            HookEvent::Stop(e) | HookEvent::SubagentStop(e) => &e.context,
        }
    }

    fn context_mut(&mut self) -> &mut EventContext {
        match self {
            HookEvent::PreToolUse(e) | HookEvent::PostToolUse(e) => &mut e.context,
            HookEvent::Notification(e) => &mut e.context,
            HookEvent::Stop(e) | HookEvent::SubagentStop(e) => &mut e.context,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.context().session_id
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.context().timestamp.as_deref()
    }

    /// Tool name for tool events, `None` otherwise
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            HookEvent::PreToolUse(e) | HookEvent::PostToolUse(e) => Some(&e.tool_name),
            _ => None,
        }
    }
}

/// Event discriminant, as spelled on the wire and in filter lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    PreToolUse,
    PostToolUse,
    Notification,
    Stop,
    SubagentStop,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::PreToolUse,
        EventKind::PostToolUse,
        EventKind::Notification,
        EventKind::Stop,
        EventKind::SubagentStop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::PreToolUse => "PreToolUse",
            EventKind::PostToolUse => "PostToolUse",
            EventKind::Notification => "Notification",
            EventKind::Stop => "Stop",
            EventKind::SubagentStop => "SubagentStop",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{}'", s))
    }
}
