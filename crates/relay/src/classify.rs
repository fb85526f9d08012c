//! Event classification: filter decision and formatter selection.

use chrono::{SecondsFormat, Utc};
use thiserror::Error;

use hookcord_protocol::{HookEvent, ToolEvent};

use crate::config::EventFilters;

#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("empty hook payload")]
    Empty,
    #[error("malformed hook payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Decode one raw hook payload. A missing timestamp becomes "now".
pub fn decode(raw: &str) -> Result<HookEvent, ClassificationError> {
    if raw.trim().is_empty() {
        return Err(ClassificationError::Empty);
    }
    let event = HookEvent::decode(raw, || {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    })?;
    Ok(event)
}

/// Whether `event` passes the configured allow/deny lists
pub fn should_emit(event: &HookEvent, filters: &EventFilters) -> bool {
    filters.allows(event)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolPhase {
    Pre,
    Post,
}

/// Tools grouped by how their input is best summarized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFamily {
    Bash,
    Read,
    Write,
    Edit,
    Search,
    Web,
    Task,
    Todo,
    /// MCP tools and anything not known yet
    Other,
}

impl ToolFamily {
    pub fn of(tool_name: &str) -> Self {
        match tool_name {
            "Bash" | "BashOutput" | "KillShell" => ToolFamily::Bash,
            "Read" | "NotebookRead" => ToolFamily::Read,
            "Write" => ToolFamily::Write,
            "Edit" | "MultiEdit" | "NotebookEdit" => ToolFamily::Edit,
            "Glob" | "Grep" | "LS" => ToolFamily::Search,
            "WebFetch" | "WebSearch" => ToolFamily::Web,
            "Task" => ToolFamily::Task,
            "TodoWrite" => ToolFamily::Todo,
            _ => ToolFamily::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatterKey {
    Tool(ToolFamily, ToolPhase),
    Notification,
    Stop,
    SubagentStop,
}

/// Pick the formatter for `event`. Total: unknown tools fall back to
/// [`ToolFamily::Other`].
pub fn classify(event: &HookEvent) -> FormatterKey {
    match event {
        HookEvent::PreToolUse(ToolEvent { tool_name, .. }) => {
            FormatterKey::Tool(ToolFamily::of(tool_name), ToolPhase::Pre)
        }
        HookEvent::PostToolUse(ToolEvent { tool_name, .. }) => {
            FormatterKey::Tool(ToolFamily::of(tool_name), ToolPhase::Post)
        }
        HookEvent::Notification(_) => FormatterKey::Notification,
        HookEvent::Stop(_) => FormatterKey::Stop,
        HookEvent::SubagentStop(_) => FormatterKey::SubagentStop,
    }
}
