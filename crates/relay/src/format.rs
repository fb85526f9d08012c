//! Hook event → Discord embed.
//!
//! Pure: the same event and key always produce the same message. Nothing
//! here reads the clock; the embed timestamp is the event's own.

use serde_json::Value;

use hookcord_protocol::{
    Embed, EmbedField, EmbedFooter, HookEvent, NotificationEvent, OutboundMessage, StopEvent,
    ToolEvent,
};

use crate::classify::{FormatterKey, ToolFamily, ToolPhase};
use crate::limits::{self, FIELD_VALUE_MAX};

pub const COLOR_PRE_TOOL: u32 = 0x3498DB;
pub const COLOR_POST_TOOL: u32 = 0x2ECC71;
pub const COLOR_TOOL_ERROR: u32 = 0xE74C3C;
pub const COLOR_NOTIFICATION: u32 = 0xF39C12;
pub const COLOR_STOP: u32 = 0x9B59B6;
pub const COLOR_SUBAGENT_STOP: u32 = 0x8E44AD;

/// Longest code/output excerpt put in a description
const SNIPPET_MAX: usize = 1500;
const SESSION_PREFIX_LEN: usize = 8;
const TODO_LINES_MAX: usize = 20;

pub fn format(event: &HookEvent, key: FormatterKey) -> OutboundMessage {
    let mut embed = match (key, event) {
        (FormatterKey::Tool(family, phase), HookEvent::PreToolUse(tool))
        | (FormatterKey::Tool(family, phase), HookEvent::PostToolUse(tool)) => {
            tool_embed(tool, family, phase)
        }
        (FormatterKey::Notification, HookEvent::Notification(n)) => notification_embed(n),
        (FormatterKey::Stop, HookEvent::Stop(s)) => stop_embed(s, false),
        (FormatterKey::SubagentStop, HookEvent::SubagentStop(s)) => stop_embed(s, true),
        _ => Embed {
            title: event.kind().to_string(),
            color: COLOR_NOTIFICATION,
            ..Default::default()
        },
    };

    let context = event.context();
    embed.fields.push(EmbedField::inline(
        "Session",
        short_session(&context.session_id),
    ));
    if let Some(cwd) = context.cwd.as_deref().filter(|c| !c.is_empty()) {
        embed
            .fields
            .push(EmbedField::inline("Directory", inline_code(cwd)));
    }
    embed.footer = Some(EmbedFooter {
        text: format!("hookcord · {}", event.kind()),
    });
    embed.timestamp = context.timestamp.clone();

    OutboundMessage::new(embed)
}

fn tool_embed(tool: &ToolEvent, family: ToolFamily, phase: ToolPhase) -> Embed {
    let input = &tool.tool_input;
    let name = tool.tool_name.as_str();
    let mut fields = Vec::new();

    let (verb, mut description) = match family {
        ToolFamily::Bash => {
            if let Some(desc) = str_field(input, "description") {
                fields.push(EmbedField::new("Description", desc));
            }
            let command = str_field(input, "command").unwrap_or_default();
            ("Running", code_block("bash", command))
        }
        ToolFamily::Read => {
            push_path(&mut fields, input);
            if let Some(offset) = input.get("offset").and_then(Value::as_u64) {
                fields.push(EmbedField::inline("From line", offset.to_string()));
            }
            ("Reading", String::new())
        }
        ToolFamily::Write => {
            push_path(&mut fields, input);
            if let Some(content) = str_field(input, "content") {
                fields.push(EmbedField::inline(
                    "Size",
                    format!("{} lines", content.lines().count()),
                ));
            }
            ("Writing", String::new())
        }
        ToolFamily::Edit => {
            push_path(&mut fields, input);
            let description = match input.get("edits").and_then(Value::as_array) {
                Some(edits) => format!("{} edits", edits.len()),
                None => match (str_field(input, "old_string"), str_field(input, "new_string")) {
                    (Some(old), Some(new)) => diff_block(old, new),
                    _ => String::new(),
                },
            };
            ("Editing", description)
        }
        ToolFamily::Search => {
            if let Some(pattern) = str_field(input, "pattern") {
                fields.push(EmbedField::inline("Pattern", inline_code(pattern)));
            }
            if let Some(path) = str_field(input, "path") {
                fields.push(EmbedField::inline("Path", inline_code(path)));
            }
            ("Searching", String::new())
        }
        ToolFamily::Web => {
            if let Some(url) = str_field(input, "url") {
                fields.push(EmbedField::new("URL", url));
            }
            let query = str_field(input, "query")
                .or_else(|| str_field(input, "prompt"))
                .map(clip_snippet)
                .unwrap_or_default();
            ("Fetching", query)
        }
        ToolFamily::Task => {
            if let Some(agent) = str_field(input, "subagent_type") {
                fields.push(EmbedField::inline("Agent", agent));
            }
            let description = str_field(input, "description")
                .map(clip_snippet)
                .unwrap_or_default();
            ("Delegating", description)
        }
        ToolFamily::Todo => ("Planning", todo_list(input)),
        ToolFamily::Other => ("Calling", json_block(input)),
    };

    let (title, color) = match phase {
        ToolPhase::Pre => (format!("{}: {}", verb, name), COLOR_PRE_TOOL),
        ToolPhase::Post if response_failed(&tool.tool_response) => {
            (format!("Failed: {}", name), COLOR_TOOL_ERROR)
        }
        ToolPhase::Post => (format!("Completed: {}", name), COLOR_POST_TOOL),
    };

    if phase == ToolPhase::Post {
        if let Some(output) = response_text(&tool.tool_response) {
            fields.push(EmbedField::new("Output", field_code(&output)));
        }
        // Inputs were already shown on the Pre message
        if family == ToolFamily::Bash || family == ToolFamily::Other {
            description.clear();
        }
    }

    Embed {
        title,
        description,
        color,
        fields,
        ..Default::default()
    }
}

fn notification_embed(n: &NotificationEvent) -> Embed {
    Embed {
        title: n
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Needs attention".to_string()),
        description: n.message.clone(),
        color: COLOR_NOTIFICATION,
        ..Default::default()
    }
}

fn stop_embed(stop: &StopEvent, subagent: bool) -> Embed {
    let (title, description, color) = if subagent {
        (
            "Subagent finished",
            "A subagent completed its task.",
            COLOR_SUBAGENT_STOP,
        )
    } else {
        (
            "Session finished",
            "The agent finished responding.",
            COLOR_STOP,
        )
    };
    let mut fields = Vec::new();
    if stop.stop_hook_active {
        fields.push(EmbedField::inline("Stop hook", "active"));
    }
    Embed {
        title: title.to_string(),
        description: description.to_string(),
        color,
        fields,
        ..Default::default()
    }
}

fn push_path(fields: &mut Vec<EmbedField>, input: &Value) {
    if let Some(path) = str_field(input, "file_path").or_else(|| str_field(input, "notebook_path"))
    {
        fields.push(EmbedField::new("File", inline_code(path)));
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn short_session(session_id: &str) -> String {
    inline_code(&session_id.chars().take(SESSION_PREFIX_LEN).collect::<String>())
}

fn clip_snippet(text: &str) -> String {
    limits::truncate_chars(text, SNIPPET_MAX).unwrap_or_else(|| text.to_string())
}

fn fence_safe(text: &str) -> String {
    text.replace("```", "`\u{200b}``")
}

fn inline_code(text: &str) -> String {
    format!("`{}`", text.replace('`', "'"))
}

fn code_block(lang: &str, text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    format!("```{}\n{}\n```", lang, fence_safe(&clip_snippet(text)))
}

/// Code block sized for an embed field
fn field_code(text: &str) -> String {
    // fences and newlines
    let budget = FIELD_VALUE_MAX - 8;
    let body = fence_safe(text);
    let body = limits::truncate_chars(&body, budget).unwrap_or(body);
    format!("```\n{}\n```", body)
}

fn diff_block(old: &str, new: &str) -> String {
    let mut diff = String::new();
    for line in old.lines() {
        diff.push_str("- ");
        diff.push_str(line);
        diff.push('\n');
    }
    for line in new.lines() {
        diff.push_str("+ ");
        diff.push_str(line);
        diff.push('\n');
    }
    code_block("diff", diff.trim_end())
}

fn json_block(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => {
            let rendered = serde_json::to_string_pretty(other).unwrap_or_default();
            code_block("json", &rendered)
        }
    }
}

fn todo_list(input: &Value) -> String {
    let Some(todos) = input.get("todos").and_then(Value::as_array) else {
        return String::new();
    };
    let mut lines: Vec<String> = todos
        .iter()
        .take(TODO_LINES_MAX)
        .map(|todo| {
            let mark = match str_field(todo, "status") {
                Some("completed") => "✅",
                Some("in_progress") => "🔄",
                _ => "⬜",
            };
            format!("{} {}", mark, str_field(todo, "content").unwrap_or_default())
        })
        .collect();
    if todos.len() > TODO_LINES_MAX {
        lines.push(format!("… {} more", todos.len() - TODO_LINES_MAX));
    }
    lines.join("\n")
}

fn response_failed(response: &Value) -> bool {
    let flag = |key: &str| response.get(key).and_then(Value::as_bool);
    flag("is_error") == Some(true)
        || flag("success") == Some(false)
        || flag("interrupted") == Some(true)
        || str_field(response, "error").is_some_and(|e| !e.is_empty())
}

/// The most readable text a tool response carries
fn response_text(response: &Value) -> Option<String> {
    let text = match response {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Object(_) => {
            let stdout = str_field(response, "stdout").unwrap_or_default();
            let stderr = str_field(response, "stderr").unwrap_or_default();
            let error = str_field(response, "error").unwrap_or_default();
            if !stdout.is_empty() || !stderr.is_empty() || !error.is_empty() {
                [stdout, stderr, error]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join("\n")
            } else if let Some(content) = str_field(response, "content") {
                content.to_string()
            } else {
                serde_json::to_string(response).unwrap_or_default()
            }
        }
        other => other.to_string(),
    };
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, decode};

    fn event(json: &str) -> HookEvent {
        decode(json).expect("valid event")
    }

    fn render(json: &str) -> OutboundMessage {
        let e = event(json);
        format(&e, classify(&e))
    }

    #[test]
    fn bash_pre_shows_command() {
        let msg = render(
            r#"{"session_id":"abcdef123456","hook_event_name":"PreToolUse","timestamp":"2026-03-01T10:00:00Z",
                "cwd":"/work/repo","tool_name":"Bash","tool_input":{"command":"cargo fmt","description":"Format"}}"#,
        );
        assert_eq!(msg.embed.title, "Running: Bash");
        assert_eq!(msg.embed.color, COLOR_PRE_TOOL);
        assert_eq!(msg.embed.description, "```bash\ncargo fmt\n```");
        assert_eq!(msg.embed.timestamp.as_deref(), Some("2026-03-01T10:00:00Z"));

        let names: Vec<&str> = msg.embed.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["Description", "Session", "Directory"]);
        assert_eq!(msg.embed.fields[1].value, "`abcdef12`");
        assert!(msg.content.is_none());
    }

    #[test]
    fn post_tool_failure_is_red() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PostToolUse","tool_name":"Bash",
                "tool_input":{"command":"false"},"tool_response":{"stdout":"","stderr":"boom","is_error":true}}"#,
        );
        assert_eq!(msg.embed.title, "Failed: Bash");
        assert_eq!(msg.embed.color, COLOR_TOOL_ERROR);
        let output = msg.embed.fields.iter().find(|f| f.name == "Output").unwrap();
        assert_eq!(output.value, "```\nboom\n```");
    }

    #[test]
    fn post_tool_success_is_green() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PostToolUse","tool_name":"Read",
                "tool_input":{"file_path":"/a.rs"},"tool_response":{"success":true}}"#,
        );
        assert_eq!(msg.embed.title, "Completed: Read");
        assert_eq!(msg.embed.color, COLOR_POST_TOOL);
    }

    #[test]
    fn unknown_tool_uses_generic_template() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PreToolUse","tool_name":"mcp__db__query",
                "tool_input":{"sql":"select 1"}}"#,
        );
        assert_eq!(msg.embed.title, "Calling: mcp__db__query");
        assert!(msg.embed.description.starts_with("```json\n"));
        assert!(msg.embed.description.contains("select 1"));
    }

    #[test]
    fn edit_renders_diff() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PreToolUse","tool_name":"Edit",
                "tool_input":{"file_path":"/a.rs","old_string":"let a = 1;","new_string":"let a = 2;"}}"#,
        );
        assert_eq!(msg.embed.title, "Editing: Edit");
        assert_eq!(
            msg.embed.description,
            "```diff\n- let a = 1;\n+ let a = 2;\n```"
        );
        assert_eq!(msg.embed.fields[0].value, "`/a.rs`");
    }

    #[test]
    fn todo_list_marks_status() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PreToolUse","tool_name":"TodoWrite",
                "tool_input":{"todos":[{"content":"write tests","status":"completed"},{"content":"ship","status":"pending"}]}}"#,
        );
        assert_eq!(msg.embed.description, "✅ write tests\n⬜ ship");
    }

    #[test]
    fn notification_and_stop() {
        let note = render(
            r#"{"session_id":"s","hook_event_name":"Notification","message":"Permission needed"}"#,
        );
        assert_eq!(note.embed.title, "Needs attention");
        assert_eq!(note.embed.description, "Permission needed");
        assert_eq!(note.embed.color, COLOR_NOTIFICATION);

        let stop = render(r#"{"session_id":"s","hook_event_name":"SubagentStop"}"#);
        assert_eq!(stop.embed.title, "Subagent finished");
        assert_eq!(stop.embed.color, COLOR_SUBAGENT_STOP);
    }

    #[test]
    fn code_fences_in_input_cannot_escape() {
        let msg = render(
            r#"{"session_id":"s","hook_event_name":"PreToolUse","tool_name":"Bash",
                "tool_input":{"command":"echo ```"}}"#,
        );
        assert_eq!(msg.embed.description.matches("```").count(), 2);
    }

    #[test]
    fn formatting_is_idempotent() {
        let payloads = [
            r#"{"session_id":"s","hook_event_name":"PreToolUse","timestamp":"t","tool_name":"Bash","tool_input":{"command":"ls"}}"#,
            r#"{"session_id":"s","hook_event_name":"PostToolUse","timestamp":"t","tool_name":"Grep","tool_input":{"pattern":"x"},"tool_response":{"b":1,"a":2}}"#,
            r#"{"session_id":"s","hook_event_name":"Notification","timestamp":"t","message":"m"}"#,
            r#"{"session_id":"s","hook_event_name":"Stop","timestamp":"t","stop_hook_active":true}"#,
        ];
        for raw in payloads {
            let e = event(raw);
            let first = serde_json::to_vec(&format(&e, classify(&e))).unwrap();
            let second = serde_json::to_vec(&format(&e, classify(&e))).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn long_output_stays_inside_field_limit() {
        let stdout = "y".repeat(5000);
        let raw = format!(
            r#"{{"session_id":"s","hook_event_name":"PostToolUse","tool_name":"Bash","tool_input":{{}},"tool_response":{{"stdout":"{}"}}}}"#,
            stdout
        );
        let msg = render(&raw);
        let output = msg.embed.fields.iter().find(|f| f.name == "Output").unwrap();
        assert!(output.value.chars().count() <= FIELD_VALUE_MAX);
        assert!(output.value.ends_with("...\n```"));
    }
}
