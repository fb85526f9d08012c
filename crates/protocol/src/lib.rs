//! hookcord Protocol
//!
//! Shared types for hookcord: the hook payloads Claude Code writes to the
//! relay's stdin, and the Discord message bodies the relay sends out.

pub mod embed;
pub mod hook;
pub mod wire;

pub use embed::{Embed, EmbedField, EmbedFooter, OutboundMessage};
pub use hook::{EventContext, EventKind, HookEvent, NotificationEvent, StopEvent, ToolEvent};
