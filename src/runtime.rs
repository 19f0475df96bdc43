//! Runtime events emitted by the coordinator for the UI layer.
//!
//! These are the user-visible side of the session: status changes, notices
//! and transcript lines. Diagnostics go to `tracing` instead.

use crate::pipeline::session::SessionState;

/// Events that describe what the widget is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// Session lifecycle moved to `state`.
    SessionStateChanged { state: SessionState },
    /// Session could not be started. The user must start again.
    StartupFailed { message: String },
    /// A stalled stream was detected and is being rebuilt.
    Reconnecting,
    /// Query held until the session is active.
    QueryQueued { query: String, pending: usize },
    /// Query dropped because the session was closed.
    InputRejected { query: String },
    /// User turn accepted and sent to the backend.
    UserTurn { text: String },
    /// Full assistant reply received.
    AssistantReply { text: String },
    /// One assistant sentence to reveal in the transcript.
    AssistantSentence { text: String },
    /// The backend request for one turn failed.
    ChatError { message: String },
    /// Speech output went busy or idle.
    SpeakingChanged { active: bool },
    /// Continuous recognition turned on or off.
    MicrophoneChanged { active: bool },
    /// Conversation history was cleared (explicitly or by logout).
    HistoryCleared,
    /// Login state changed; `username` is `None` after logout.
    AuthChanged { username: Option<String> },
}
