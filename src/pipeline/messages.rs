//! Message types passed between the coordinator and its worker tasks.

use crate::error::WidgetError;
use crate::providers::{SpeakOutcome, TransportEvent};
use tokio::sync::{mpsc, oneshot};

/// A unit of assistant speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Plain text to speak (escaped into SSML at synthesis time).
    pub text: String,
    /// Silence appended after the text, in milliseconds.
    pub trailing_silence_ms: u32,
}

impl Utterance {
    pub fn new(text: impl Into<String>, trailing_silence_ms: u32) -> Self {
        Self {
            text: text.into(),
            trailing_silence_ms,
        }
    }
}

/// A user query submitted before the session was ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuery {
    pub text: String,
}

/// Requests from a [`CoordinatorHandle`](crate::pipeline::coordinator::CoordinatorHandle).
#[derive(Debug)]
pub(crate) enum Command {
    Start,
    Stop,
    Submit(String),
    Speak(Utterance),
    StopSpeaking,
    SetMicrophone(bool),
    ClearHistory,
    Login { username: String, token: String },
    Logout,
    Snapshot(oneshot::Sender<CoordinatorSnapshot>),
}

/// Results of asynchronous operations, posted back to the control task.
///
/// Every variant carries the identity it was issued under so the control
/// task can drop completions for operations it has since cancelled.
#[derive(Debug)]
pub(crate) enum Completion {
    Startup {
        generation: u64,
        result: Result<mpsc::UnboundedReceiver<TransportEvent>, WidgetError>,
    },
    Speech {
        epoch: u64,
        text: String,
        outcome: Result<SpeakOutcome, WidgetError>,
    },
    Reply {
        conversation: u64,
        result: Result<String, WidgetError>,
    },
    Microphone {
        generation: u64,
        enabled: bool,
        result: Result<(), WidgetError>,
    },
    HealthTick {
        generation: u64,
    },
}

/// A query handed to the backend worker.
#[derive(Debug, Clone)]
pub(crate) struct BackendJob {
    pub conversation: u64,
    pub query: String,
}

/// Point-in-time view of coordinator state.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub state: crate::pipeline::session::SessionState,
    pub history: Vec<crate::history::ChatTurn>,
    pub pending_queries: usize,
    pub queued_utterances: usize,
    pub speaking: Option<String>,
    pub microphone_active: bool,
    pub session_id: String,
}
