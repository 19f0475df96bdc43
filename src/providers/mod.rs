//! Contracts for the external collaborators the coordinator drives.
//!
//! Speech recognition, avatar synthesis and the real-time media transport
//! are opaque vendor capabilities; the coordinator only sees these traits.
//! New vendors only need to implement them.

pub mod http;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

pub use http::{HttpChatBackend, HttpRelayTokenSource};

/// Short-lived relay credentials authorizing one media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCredentials {
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Kind of a remote media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Notifications emitted by a connected transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote track was attached.
    TrackAvailable(TrackKind),
    /// A remote track started playing.
    TrackPlaying(TrackKind),
    /// ICE / peer connection state changed (e.g. `connected`, `failed`).
    ConnectionStateChanged(String),
    /// Message received on the event data channel.
    DataChannelMessage(String),
}

/// Result of one `speak` request, as reported by the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    /// Audio for the whole document was synthesized.
    Completed { result_id: String },
    /// The synthesizer finished without completing (cancelled, rejected).
    NotCompleted { result_id: String, reason: String },
}

/// Continuous speech recognition.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin continuous recognition; final recognized phrases are sent on
    /// `recognized` until [`stop_continuous`](Self::stop_continuous).
    async fn start_continuous(&self, recognized: mpsc::UnboundedSender<String>) -> Result<()>;

    async fn stop_continuous(&self) -> Result<()>;
}

/// Avatar video + speech synthesis over the media transport.
#[async_trait]
pub trait AvatarSynthesizer: Send + Sync {
    /// Whether the underlying SDK is loaded and usable.
    fn is_available(&self) -> bool {
        true
    }

    /// Attach the avatar to the connected transport.
    async fn start_avatar(&self) -> Result<()>;

    /// Speak one SSML document. Resolves when playback of it ends.
    async fn speak_ssml(&self, ssml: &str) -> Result<SpeakOutcome>;

    /// Ask the avatar to stop the utterance in flight.
    async fn stop_speaking(&self) -> Result<()>;

    /// Release the synthesizer. Best-effort.
    async fn close(&self);
}

/// Real-time media transport (peer connection).
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Establish a media session with the relay. Track and connection
    /// notifications are delivered on `events` for the session's lifetime.
    async fn connect(
        &self,
        credentials: &RelayCredentials,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<()>;

    /// Current playback position of the remote video, if a video track is
    /// attached. Must advance while media is flowing.
    fn liveness_sample(&self) -> Option<Duration>;

    /// Tear down the media session. Best-effort.
    async fn close(&self);
}

/// Chat backend answering one query per call.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `query` for `session_id`; returns the assistant message.
    async fn ask(&self, session_id: &str, query: &str) -> Result<String>;
}

/// Source of relay credentials for transport setup.
#[async_trait]
pub trait RelayTokenSource: Send + Sync {
    async fn fetch(&self) -> Result<RelayCredentials>;
}
