//! Terminal host for the avatar chat coordinator.
//!
//! Reads lines from stdin: `/start`, `/stop`, `/mic`, `/hush`, `/clear`,
//! `/say <text>` (as if recognized from the microphone) and `/quit`. Any
//! other line is submitted as a query. The avatar is text-only here: each
//! utterance is printed and "spoken" for a time proportional to its length.
//!
//! All tracing output goes to stderr so stdout stays a clean transcript.

use async_trait::async_trait;
use avatar_chat::providers::{
    AvatarSynthesizer, HttpChatBackend, HttpRelayTokenSource, MediaTransport, RelayCredentials,
    RelayTokenSource, SpeakOutcome, SpeechRecognizer, TrackKind, TransportEvent,
};
use avatar_chat::store::JsonFileStore;
use avatar_chat::config::{AvatarConfig, SpeechServiceConfig};
use avatar_chat::{Capabilities, RuntimeEvent, SessionCoordinator, WidgetConfig, WidgetError};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Speaking time per character of the text-only avatar.
const SPEAK_MS_PER_CHAR: u64 = 40;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("avatar_chat=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(WidgetConfig::default_config_path);
    let config = if config_path.exists() {
        WidgetConfig::from_file(&config_path)?
    } else {
        info!(path = %config_path.display(), "no config file, using defaults");
        WidgetConfig::default()
    };
    config.validate()?;

    let relay: Arc<dyn RelayTokenSource> = if config.speech.subscription_key.is_empty() {
        Arc::new(LoopbackRelay)
    } else {
        Arc::new(HttpRelayTokenSource::from_config(&config.speech))
    };
    let recognizer = Arc::new(ConsoleRecognizer::new(&config.speech));
    let caps = Capabilities {
        recognizer: recognizer.clone(),
        synthesizer: Arc::new(TextAvatar::new(config.avatar.clone())),
        transport: Arc::new(LoopbackTransport::default()),
        backend: Arc::new(HttpChatBackend::new(config.chat.backend_url.clone())),
        relay,
        store: Arc::new(JsonFileStore::open(avatar_chat::widget_dirs::store_file())?),
    };

    let coordinator = SessionCoordinator::new(config, caps);
    let cancel = coordinator.cancel_token();
    let handle = coordinator.spawn()?;

    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("avatar-chat v{}", env!("CARGO_PKG_VERSION"));
    println!("Commands: /start /stop /mic /hush /clear /say <text> /quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        match line {
            "" => {}
            "/quit" => break,
            "/start" => handle.start()?,
            "/stop" => handle.stop()?,
            "/hush" => handle.stop_speaking()?,
            "/clear" => handle.clear_history()?,
            "/mic" => {
                let active = handle.snapshot().await?.microphone_active;
                handle.set_microphone(!active)?;
            }
            _ => match line.strip_prefix("/say ") {
                Some(spoken) => recognizer.hear(spoken),
                None => handle.submit(line)?,
            },
        }
    }

    handle.dispose().await;
    info!("avatar-chat shut down cleanly");
    Ok(())
}

fn print_event(event: &RuntimeEvent) {
    match event {
        RuntimeEvent::SessionStateChanged { state } => println!("[session {state}]"),
        RuntimeEvent::StartupFailed { message } => {
            println!("[could not start session: {message}]");
        }
        RuntimeEvent::Reconnecting => println!("[reconnecting]"),
        RuntimeEvent::QueryQueued { pending, .. } => {
            println!("[queued until the session is active ({pending} pending)]");
        }
        RuntimeEvent::InputRejected { .. } => println!("[session closed, press /start]"),
        RuntimeEvent::UserTurn { text } => println!("you: {text}"),
        RuntimeEvent::AssistantSentence { text } => println!("avatar: {text}"),
        RuntimeEvent::ChatError { message } => println!("[chat error: {message}]"),
        RuntimeEvent::MicrophoneChanged { active } => {
            println!("[microphone {}]", if *active { "on" } else { "off" });
        }
        RuntimeEvent::HistoryCleared => println!("[history cleared]"),
        RuntimeEvent::AssistantReply { .. }
        | RuntimeEvent::SpeakingChanged { .. }
        | RuntimeEvent::AuthChanged { .. } => {}
    }
}

/// Relay stand-in when no subscription key is configured.
struct LoopbackRelay;

#[async_trait]
impl RelayTokenSource for LoopbackRelay {
    async fn fetch(&self) -> avatar_chat::Result<RelayCredentials> {
        Ok(RelayCredentials {
            url: "turn:localhost:3478".to_owned(),
            username: "console".to_owned(),
            credential: String::new(),
        })
    }
}

/// Transport whose video position always advances while connected.
#[derive(Default)]
struct LoopbackTransport {
    connected_at: Mutex<Option<Instant>>,
}

#[async_trait]
impl MediaTransport for LoopbackTransport {
    async fn connect(
        &self,
        credentials: &RelayCredentials,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> avatar_chat::Result<()> {
        info!(relay = %credentials.url, "loopback transport connecting");
        *self
            .connected_at
            .lock()
            .map_err(|_| WidgetError::Transport("transport lock poisoned".to_owned()))? =
            Some(Instant::now());
        for event in [
            TransportEvent::ConnectionStateChanged("connected".to_owned()),
            TransportEvent::TrackAvailable(TrackKind::Audio),
            TransportEvent::TrackAvailable(TrackKind::Video),
            TransportEvent::TrackPlaying(TrackKind::Audio),
            TransportEvent::TrackPlaying(TrackKind::Video),
        ] {
            let _ = events.send(event);
        }
        Ok(())
    }

    fn liveness_sample(&self) -> Option<Duration> {
        let connected_at = *self.connected_at.lock().ok()?;
        connected_at.map(|t| t.elapsed())
    }

    async fn close(&self) {
        if let Ok(mut connected_at) = self.connected_at.lock() {
            *connected_at = None;
        }
    }
}

/// Avatar that "speaks" by waiting; the transcript is printed from events.
struct TextAvatar {
    appearance: AvatarConfig,
    stop: tokio::sync::Notify,
    spoken: std::sync::atomic::AtomicU64,
}

impl TextAvatar {
    fn new(appearance: AvatarConfig) -> Self {
        Self {
            appearance,
            stop: tokio::sync::Notify::new(),
            spoken: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AvatarSynthesizer for TextAvatar {
    async fn start_avatar(&self) -> avatar_chat::Result<()> {
        info!(
            character = %self.appearance.character,
            style = %self.appearance.style,
            "text avatar started"
        );
        Ok(())
    }

    async fn speak_ssml(&self, ssml: &str) -> avatar_chat::Result<SpeakOutcome> {
        let id = self
            .spoken
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            .to_string();
        let duration = Duration::from_millis(SPEAK_MS_PER_CHAR * ssml_text_len(ssml) as u64);
        tokio::select! {
            () = tokio::time::sleep(duration) => Ok(SpeakOutcome::Completed { result_id: id }),
            () = self.stop.notified() => Ok(SpeakOutcome::NotCompleted {
                result_id: id,
                reason: "stopped".to_owned(),
            }),
        }
    }

    async fn stop_speaking(&self) -> avatar_chat::Result<()> {
        self.stop.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        self.stop.notify_waiters();
    }
}

/// Characters outside markup in an SSML document.
fn ssml_text_len(ssml: &str) -> usize {
    let mut in_tag = false;
    ssml.chars()
        .filter(|&c| match c {
            '<' => {
                in_tag = true;
                false
            }
            '>' => {
                in_tag = false;
                false
            }
            _ => !in_tag,
        })
        .count()
}

/// Recognizer fed from `/say` lines.
struct ConsoleRecognizer {
    locales: Vec<String>,
    endpoint: String,
    sink: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ConsoleRecognizer {
    fn new(speech: &SpeechServiceConfig) -> Self {
        Self {
            locales: speech.stt_locales.clone(),
            endpoint: speech.recognition_endpoint(),
            sink: Mutex::new(None),
        }
    }

    fn hear(&self, text: &str) {
        let sink = self.sink.lock().ok().and_then(|s| s.clone());
        match sink {
            Some(sink) => {
                let _ = sink.send(text.to_owned());
            }
            None => println!("[microphone is off, press /mic]"),
        }
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    async fn start_continuous(
        &self,
        recognized: mpsc::UnboundedSender<String>,
    ) -> avatar_chat::Result<()> {
        info!(
            locales = ?self.locales,
            endpoint = %self.endpoint,
            "listening for /say lines in place of continuous recognition"
        );
        *self
            .sink
            .lock()
            .map_err(|_| WidgetError::Recognition("recognizer lock poisoned".to_owned()))? =
            Some(recognized);
        Ok(())
    }

    async fn stop_continuous(&self) -> avatar_chat::Result<()> {
        if let Ok(mut sink) = self.sink.lock() {
            *sink = None;
        }
        Ok(())
    }
}
