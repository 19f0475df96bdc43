//! Session orchestrator: turn-taking between user input, queued assistant
//! speech and a live media session that can drop and reconnect.
//!
//! All coordinator state lives in one control task. Vendor operations run
//! in short-lived worker tasks and post a [`Completion`] back; the control
//! task applies it only if the identity it was issued under (session
//! generation, utterance epoch, conversation number) is still current, so a
//! late completion of a cancelled operation is a no-op.

use crate::config::WidgetConfig;
use crate::error::{Result, WidgetError};
use crate::history::ConversationHistory;
use crate::pipeline::messages::{BackendJob, Command, Completion, CoordinatorSnapshot, Utterance};
use crate::pipeline::pending::PendingQueryBuffer;
use crate::pipeline::segment::split_sentences;
use crate::pipeline::session::{LivenessVerdict, SessionMonitor, SessionState, spawn_health_ticker};
use crate::pipeline::speech_queue::{FinishOutcome, SpeakTicket, SpeechOutputQueue};
use crate::providers::{
    AvatarSynthesizer, ChatBackend, MediaTransport, RelayTokenSource, SpeakOutcome,
    SpeechRecognizer, TrackKind, TransportEvent,
};
use crate::runtime::RuntimeEvent;
use crate::store::{AUTH_TOKEN_KEY, CHAT_HISTORY_KEY, LocalStore, USERNAME_KEY};
use crate::tts::SsmlBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runtime event broadcast capacity.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Upper bound on a stop-speaking request before speech resumes anyway.
const STOP_SPEAKING_TIMEOUT: Duration = Duration::from_secs(5);

/// The external collaborators a coordinator drives.
#[derive(Clone)]
pub struct Capabilities {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub synthesizer: Arc<dyn AvatarSynthesizer>,
    pub transport: Arc<dyn MediaTransport>,
    pub backend: Arc<dyn ChatBackend>,
    pub relay: Arc<dyn RelayTokenSource>,
    pub store: Arc<dyn LocalStore>,
}

/// Builder for the widget's control task.
///
/// Construct on widget mount, [`spawn`](Self::spawn), and dispose of the
/// returned handle on teardown.
pub struct SessionCoordinator {
    config: WidgetConfig,
    caps: Capabilities,
    cancel: CancellationToken,
    runtime_tx: Option<broadcast::Sender<RuntimeEvent>>,
}

impl SessionCoordinator {
    pub fn new(config: WidgetConfig, caps: Capabilities) -> Self {
        Self {
            config,
            caps,
            cancel: CancellationToken::new(),
            runtime_tx: None,
        }
    }

    /// Publish runtime events on an existing broadcast channel.
    pub fn with_runtime_events(mut self, tx: broadcast::Sender<RuntimeEvent>) -> Self {
        self.runtime_tx = Some(tx);
        self
    }

    /// Token that shuts the control task down when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the control and backend tasks. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Config`] if the configuration fails
    /// [`WidgetConfig::validate`].
    pub fn spawn(self) -> Result<CoordinatorHandle> {
        self.config.validate()?;
        let events = self
            .runtime_tx
            .unwrap_or_else(|| broadcast::channel(EVENT_CHANNEL_SIZE).0);
        let session_id = if self.config.chat.session_id.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            self.config.chat.session_id.clone()
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (recognized_tx, recognized_rx) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Inactive);
        let (stop_fence_tx, _) = watch::channel(0_u64);
        let (conversation_tx, conversation_rx) = watch::channel(0_u64);

        let backend_handle = {
            let backend = Arc::clone(&self.caps.backend);
            let session_id = session_id.clone();
            let completions = completion_tx.clone();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                run_backend_worker(
                    backend,
                    session_id,
                    backend_rx,
                    conversation_rx,
                    completions,
                    cancel,
                )
                .await;
            })
        };

        let history = load_history(self.caps.store.as_ref());
        let control = ControlLoop {
            ssml: SsmlBuilder::new(self.config.speech.tts_voice.clone()),
            config: self.config,
            caps: self.caps,
            session_id,
            cancel: self.cancel.clone(),
            events: events.clone(),
            state_tx,
            commands: command_rx,
            completion_tx,
            completion_rx,
            recognized_tx,
            recognized_rx,
            backend_tx,
            stop_fence: Arc::new(stop_fence_tx),
            stop_requests: 0,
            monitor: SessionMonitor::new(),
            speech: SpeechOutputQueue::new(),
            pending: PendingQueryBuffer::new(),
            history,
            session_cancel: None,
            teardown: None,
            conversation: 0,
            conversation_tx,
            microphone_active: false,
            microphone_starting: false,
        };

        let control_handle = tokio::spawn(async move {
            control.run().await;
            let _ = backend_handle.await;
        });

        Ok(CoordinatorHandle {
            commands: command_tx,
            events,
            state: state_rx,
            cancel: self.cancel,
            task: control_handle,
        })
    }
}

/// Front door to a running coordinator.
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<RuntimeEvent>,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CoordinatorHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| WidgetError::Channel("coordinator has shut down".to_owned()))
    }

    /// Begin the session handshake.
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Tear the session down; pending queries are discarded.
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Submit typed or otherwise captured user input.
    pub fn submit(&self, query: impl Into<String>) -> Result<()> {
        self.send(Command::Submit(query.into()))
    }

    /// Queue an utterance directly, bypassing the backend.
    pub fn speak(&self, text: impl Into<String>, trailing_silence_ms: u32) -> Result<()> {
        self.send(Command::Speak(Utterance::new(text, trailing_silence_ms)))
    }

    pub fn stop_speaking(&self) -> Result<()> {
        self.send(Command::StopSpeaking)
    }

    pub fn set_microphone(&self, enabled: bool) -> Result<()> {
        self.send(Command::SetMicrophone(enabled))
    }

    pub fn clear_history(&self) -> Result<()> {
        self.send(Command::ClearHistory)
    }

    pub fn login(&self, username: impl Into<String>, token: impl Into<String>) -> Result<()> {
        self.send(Command::Login {
            username: username.into(),
            token: token.into(),
        })
    }

    pub fn logout(&self) -> Result<()> {
        self.send(Command::Logout)
    }

    /// Current state after every command sent before this call was applied.
    pub async fn snapshot(&self) -> Result<CoordinatorSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await
            .map_err(|_| WidgetError::Channel("coordinator dropped snapshot request".to_owned()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch channel of the session state.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Resolve once the session reaches `target`.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == target)
            .await
            .map(|_| ())
            .map_err(|_| WidgetError::Channel("coordinator has shut down".to_owned()))
    }

    /// Shut the coordinator down, releasing every vendor resource.
    pub async fn dispose(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "coordinator task panicked");
        }
    }
}

/// State owned by the control task.
struct ControlLoop {
    config: WidgetConfig,
    caps: Capabilities,
    ssml: SsmlBuilder,
    session_id: String,
    cancel: CancellationToken,
    events: broadcast::Sender<RuntimeEvent>,
    state_tx: watch::Sender<SessionState>,
    commands: mpsc::UnboundedReceiver<Command>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    recognized_tx: mpsc::UnboundedSender<String>,
    recognized_rx: mpsc::UnboundedReceiver<String>,
    backend_tx: mpsc::UnboundedSender<BackendJob>,
    /// Highest stop-speaking request that has settled. Speak requests
    /// wait on it so a late stop never cancels a newer utterance.
    stop_fence: Arc<watch::Sender<u64>>,
    stop_requests: u64,
    monitor: SessionMonitor,
    speech: SpeechOutputQueue,
    pending: PendingQueryBuffer,
    history: ConversationHistory,
    /// Cancels the startup task, health ticker and transport event logger
    /// of the current generation.
    session_cancel: Option<CancellationToken>,
    /// Teardown of the previous transport; the next startup awaits it.
    teardown: Option<JoinHandle<()>>,
    /// Bumped on session stop so queries of the old session are neither
    /// sent nor answered.
    conversation: u64,
    /// Publishes `conversation` to the backend worker.
    conversation_tx: watch::Sender<u64>,
    microphone_active: bool,
    microphone_starting: bool,
}

impl ControlLoop {
    async fn run(mut self) {
        info!(session_id = %self.session_id, "coordinator running");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(done) = self.completion_rx.recv() => self.handle_completion(done),
                Some(text) = self.recognized_rx.recv() => self.on_recognized(text),
            }
        }
        self.shutdown().await;
        info!("coordinator stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.begin_session(),
            Command::Stop => self.stop_session(),
            Command::Submit(text) => self.handle_user_query(&text),
            Command::Speak(utterance) => {
                self.enqueue_speech(&utterance.text, utterance.trailing_silence_ms);
            }
            Command::StopSpeaking => self.stop_speaking(),
            Command::SetMicrophone(enabled) => self.set_microphone(enabled),
            Command::ClearHistory => self.clear_history(),
            Command::Login { username, token } => self.login(&username, &token),
            Command::Logout => self.logout(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Startup { generation, result } => self.on_startup(generation, result),
            Completion::Speech {
                epoch,
                text,
                outcome,
            } => self.on_speech_finished(epoch, &text, outcome),
            Completion::Reply {
                conversation,
                result,
            } => self.on_reply(conversation, result),
            Completion::Microphone {
                generation,
                enabled,
                result,
            } => self.on_microphone(generation, enabled, result),
            Completion::HealthTick { generation } => self.on_health_tick(generation),
        }
    }

    // ── session lifecycle ───────────────────────────────────────────────

    fn begin_session(&mut self) {
        let Some(generation) = self.monitor.begin_start() else {
            info!(state = %self.monitor.state(), "start ignored");
            return;
        };
        info!(generation, "starting avatar session");

        if self.history.seed_system(&self.config.chat.system_prompt) {
            debug!("seeded system prompt");
        }

        let token = self.cancel.child_token();
        if let Some(previous) = self.session_cancel.replace(token.clone()) {
            previous.cancel();
        }

        let ctx = StartupContext {
            relay: Arc::clone(&self.caps.relay),
            transport: Arc::clone(&self.caps.transport),
            synthesizer: Arc::clone(&self.caps.synthesizer),
            video_start_timeout: self.config.session.video_start_timeout(),
            activation_delay: self.config.session.activation_delay(),
            previous_teardown: self.teardown.take(),
        };
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                () = token.cancelled() => Err(WidgetError::Cancelled),
                result = run_startup(ctx) => result,
            };
            let _ = tx.send(Completion::Startup { generation, result });
        });

        self.publish_state();
    }

    fn on_startup(
        &mut self,
        generation: u64,
        result: Result<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        if !self.monitor.is_current(generation) || self.monitor.state() != SessionState::Starting
        {
            debug!(generation, "ignoring startup result for a cancelled attempt");
            return;
        }

        match result {
            Ok(transport_events) => {
                self.monitor.activate(generation);
                let token = self
                    .session_cancel
                    .get_or_insert_with(|| self.cancel.child_token())
                    .clone();
                spawn_transport_logger(transport_events, token.clone());
                spawn_health_ticker(
                    self.config.session.health_check_interval(),
                    generation,
                    self.completion_tx.clone(),
                    token,
                );
                self.publish_state();

                let was_speaking = self.speech.is_speaking();
                if let Some(ticket) = self.speech.resume() {
                    self.begin_utterance(ticket);
                }
                self.publish_speaking(was_speaking);

                let queued = self.pending.drain();
                info!(
                    generation,
                    pending = queued.len(),
                    "session active, processing pending queries"
                );
                for query in queued {
                    self.handle_user_query(&query.text);
                }
            }
            Err(e) => {
                self.monitor.fail_start(generation);
                if let Some(token) = self.session_cancel.take() {
                    token.cancel();
                }
                error!(generation, error = %e, "failed to start avatar session");
                self.spawn_teardown();
                self.emit(RuntimeEvent::StartupFailed {
                    message: e.to_string(),
                });
                self.publish_state();
            }
        }
    }

    fn on_health_tick(&mut self, generation: u64) {
        let sample = self.caps.transport.liveness_sample();
        if self.monitor.observe(generation, sample) != LivenessVerdict::Stalled {
            return;
        }

        warn!(generation, "video stream stalled, reconnecting");
        if let Some(token) = self.session_cancel.take() {
            token.cancel();
        }
        self.emit(RuntimeEvent::Reconnecting);
        self.publish_state();

        let was_speaking = self.speech.is_speaking();
        self.speech
            .pause(self.config.session.repeat_speaking_sentence_after_reconnection);
        self.publish_speaking(was_speaking);

        self.spawn_teardown();
        self.begin_session();
    }

    fn stop_session(&mut self) {
        let previous = self.monitor.stop();
        if let Some(token) = self.session_cancel.take() {
            token.cancel();
        }
        let dropped = self.pending.clear();
        self.conversation = self.conversation.wrapping_add(1);
        self.conversation_tx.send_replace(self.conversation);

        let was_speaking = self.speech.is_speaking();
        self.speech.stop();
        self.speech.pause(false);
        self.publish_speaking(was_speaking);

        if self.microphone_active || self.microphone_starting {
            self.microphone_active = false;
            self.microphone_starting = false;
            let recognizer = Arc::clone(&self.caps.recognizer);
            tokio::spawn(async move {
                if let Err(e) = recognizer.stop_continuous().await {
                    warn!(error = %e, "failed to stop recognition");
                }
            });
            self.emit(RuntimeEvent::MicrophoneChanged { active: false });
        }

        self.spawn_teardown();
        info!(%previous, dropped, "avatar session closed");
        self.publish_state();
    }

    /// Close synthesizer and transport in the background. The next
    /// startup waits for this before connecting.
    fn spawn_teardown(&mut self) {
        let previous = self.teardown.take();
        let synthesizer = Arc::clone(&self.caps.synthesizer);
        let transport = Arc::clone(&self.caps.transport);
        self.teardown = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            synthesizer.close().await;
            transport.close().await;
        }));
    }

    async fn shutdown(&mut self) {
        if let Some(token) = self.session_cancel.take() {
            token.cancel();
        }
        if let Some(teardown) = self.teardown.take() {
            let _ = teardown.await;
        }
        if self.microphone_active || self.microphone_starting {
            if let Err(e) = self.caps.recognizer.stop_continuous().await {
                warn!(error = %e, "failed to stop recognition during shutdown");
            }
        }
        if matches!(
            self.monitor.state(),
            SessionState::Starting | SessionState::Active | SessionState::Reconnecting
        ) {
            self.caps.synthesizer.close().await;
            self.caps.transport.close().await;
        }
        self.monitor.stop();
        self.speech.stop();
        self.publish_state();
    }

    // ── chat turns ──────────────────────────────────────────────────────

    fn handle_user_query(&mut self, text: &str) {
        let query = text.trim();
        if query.is_empty() {
            return;
        }
        match self.monitor.state() {
            SessionState::Active => {}
            SessionState::Closed => {
                info!("session closed, rejecting query");
                self.emit(RuntimeEvent::InputRejected {
                    query: query.to_owned(),
                });
                return;
            }
            _ => {
                let pending = self.pending.push(query);
                info!(pending, "session not active, queuing query");
                self.emit(RuntimeEvent::QueryQueued {
                    query: query.to_owned(),
                    pending,
                });
                return;
            }
        }

        self.history.push_user(query);
        self.emit(RuntimeEvent::UserTurn {
            text: query.to_owned(),
        });
        self.stop_speaking();

        let job = BackendJob {
            conversation: self.conversation,
            query: query.to_owned(),
        };
        if self.backend_tx.send(job).is_err() {
            error!("backend worker is gone");
            self.emit(RuntimeEvent::ChatError {
                message: "chat backend unavailable".to_owned(),
            });
        }
    }

    fn on_reply(&mut self, conversation: u64, result: Result<String>) {
        if conversation != self.conversation {
            debug!(conversation, "dropping reply for a closed session");
            return;
        }
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "chat request failed");
                self.emit(RuntimeEvent::ChatError {
                    message: e.to_string(),
                });
                return;
            }
        };
        if reply.trim().is_empty() {
            warn!("empty response from chat backend");
            return;
        }

        self.history.push_assistant(reply.clone());
        self.save_history();
        self.emit(RuntimeEvent::AssistantReply {
            text: reply.clone(),
        });

        let align = self.config.chat.align_display_with_speech;
        for sentence in split_sentences(&reply) {
            if !align {
                self.emit(RuntimeEvent::AssistantSentence {
                    text: sentence.clone(),
                });
            }
            self.enqueue_speech(&sentence, 0);
        }
    }

    // ── speech output ───────────────────────────────────────────────────

    fn enqueue_speech(&mut self, text: &str, trailing_silence_ms: u32) {
        let was_speaking = self.speech.is_speaking();
        if let Some(ticket) = self.speech.enqueue(text, trailing_silence_ms) {
            self.begin_utterance(ticket);
        }
        self.publish_speaking(was_speaking);
    }

    fn begin_utterance(&mut self, ticket: SpeakTicket) {
        let SpeakTicket {
            epoch,
            utterance,
            repeat,
        } = ticket;
        if self.config.chat.align_display_with_speech && !repeat {
            self.emit(RuntimeEvent::AssistantSentence {
                text: utterance.text.clone(),
            });
        }

        let ssml = self.ssml.build(&utterance);
        let synthesizer = Arc::clone(&self.caps.synthesizer);
        let tx = self.completion_tx.clone();
        let required_stops = self.stop_requests;
        let mut fence = self.stop_fence.subscribe();
        tokio::spawn(async move {
            let _ = fence.wait_for(|settled| *settled >= required_stops).await;
            let outcome = synthesizer.speak_ssml(&ssml).await;
            let _ = tx.send(Completion::Speech {
                epoch,
                text: utterance.text,
                outcome,
            });
        });
    }

    fn on_speech_finished(&mut self, epoch: u64, text: &str, outcome: Result<SpeakOutcome>) {
        match &outcome {
            Ok(SpeakOutcome::Completed { result_id }) => {
                info!(%result_id, "speech synthesized for text [{text}]");
            }
            Ok(SpeakOutcome::NotCompleted { result_id, reason }) => {
                warn!(%result_id, %reason, "speech synthesis did not complete");
            }
            Err(e) => warn!(error = %e, "error speaking SSML"),
        }

        let was_speaking = self.speech.is_speaking();
        match self.speech.on_utterance_finished(epoch) {
            FinishOutcome::Next(ticket) => self.begin_utterance(ticket),
            FinishOutcome::Idle => {}
            FinishOutcome::Stale => {
                debug!(epoch, "ignoring completion for a cancelled utterance");
                return;
            }
        }
        self.publish_speaking(was_speaking);
    }

    fn stop_speaking(&mut self) {
        let was_speaking = self.speech.is_speaking();
        if self.speech.stop() {
            self.stop_requests = self.stop_requests.wrapping_add(1);
            let sequence = self.stop_requests;
            let synthesizer = Arc::clone(&self.caps.synthesizer);
            let fence = Arc::clone(&self.stop_fence);
            tokio::spawn(async move {
                match tokio::time::timeout(STOP_SPEAKING_TIMEOUT, synthesizer.stop_speaking())
                    .await
                {
                    Ok(Ok(())) => info!("stop speaking request sent"),
                    Ok(Err(e)) => warn!(error = %e, "error stopping speaking"),
                    Err(_) => warn!("stop speaking request timed out"),
                }
                fence.send_modify(|settled| *settled = (*settled).max(sequence));
            });
        }
        self.publish_speaking(was_speaking);
    }

    // ── microphone ──────────────────────────────────────────────────────

    fn set_microphone(&mut self, enabled: bool) {
        let recognizer = Arc::clone(&self.caps.recognizer);
        let tx = self.completion_tx.clone();
        let generation = self.monitor.generation();

        if enabled {
            if self.microphone_active || self.microphone_starting {
                return;
            }
            if self.monitor.state() != SessionState::Active {
                warn!(state = %self.monitor.state(), "microphone unavailable until the session is active");
                return;
            }
            self.microphone_starting = true;
            let recognized = self.recognized_tx.clone();
            tokio::spawn(async move {
                let result = recognizer.start_continuous(recognized).await;
                let _ = tx.send(Completion::Microphone {
                    generation,
                    enabled: true,
                    result,
                });
            });
        } else {
            if !self.microphone_active && !self.microphone_starting {
                return;
            }
            self.microphone_active = false;
            self.microphone_starting = false;
            self.emit(RuntimeEvent::MicrophoneChanged { active: false });
            tokio::spawn(async move {
                let result = recognizer.stop_continuous().await;
                let _ = tx.send(Completion::Microphone {
                    generation,
                    enabled: false,
                    result,
                });
            });
        }
    }

    fn on_microphone(&mut self, generation: u64, enabled: bool, result: Result<()>) {
        if !enabled {
            if let Err(e) = result {
                warn!(error = %e, "failed to stop recognition");
            }
            return;
        }

        if !self.microphone_starting || !self.monitor.is_current(generation) {
            // Stopped or torn down while recognition was starting.
            if result.is_ok() {
                let recognizer = Arc::clone(&self.caps.recognizer);
                tokio::spawn(async move {
                    if let Err(e) = recognizer.stop_continuous().await {
                        warn!(error = %e, "failed to stop recognition");
                    }
                });
            }
            return;
        }

        self.microphone_starting = false;
        match result {
            Ok(()) => {
                info!("continuous recognition started");
                self.microphone_active = true;
                self.emit(RuntimeEvent::MicrophoneChanged { active: true });
            }
            Err(e) => {
                warn!(error = %e, "failed to start recognition");
                self.microphone_active = false;
                self.emit(RuntimeEvent::MicrophoneChanged { active: false });
            }
        }
    }

    fn on_recognized(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.microphone_active {
            debug!("dropping recognition result after microphone stopped");
            return;
        }
        if self.speech.is_speaking() {
            info!("user started speaking, stopping avatar speech");
            self.stop_speaking();
        }
        self.handle_user_query(text);
    }

    // ── history and auth ────────────────────────────────────────────────

    fn clear_history(&mut self) {
        self.history.clear_conversation();
        self.save_history();
        info!("chat history cleared");
        self.emit(RuntimeEvent::HistoryCleared);
    }

    fn login(&mut self, username: &str, token: &str) {
        let store = self.caps.store.as_ref();
        for (key, value) in [(AUTH_TOKEN_KEY, token), (USERNAME_KEY, username)] {
            if let Err(e) = store.set(key, value) {
                warn!(key, error = %e, "failed to persist login");
            }
        }
        info!(username, "logged in");
        self.emit(RuntimeEvent::AuthChanged {
            username: Some(username.to_owned()),
        });
    }

    fn logout(&mut self) {
        let store = self.caps.store.as_ref();
        for key in [AUTH_TOKEN_KEY, USERNAME_KEY, CHAT_HISTORY_KEY] {
            if let Err(e) = store.remove(key) {
                warn!(key, error = %e, "failed to clear stored value");
            }
        }
        self.history.reset();
        if !matches!(
            self.monitor.state(),
            SessionState::Inactive | SessionState::Closed
        ) {
            self.history.seed_system(&self.config.chat.system_prompt);
        }
        info!("logged out");
        self.emit(RuntimeEvent::HistoryCleared);
        self.emit(RuntimeEvent::AuthChanged { username: None });
    }

    fn save_history(&self) {
        let encoded = match serde_json::to_string(&self.history) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "failed to encode chat history");
                return;
            }
        };
        if let Err(e) = self.caps.store.set(CHAT_HISTORY_KEY, &encoded) {
            warn!(error = %e, "failed to save chat history");
        }
    }

    // ── publishing ──────────────────────────────────────────────────────

    fn emit(&self, event: RuntimeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_state(&self) {
        let state = self.monitor.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(%state, "session state changed");
            self.emit(RuntimeEvent::SessionStateChanged { state });
        }
    }

    fn publish_speaking(&self, was_speaking: bool) {
        let speaking = self.speech.is_speaking();
        if speaking != was_speaking {
            self.emit(RuntimeEvent::SpeakingChanged { active: speaking });
        }
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            state: self.monitor.state(),
            history: self.history.turns().to_vec(),
            pending_queries: self.pending.len(),
            queued_utterances: self.speech.len(),
            speaking: self.speech.speaking_text().map(str::to_owned),
            microphone_active: self.microphone_active,
            session_id: self.session_id.clone(),
        }
    }
}

fn load_history(store: &dyn LocalStore) -> ConversationHistory {
    match store.get(CHAT_HISTORY_KEY) {
        Ok(Some(encoded)) => match serde_json::from_str(&encoded) {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "stored chat history is unreadable; starting fresh");
                ConversationHistory::new()
            }
        },
        Ok(None) => ConversationHistory::new(),
        Err(e) => {
            warn!(error = %e, "failed to read chat history");
            ConversationHistory::new()
        }
    }
}

/// Dependencies of one startup attempt.
struct StartupContext {
    relay: Arc<dyn RelayTokenSource>,
    transport: Arc<dyn MediaTransport>,
    synthesizer: Arc<dyn AvatarSynthesizer>,
    video_start_timeout: Duration,
    activation_delay: Duration,
    previous_teardown: Option<JoinHandle<()>>,
}

/// Handshake: credentials → transport → avatar → first video frame → settle.
///
/// Returns the transport's event stream for logging once active.
async fn run_startup(ctx: StartupContext) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
    if let Some(previous) = ctx.previous_teardown {
        let _ = previous.await;
    }
    if !ctx.synthesizer.is_available() {
        return Err(WidgetError::SdkUnavailable(
            "avatar synthesizer is not loaded".to_owned(),
        ));
    }

    let credentials = ctx.relay.fetch().await?;
    info!(relay = %credentials.url, "relay credentials fetched");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    ctx.transport.connect(&credentials, events_tx).await?;
    ctx.synthesizer.start_avatar().await?;
    info!("avatar started");

    match tokio::time::timeout(ctx.video_start_timeout, wait_for_video(&mut events_rx)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(WidgetError::Startup(format!(
                "video track did not start within {}ms",
                ctx.video_start_timeout.as_millis()
            )));
        }
    }

    tokio::time::sleep(ctx.activation_delay).await;
    Ok(events_rx)
}

async fn wait_for_video(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Result<()> {
    while let Some(event) = events.recv().await {
        log_transport_event(&event);
        if event == TransportEvent::TrackPlaying(TrackKind::Video) {
            return Ok(());
        }
    }
    Err(WidgetError::Transport(
        "transport closed before the video track started".to_owned(),
    ))
}

fn log_transport_event(event: &TransportEvent) {
    match event {
        TransportEvent::TrackAvailable(kind) => debug!(?kind, "remote track available"),
        TransportEvent::TrackPlaying(kind) => info!(?kind, "media channel connected"),
        TransportEvent::ConnectionStateChanged(state) => info!(%state, "transport status"),
        TransportEvent::DataChannelMessage(message) => debug!(%message, "transport event"),
    }
}

fn spawn_transport_logger(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => log_transport_event(&event),
                    None => break,
                },
            }
        }
    });
}

/// Dispatch backend requests strictly in submission order.
///
/// Jobs from a conversation that has since ended are skipped, and the
/// request in flight is abandoned as soon as its conversation ends.
async fn run_backend_worker(
    backend: Arc<dyn ChatBackend>,
    session_id: String,
    mut jobs: mpsc::UnboundedReceiver<BackendJob>,
    mut conversation: watch::Receiver<u64>,
    completions: mpsc::UnboundedSender<Completion>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            () = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };
        if *conversation.borrow() != job.conversation {
            debug!(conversation = job.conversation, "skipping query of a closed session");
            continue;
        }
        debug!(conversation = job.conversation, "sending query to chat backend");
        let result = tokio::select! {
            () = cancel.cancelled() => break,
            () = conversation_ended(&mut conversation, job.conversation) => {
                info!(conversation = job.conversation, "chat request abandoned, session closed");
                continue;
            }
            result = backend.ask(&session_id, &job.query) => result,
        };
        let reply = Completion::Reply {
            conversation: job.conversation,
            result,
        };
        if completions.send(reply).is_err() {
            break;
        }
    }
}

/// Resolve once the current conversation is no longer `conversation`.
async fn conversation_ended(current: &mut watch::Receiver<u64>, conversation: u64) {
    if current.wait_for(|c| *c != conversation).await.is_err() {
        // Control loop gone; shutdown arrives through the cancel token.
        std::future::pending::<()>().await;
    }
}
