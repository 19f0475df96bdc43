//! Serializes assistant speech so only one utterance plays at a time.
//!
//! The queue is pure state: it decides *what* to speak next and hands the
//! caller a [`SpeakTicket`]; the coordinator performs the synthesis call and
//! reports back with the ticket's epoch. Each ticket gets a fresh epoch, so a
//! completion that arrives after [`SpeechOutputQueue::stop`] (or a pause) no
//! longer matches the current utterance and is ignored.

use crate::pipeline::messages::Utterance;
use std::collections::VecDeque;

/// Permission to speak one utterance, identified by `epoch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakTicket {
    pub epoch: u64,
    pub utterance: Utterance,
    /// The utterance was interrupted by a pause and is being spoken again.
    pub repeat: bool,
}

#[derive(Debug, Clone)]
struct Queued {
    utterance: Utterance,
    repeat: bool,
}

/// How a completion report was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The current utterance finished; speak this one next.
    Next(SpeakTicket),
    /// The current utterance finished and nothing else is queued.
    Idle,
    /// The report does not belong to the current utterance.
    Stale,
}

/// FIFO of pending utterances plus the one currently speaking.
#[derive(Debug)]
pub struct SpeechOutputQueue {
    pending: VecDeque<Queued>,
    speaking: Option<SpeakTicket>,
    next_epoch: u64,
    /// While paused nothing new starts; enqueued items wait.
    paused: bool,
}

impl Default for SpeechOutputQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechOutputQueue {
    /// A new queue starts paused: there is no session to speak into yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            speaking: None,
            next_epoch: 1,
            paused: true,
        }
    }

    /// Queue `text` for speech. Returns a ticket if it should start now.
    ///
    /// Blank text is ignored.
    pub fn enqueue(&mut self, text: &str, trailing_silence_ms: u32) -> Option<SpeakTicket> {
        if text.trim().is_empty() {
            return None;
        }
        let queued = Queued {
            utterance: Utterance::new(text, trailing_silence_ms),
            repeat: false,
        };
        if self.speaking.is_some() || self.paused {
            self.pending.push_back(queued);
            return None;
        }
        Some(self.begin(queued))
    }

    /// Apply a completion report (success or failure) for `epoch`.
    ///
    /// A failed synthesis advances the queue exactly like a successful one.
    pub fn on_utterance_finished(&mut self, epoch: u64) -> FinishOutcome {
        match &self.speaking {
            Some(ticket) if ticket.epoch == epoch => {}
            _ => return FinishOutcome::Stale,
        }
        self.speaking = None;
        match self.advance() {
            Some(ticket) => FinishOutcome::Next(ticket),
            None => FinishOutcome::Idle,
        }
    }

    /// Drop everything. Returns true if an utterance was in flight, i.e.
    /// the caller should ask the synthesizer to cancel it.
    pub fn stop(&mut self) -> bool {
        self.pending.clear();
        self.speaking.take().is_some()
    }

    /// Stop starting new utterances. When `requeue_current` is set the
    /// in-flight utterance goes back to the head of the queue.
    pub fn pause(&mut self, requeue_current: bool) {
        self.paused = true;
        if let Some(ticket) = self.speaking.take() {
            if requeue_current {
                self.pending.push_front(Queued {
                    utterance: ticket.utterance,
                    repeat: true,
                });
            }
        }
    }

    /// Resume after [`pause`](Self::pause). Returns a ticket if something
    /// was waiting.
    pub fn resume(&mut self) -> Option<SpeakTicket> {
        self.paused = false;
        if self.speaking.is_some() {
            return None;
        }
        self.advance()
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Text of the utterance currently speaking.
    pub fn speaking_text(&self) -> Option<&str> {
        self.speaking.as_ref().map(|t| t.utterance.text.as_str())
    }

    /// Number of utterances waiting behind the current one.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn advance(&mut self) -> Option<SpeakTicket> {
        if self.paused {
            return None;
        }
        let next = self.pending.pop_front()?;
        Some(self.begin(next))
    }

    fn begin(&mut self, queued: Queued) -> SpeakTicket {
        let ticket = SpeakTicket {
            epoch: self.next_epoch,
            utterance: queued.utterance,
            repeat: queued.repeat,
        };
        self.next_epoch = self.next_epoch.wrapping_add(1);
        self.speaking = Some(ticket.clone());
        ticket
    }
}
