//! Avatar chat: session and turn-taking coordinator for a voice/avatar
//! chat widget.
//!
//! The coordinator sits between the user (typed or recognized speech), a
//! chat backend, and a talking-avatar session delivered over a real-time
//! media transport:
//! User input → pending buffer → chat backend → sentence split → speech queue → avatar
//!
//! # Architecture
//!
//! - **Session**: `Inactive → Starting → Active`, with stall detection
//!   driving `Active → Reconnecting → Starting`
//! - **Pending input**: queries submitted before the session is live are
//!   buffered and replayed in order on activation
//! - **Speech output**: one utterance at a time, FIFO, with cancellable
//!   in-flight speech for barge-in
//! - **Capabilities**: recognizer, synthesizer, transport, backend, relay
//!   token source and local store are traits in [`providers`] and [`store`]

pub mod config;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod providers;
pub mod runtime;
pub mod store;
pub mod tts;
pub mod widget_dirs;

pub use config::WidgetConfig;
pub use error::{Result, WidgetError};
pub use pipeline::coordinator::{Capabilities, CoordinatorHandle, SessionCoordinator};
pub use pipeline::messages::CoordinatorSnapshot;
pub use pipeline::session::SessionState;
pub use runtime::RuntimeEvent;
