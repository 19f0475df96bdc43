//! Turn-taking pipeline: session lifecycle, pending input and speech output.

pub mod coordinator;
pub mod messages;
pub mod pending;
pub mod segment;
pub mod session;
pub mod speech_queue;
