//! SSML documents for avatar speech synthesis.

mod ssml;

pub use ssml::{SsmlBuilder, escape_text};
