//! Builds the SSML document sent for each utterance.

use crate::pipeline::messages::Utterance;

const SPEAK_OPEN: &str = "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' \
xmlns:mstts='http://www.w3.org/2001/mstts' xml:lang='en-US'>";

/// Escape text for embedding inside an SSML element.
///
/// Maps `& < > " ' /` to entities so user and assistant text can never
/// close or inject markup.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(c),
        }
    }
    out
}

/// Renders utterances with a fixed voice and no leading silence.
#[derive(Debug, Clone)]
pub struct SsmlBuilder {
    voice: String,
}

impl SsmlBuilder {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
        }
    }

    pub fn build(&self, utterance: &Utterance) -> String {
        let mut ssml = String::with_capacity(utterance.text.len() + 256);
        ssml.push_str(SPEAK_OPEN);
        ssml.push_str("<voice name='");
        ssml.push_str(&escape_text(&self.voice));
        ssml.push_str("'><mstts:leadingsilence-exact value='0'/>");
        ssml.push_str(&escape_text(&utterance.text));
        if utterance.trailing_silence_ms > 0 {
            ssml.push_str(&format!(
                "<break time='{}ms' />",
                utterance.trailing_silence_ms
            ));
        }
        ssml.push_str("</voice></speak>");
        ssml
    }
}
