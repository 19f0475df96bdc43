//! Sentence segmentation of assistant replies for incremental speech.

/// Sentence-level punctuation: ASCII plus full-width CJK forms.
pub const SENTENCE_PUNCTUATION: [char; 10] =
    ['.', '?', '!', ':', ';', '。', '？', '！', '：', '；'];

/// Returns true if `c` ends a sentence-level segment.
pub fn is_sentence_punctuation(c: char) -> bool {
    SENTENCE_PUNCTUATION.contains(&c)
}

/// A fragment with nothing speakable in it (punctuation, quotes, brackets).
fn is_unspeakable(segment: &str) -> bool {
    !segment.chars().any(char::is_alphanumeric)
}

/// Split a complete reply into trimmed, speakable sentence segments.
///
/// Each segment keeps the punctuation that terminates it. A run of
/// consecutive punctuation (`"Really?!"`, `"Wait..."`) or a closing quote
/// stays with the sentence it ends, and a fragment with no speakable characters is
/// merged into the preceding segment, so no punctuation-only segment is
/// ever produced. A trailing fragment without terminating punctuation is
/// returned as the final segment.
pub fn split_sentences(reply: &str) -> Vec<String> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = reply.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if !is_sentence_punctuation(c) {
            continue;
        }
        // Absorb the rest of the punctuation run and any closing quote or
        // bracket glued to it.
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() || next.is_alphanumeric() {
                break;
            }
            current.push(next);
            chars.next();
        }
        flush(&mut segments, &mut current);
    }
    flush(&mut segments, &mut current);
    segments
}

fn flush(segments: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if trimmed.is_empty() {
        current.clear();
        return;
    }
    if is_unspeakable(trimmed) {
        // Nothing to attach to yet: carry it into the next segment.
        if let Some(last) = segments.last_mut() {
            last.push_str(trimmed);
            current.clear();
        }
        return;
    }
    segments.push(trimmed.to_owned());
    current.clear();
}
