//! Character-based truncation helpers shared by the rephraser and the publisher.

const SENTENCE_ENDINGS: &[char] = &['.', '!', '?', '؟'];

/// First `max_chars` characters of `text`.
pub fn hard_truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Cut `text` to at most `max_chars` characters, ending on the last sentence
/// boundary inside the limit when there is one.
pub fn truncate_to_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix = hard_truncate(text, max_chars);
    match prefix.rfind(SENTENCE_ENDINGS) {
        Some(idx) if idx > 0 => {
            // every ending is a single char; keep it
            let end = idx + prefix[idx..].chars().next().map_or(1, char::len_utf8);
            prefix[..end].to_string()
        }
        _ => prefix,
    }
}
