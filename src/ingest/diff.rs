//! Pure chunk diffing.
//!
//! Given the full finalized text at the last commit and the current full
//! finalized text, compute the new content to commit. State in, chunk or
//! none out; no I/O, no panics.

/// Compute the text of the next chunk, if any.
///
/// The common case is a cumulative recognizer: the current text extends the
/// last committed text, and the new chunk is the suffix. When the current
/// text does not extend the previous prefix (the recognizer restarted its
/// result numbering), the whole current text is treated as new content;
/// over-committing is preferred to losing content.
///
/// Returns `None` when there is nothing genuinely new.
pub fn next_chunk(last_committed: &str, current_final: &str) -> Option<String> {
    let current = current_final.trim();
    let last = last_committed.trim();

    if current.is_empty() || current == last {
        return None;
    }

    match current.strip_prefix(last) {
        Some(suffix) => {
            let new_content = suffix.trim();
            if new_content.is_empty() {
                None
            } else {
                Some(new_content.to_string())
            }
        }
        // Recognizer restarted: no shared prefix, take everything
        None => Some(current.to_string()),
    }
}
