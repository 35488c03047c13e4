//! Tokenization of document text into index words.

/// Longest token that is worth indexing. Longer runs are almost always
/// base64 blobs or URLs that leaked into the text columns.
const MAX_WORD_LEN: usize = 30;

/// Split a text column into lowercased index words.
///
/// Words are maximal runs of alphanumeric characters; everything else is a
/// boundary. Tokens longer than [`MAX_WORD_LEN`] are dropped.
pub fn full_text_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if ch.is_alphanumeric() {
            for lower in ch.to_lowercase() {
                current.push(lower);
            }
        } else if !current.is_empty() {
            if current.len() <= MAX_WORD_LEN {
                words.push(std::mem::take(&mut current));
            } else {
                current.clear();
            }
        }
    }
    if !current.is_empty() && current.len() <= MAX_WORD_LEN {
        words.push(current);
    }

    words
}
