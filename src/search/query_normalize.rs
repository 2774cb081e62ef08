//! FTS query normalization (§4.10 step 2), grounded in the teacher's
//! `query/preprocessor.rs` tokenizer/stop-word pipeline.

use once_cell::sync::Lazy;
use std::collections::HashSet;

const MAX_TOKENS: usize = 16;
const MIN_TOKEN_LEN: usize = 3;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "this", "that",
        "these", "those", "and", "or", "but", "if", "then", "for", "with", "from", "into", "of",
        "to", "in", "on", "at", "by", "as", "it", "its",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, strip non-word characters, drop short tokens and stopwords,
/// keep at most `MAX_TOKENS` tokens, joined with spaces for an FTS query.
pub fn normalize_for_fts(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|tok| tok.to_lowercase())
        .filter(|tok| tok.len() >= MIN_TOKEN_LEN && !STOP_WORDS.contains(tok.as_str()))
        .take(MAX_TOKENS)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_short_tokens_and_stopwords() {
        assert_eq!(normalize_for_fts("the fn is to do it"), "");
    }

    #[test]
    fn keeps_meaningful_identifiers() {
        assert_eq!(normalize_for_fts("parseConfig from the loader"), "parseconfig loader");
    }

    #[test]
    fn truncates_to_max_tokens() {
        let text = (0..30).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(normalize_for_fts(&text).split(' ').count(), MAX_TOKENS);
    }
}
