//! Lexical keyword extraction

use indexmap::IndexSet;

/// Tokens of this many characters or fewer are ignored
pub const MIN_KEYWORD_CHARS: usize = 3;

/// Common English words that carry no topical signal
pub const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "because", "been", "before", "being",
    "below", "between", "both", "could", "does", "doing", "down", "during", "each", "from",
    "further", "have", "having", "here", "into", "just", "like", "more", "most", "much", "must",
    "once", "only", "other", "over", "same", "should", "some", "such", "than", "that", "their",
    "theirs", "them", "then", "there", "these", "they", "this", "those", "through", "under",
    "until", "very", "were", "what", "when", "where", "which", "while", "will", "with", "would",
    "your", "yours",
];

/// Extract the distinct keywords of a text, in first-seen order.
///
/// Lowercases, splits on whitespace, strips leading and trailing punctuation,
/// and drops short tokens and stop words.
pub fn extract_keywords(text: &str) -> IndexSet<String> {
    text.split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|token| token.chars().count() > MIN_KEYWORD_CHARS)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}
