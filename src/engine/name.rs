//! Fuzzy name comparison against registry records.

use strsim::normalized_levenshtein;

/// Honorifics and credentials stripped before comparison.
const STOP_TOKENS: &[&str] = &["dr", "dr.", "md", "m.d.", "do", "d.o.", "jr", "jr.", "sr", "sr."];

/// Lowercase, strip honorifics and punctuation, collapse whitespace.
pub fn normalize_name(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .filter(|token| !STOP_TOKENS.contains(token))
        .map(|token| {
            token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '\'')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein ratio over normalized names, in [0,1].
/// Symmetric: `score(a, b) == score(b, a)`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(&a, &b)
}
