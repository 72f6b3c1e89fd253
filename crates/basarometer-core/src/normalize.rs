//! Bilingual product-name normalization.
//!
//! Every comparison in the pipeline (contamination screen, rule lookup, cut
//! scoring, similarity search) runs on the output of [`normalize`], so the
//! classifier and the mapper agree on what "the same text" means.

/// Canonicalize a raw product string for comparison.
///
/// Lower-cases, drops every character outside the Hebrew block
/// (U+0590–U+05FF), ASCII letters, ASCII digits and whitespace, then trims
/// and collapses whitespace runs to a single space. Empty input yields an
/// empty string.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let kept: String = lowered
        .chars()
        .filter(|c| is_hebrew(*c) || c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First word of the normalized text, if any.
pub fn first_token(text: &str) -> Option<String> {
    normalize(text).split(' ').next().filter(|t| !t.is_empty()).map(str::to_string)
}

/// Whether the text contains at least one Hebrew-block character.
pub fn contains_hebrew(text: &str) -> bool {
    text.chars().any(is_hebrew)
}

/// Whether every character of a non-empty word is in the Hebrew block.
pub fn is_hebrew_word(word: &str) -> bool {
    !word.is_empty() && word.chars().all(is_hebrew)
}

fn is_hebrew(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}
