//! Markdown removal for speech output.
//!
//! Models answer in markdown; a TTS engine would read the markup aloud.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

/// Ordered (pattern, replacement) rewrite rules.
const RULES: &[(&str, &str)] = &[
    // Fenced code blocks keep their body
    (r"(?s)```[^\n]*\n(.*?)\n?```", "$1"),
    (r"`([^`]*)`", "$1"),
    (r"(?m)^#+\s+", ""),
    (r"\*\*(.*?)\*\*", "$1"),
    (r"__(.*?)__", "$1"),
    (r"\*(.*?)\*", "$1"),
    (r"\b_(.+?)_\b", "$1"),
    (r"(?m)^\s*(?:-{3,}|\*{3,}|_{3,})\s*$", ""),
    (r"(?m)^\s*[-*+]\s+", ""),
    (r"(?m)^\s*\d+\.\s+", ""),
    // Images before links so the `!` goes too
    (r"!\[(.*?)\]\(.*?\)", "$1"),
    (r"\[(.*?)\]\(.*?\)", "$1"),
    (r"(?m)^\s*>\s*", ""),
    (r"<[^>]*>", ""),
    // Table separators, then the remaining pipes
    (r"(?m)^[\s|:-]*-[\s|:-]*$", ""),
    (r"\|", " "),
    (r"\\(.)", "$1"),
    (
        r"[\x{1F300}-\x{1F5FF}\x{1F600}-\x{1F64F}\x{1F680}-\x{1F6FF}\x{1F700}-\x{1FAFF}\x{2600}-\x{27BF}\x{1F1E6}-\x{1F1FF}\x{FE0F}\x{200D}]+",
        "",
    ),
];

fn rules() -> &'static [(Regex, &'static str)] {
    static COMPILED: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        RULES
            .iter()
            .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
                Ok(re) => Some((re, *replacement)),
                Err(e) => {
                    warn!(pattern, error = %e, "Skipping markdown rule");
                    None
                }
            })
            .collect()
    })
}

/// Strip markdown and emoji so text reads naturally when spoken.
pub fn strip_markdown(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in rules() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
