//! Shared text patterns for estimation, scoring and detection

use once_cell::sync::Lazy;
use regex::Regex;

/// Fenced code region. Group 1 is the info string, group 2 the body.
pub(crate) static FENCED_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([^\n`]*)\n?(.*?)```").expect("fenced code regex is valid"));

/// Two consecutive capitalized words ("New York", "Project Atlas")
pub(crate) static PROPER_NOUN_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+\s+[A-Z][a-z]+\b").expect("proper noun regex is valid")
});

/// Large numbers, currency amounts and percentages
pub(crate) static SIGNIFICANT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4,}|[$€£]\s?\d|\d+(?:\.\d+)?\s?%").expect("number regex is valid")
});

/// Bullet or numbered list item; group 1 is the item text
pub(crate) static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*]|\d+\.)\s+(.+)$").expect("list item regex is valid"));

pub(crate) static MARKDOWN_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+\S").expect("heading regex is valid"));

/// Line opening with a common source-code keyword
pub(crate) static CODE_KEYWORD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^(?:pub fn |fn |function |def |class |import |const |let |public |#include|package )",
    )
    .expect("code keyword regex is valid")
});

pub(crate) static BLOCK_HTML_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<(?:div|table|section|article|ul|ol|form|p)[\s>]")
        .expect("html tag regex is valid")
});

/// Header line written by the heuristic summarizer
pub(crate) static SUMMARY_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[Summary of \d+ earlier turns\]$").expect("summary header regex is valid")
});

/// Sliding-window note; groups 1 and 2 are the user and assistant counts
pub(crate) static EARLIER_CONTEXT_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[Earlier context: (\d+) user turns, (\d+) assistant turns - context trimmed\]$")
        .expect("earlier context regex is valid")
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_code_captures_language() {
        let caps = FENCED_CODE.captures("see\n```rust\nfn main() {}\n```\n").unwrap();
        assert_eq!(&caps[1], "rust");
        assert_eq!(&caps[2], "fn main() {}\n");
    }

    #[test]
    fn test_significant_numbers() {
        assert!(SIGNIFICANT_NUMBER.is_match("revenue of 25000"));
        assert!(SIGNIFICANT_NUMBER.is_match("costs $40"));
        assert!(SIGNIFICANT_NUMBER.is_match("up 12.5%"));
        assert!(!SIGNIFICANT_NUMBER.is_match("3 apples"));
    }

    #[test]
    fn test_list_item() {
        let caps = LIST_ITEM.captures("  - migrate the schema").unwrap();
        assert_eq!(&caps[1], "migrate the schema");
        assert!(LIST_ITEM.is_match("2. second step"));
        assert!(!LIST_ITEM.is_match("plain sentence"));
    }

    #[test]
    fn test_summary_notes() {
        assert!(SUMMARY_HEADER.is_match("[Summary of 12 earlier turns]"));
        assert!(!SUMMARY_HEADER.is_match("Q: [Summary of 12 earlier turns]"));

        let caps = EARLIER_CONTEXT_NOTE
            .captures("[Earlier context: 3 user turns, 2 assistant turns - context trimmed]")
            .unwrap();
        assert_eq!(&caps[1], "3");
        assert_eq!(&caps[2], "2");
    }
}
