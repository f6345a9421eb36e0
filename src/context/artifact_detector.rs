//! Detection of large structured content that should be externalized

use super::patterns::{BLOCK_HTML_TAG, CODE_KEYWORD_LINE, FENCED_CODE, MARKDOWN_HEADING};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Minimum length of a fenced block that counts as code on its own
const MIN_FENCED_CODE_CHARS: usize = 200;
const MIN_MARKDOWN_CHARS: usize = 500;
const MIN_CSV_LINES: usize = 5;

/// Kind of artifact suggested for a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Code,
    Json,
    Markdown,
    Html,
    Csv,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 5] = [
        ArtifactType::Code,
        ArtifactType::Json,
        ArtifactType::Markdown,
        ArtifactType::Html,
        ArtifactType::Csv,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Code => "code",
            ArtifactType::Json => "json",
            ArtifactType::Markdown => "markdown",
            ArtifactType::Html => "html",
            ArtifactType::Csv => "csv",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suggest an artifact type for `content`, checked in priority order
pub fn detect(content: &str) -> Option<ArtifactType> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }

    if looks_like_code(trimmed) {
        return Some(ArtifactType::Code);
    }

    if looks_like_json(trimmed) {
        return Some(ArtifactType::Json);
    }

    if MARKDOWN_HEADING.is_match(trimmed) && trimmed.chars().count() > MIN_MARKDOWN_CHARS {
        return Some(ArtifactType::Markdown);
    }

    let first_line = trimmed.lines().next().unwrap_or("");
    if first_line.contains(',') && trimmed.lines().count() > MIN_CSV_LINES {
        return Some(ArtifactType::Csv);
    }

    if BLOCK_HTML_TAG.is_match(trimmed) {
        return Some(ArtifactType::Html);
    }

    None
}

fn looks_like_code(text: &str) -> bool {
    let long_fence = FENCED_CODE
        .find_iter(text)
        .any(|m| m.as_str().chars().count() >= MIN_FENCED_CODE_CHARS);
    if long_fence || CODE_KEYWORD_LINE.is_match(text) {
        return true;
    }

    let head: String = text.chars().take(16).collect::<String>().to_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

fn looks_like_json(text: &str) -> bool {
    (text.starts_with('{') || text.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
}
