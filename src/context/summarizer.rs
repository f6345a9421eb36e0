//! Summarization of compacted turns
//!
//! `LLMSummarizer` calls an OpenAI-compatible completion endpoint.
//! `HeuristicSummarizer` extracts salient lines locally and is the fallback
//! whenever the external call is unavailable or fails.

use super::models::{Role, Turn};
use super::patterns::{FENCED_CODE, LIST_ITEM, SUMMARY_HEADER};
use super::skills::SkillContext;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on salient lines in a heuristic summary
pub const MAX_SUMMARY_LINES: usize = 15;

/// Text used when no salient line is found
pub const GENERAL_DISCUSSION: &str = "General discussion";

/// First line of a synthetic turn that hands an earlier summary to the next compaction
pub const PREVIOUS_SUMMARY_MARKER: &str = "[Earlier summary]";

const CODE_DISCUSSED_PREFIX: &str = "Code discussed: ";

/// Summarizer trait for different summarization strategies
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize turns into a concise brief of at most `max_tokens`
    async fn summarize(&self, turns: &[Turn], max_tokens: usize) -> Result<String, SummarizerError>;
}

/// Configuration for LLM summarizer
#[derive(Debug)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// LLM-based summarizer using OpenAI-compatible API
pub struct LLMSummarizer {
    client: Client,
    config: SummarizerConfig,
    skills: Option<SkillContext>,
}

impl LLMSummarizer {
    /// Create a new LLM summarizer
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SummarizerError::InitializationError(e.to_string()))?;

        Ok(Self {
            client,
            config,
            skills: None,
        })
    }

    /// Attach a skill context; the active skill's instructions steer the summary
    pub fn with_skills(mut self, skills: SkillContext) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn skills_mut(&mut self) -> Option<&mut SkillContext> {
        self.skills.as_mut()
    }

    fn system_prompt(&self) -> String {
        let mut prompt = "You are a concise summarizer. Preserve decisions, code, data, \
            constraints and open questions from the conversation."
            .to_string();
        if let Some(skill) = self.skills.as_ref().and_then(|s| s.active()) {
            if !skill.instructions.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(&skill.instructions);
            }
        }
        prompt
    }

    /// Build summarization prompt
    fn build_prompt(&self, turns: &[Turn], max_tokens: usize) -> String {
        let transcript = turns
            .iter()
            .map(|t| {
                let speaker = match t.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{}: {}", speaker, t.text())
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Summarize the following conversation so it can replace the original turns. \
            Keep the summary under {} tokens.\n\n{}",
            max_tokens, transcript
        )
    }
}

#[async_trait]
impl Summarizer for LLMSummarizer {
    async fn summarize(&self, turns: &[Turn], max_tokens: usize) -> Result<String, SummarizerError> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} turns, target: {} tokens", turns.len(), max_tokens);

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_prompt(turns, max_tokens),
                },
            ],
            max_tokens: Some(max_tokens),
            temperature: Some(0.3),
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {} for summarization", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            let mut req = self.client.post(&self.config.endpoint).json(&request);

            if let Some(ref api_key) = self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key.expose_secret()));
            }

            match req.send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        last_error = Some(SummarizerError::ApiError(format!(
                            "HTTP {}: {}",
                            status, body
                        )));
                        continue;
                    }

                    match response.json::<ChatCompletionResponse>().await {
                        Ok(resp) => match resp.choices.into_iter().next() {
                            Some(choice) if !choice.message.content.trim().is_empty() => {
                                debug!("Summarization successful");
                                return Ok(choice.message.content);
                            }
                            _ => {
                                last_error = Some(SummarizerError::ApiError(
                                    "Empty summary in response".to_string(),
                                ));
                            }
                        },
                        Err(e) => {
                            last_error = Some(SummarizerError::ApiError(format!(
                                "Failed to parse response: {}",
                                e
                            )));
                        }
                    }
                }
                Err(e) => {
                    last_error = Some(SummarizerError::NetworkError(e.to_string()));
                }
            }
        }

        warn!("Summarization failed after {} attempts", attempts);
        Err(last_error.unwrap_or(SummarizerError::Unknown))
    }
}

/// Local salient-line summarizer (fallback)
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSummarizer;

#[async_trait]
impl Summarizer for HeuristicSummarizer {
    async fn summarize(&self, turns: &[Turn], _max_tokens: usize) -> Result<String, SummarizerError> {
        Ok(heuristic_summary(turns))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

/// Extract questions, code languages and list items into a short brief
pub fn heuristic_summary(turns: &[Turn]) -> String {
    let replaced = turns.iter().filter(|t| previous_summary_body(t).is_none()).count();
    heuristic_summary_of(turns, replaced)
}

/// Heuristic summary whose header reports `replaced` turns.
///
/// A turn carrying an earlier summary (see [`PREVIOUS_SUMMARY_MARKER`]) has
/// its body lines copied through ahead of the new salient lines, and its
/// `Code discussed` languages merged into the new one.
pub fn heuristic_summary_of(turns: &[Turn], replaced: usize) -> String {
    let mut lines = Vec::new();
    let mut languages: Vec<String> = Vec::new();

    for turn in turns {
        if let Some(body) = previous_summary_body(turn) {
            carry_summary_lines(&body, &mut lines, &mut languages);
            continue;
        }

        let text = turn.text();

        if turn.role == Role::User && text.contains('?') {
            let question = text.split_whitespace().collect::<Vec<_>>().join(" ");
            lines.push(format!("Q: {}", truncate_chars(&question, 100)));
        }

        for caps in FENCED_CODE.captures_iter(&text) {
            let lang = caps[1].split_whitespace().next().unwrap_or("").to_lowercase();
            push_language(&mut languages, lang);
        }

        let prose = FENCED_CODE.replace_all(&text, "");
        for line in prose.lines() {
            if let Some(caps) = LIST_ITEM.captures(line) {
                lines.push(format!("- {}", truncate_chars(caps[1].trim(), 80)));
            }
        }
    }

    let reserved = usize::from(!languages.is_empty());
    lines.truncate(MAX_SUMMARY_LINES - reserved);
    if !languages.is_empty() {
        lines.push(format!("{}{}", CODE_DISCUSSED_PREFIX, languages.join(", ")));
    }

    if lines.is_empty() {
        return GENERAL_DISCUSSION.to_string();
    }

    format!("[Summary of {} earlier turns]\n{}", replaced, lines.join("\n"))
}

/// Body of a synthetic turn that carries an earlier summary
fn previous_summary_body(turn: &Turn) -> Option<String> {
    turn.text()
        .strip_prefix(PREVIOUS_SUMMARY_MARKER)
        .map(|body| body.trim_start_matches('\n').to_string())
}

fn carry_summary_lines(body: &str, lines: &mut Vec<String>, languages: &mut Vec<String>) {
    for line in body.lines().map(str::trim_end) {
        if line.trim().is_empty() || line == GENERAL_DISCUSSION || SUMMARY_HEADER.is_match(line) {
            continue;
        }
        if let Some(langs) = line.strip_prefix(CODE_DISCUSSED_PREFIX) {
            for lang in langs.split(',') {
                push_language(languages, lang.trim().to_lowercase());
            }
            continue;
        }
        lines.push(line.to_string());
    }
}

fn push_language(languages: &mut Vec<String>, lang: String) {
    if !lang.is_empty() && !languages.contains(&lang) {
        languages.push(lang);
    }
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Summarizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unknown error")]
    Unknown,
}

// OpenAI-compatible API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
