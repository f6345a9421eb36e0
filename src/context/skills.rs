//! Skill definitions and trigger matching
//!
//! A `SkillContext` is owned by whichever component needs it (the LLM
//! summarizer, a skill-matching collaborator). Loading is explicit and
//! reports errors to the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// A named skill with trigger phrases and instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub instructions: String,
}

/// Skill errors
#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Unknown skill: {0}")]
    UnknownSkill(String),

    #[error("Skill fetch failed: {0}")]
    FetchFailed(String),
}

/// Loaded skills plus the currently active one
#[derive(Debug, Clone, Default)]
pub struct SkillContext {
    skills: Vec<Skill>,
    active: Option<String>,
    loaded_at: Option<DateTime<Utc>>,
}

impl SkillContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the loaded skills. The active skill is kept only if it still exists.
    pub fn load(&mut self, skills: Vec<Skill>) {
        if let Some(active) = &self.active {
            if !skills.iter().any(|s| &s.name == active) {
                self.active = None;
            }
        }
        self.skills = skills;
        self.loaded_at = Some(Utc::now());
        debug!("Loaded {} skills", self.skills.len());
    }

    /// Fetch a JSON array of skills and load it
    pub async fn fetch(&mut self, client: &reqwest::Client, url: &str) -> Result<usize, SkillError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| SkillError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SkillError::FetchFailed(format!("HTTP {}", response.status())));
        }

        let skills: Vec<Skill> = response
            .json()
            .await
            .map_err(|e| SkillError::FetchFailed(e.to_string()))?;

        let count = skills.len();
        self.load(skills);
        info!("Fetched {} skills from {}", count, url);
        Ok(count)
    }

    /// Drop all skills and the active reference
    pub fn clear(&mut self) {
        self.skills.clear();
        self.active = None;
        self.loaded_at = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    pub fn activate(&mut self, name: &str) -> Result<(), SkillError> {
        if !self.skills.iter().any(|s| s.name == name) {
            return Err(SkillError::UnknownSkill(name.to_string()));
        }
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&Skill> {
        let name = self.active.as_ref()?;
        self.skills.iter().find(|s| &s.name == name)
    }

    /// Skills with at least one trigger occurring in `text` (case-insensitive)
    pub fn match_triggers(&self, text: &str) -> Vec<&Skill> {
        let haystack = text.to_lowercase();
        self.skills
            .iter()
            .filter(|skill| {
                skill
                    .triggers
                    .iter()
                    .any(|t| !t.is_empty() && haystack.contains(&t.to_lowercase()))
            })
            .collect()
    }
}
