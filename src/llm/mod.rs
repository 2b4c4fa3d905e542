pub mod chat;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

/// Output length cap sent with every completion request.
pub const MAX_TOKENS: u32 = 1000;
pub const TEMPERATURE: f32 = 0.7;

pub const DEFAULT_CHAT_MODEL: &str = "anthropic/claude-3-sonnet";
pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}

/// A hosted model addressed as `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseModelRefError {
    message: String,
}

impl fmt::Display for ParseModelRefError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseModelRefError {}

impl FromStr for ModelRef {
    type Err = ParseModelRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, name)) if
                !owner.is_empty() &&
                !name.is_empty() &&
                !name.contains('/')
            =>
                Ok(ModelRef {
                    owner: owner.to_string(),
                    name: name.to_string(),
                }),
            _ =>
                Err(ParseModelRefError {
                    message: format!("Invalid model reference: '{}' (expected owner/name)", s),
                }),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            completion_model: None,
            base_url: None,
        }
    }
}
