// Automated edit agent.
//
// Turns a natural-language prompt and the current snapshot into an ordered
// list of raw edits. The relay treats the agent as slow and fallible and
// never holds a diagram lock while waiting on it.

mod gemini;

use std::collections::VecDeque;

use diagram_sync_common::types::Snapshot;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::AgentConfig;

pub use gemini::GeminiAgent;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent is not configured")]
    NotConfigured,

    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("agent returned an unusable response: {0}")]
    BadResponse(String),

    /// The agent answered with an `error` field instead of edits.
    #[error("agent declined the prompt: {0}")]
    Declined(String),
}

pub enum EditAgent {
    Gemini(GeminiAgent),
    Scripted(ScriptedAgent),
    Disabled,
}

impl EditAgent {
    /// Gemini when an API key is configured, otherwise disabled.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        match config.api_key.as_deref() {
            Some(api_key) => Ok(Self::Gemini(GeminiAgent::new(config, api_key)?)),
            None => Ok(Self::Disabled),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::Scripted(_) => "scripted",
            Self::Disabled => "disabled",
        }
    }

    pub async fn propose(&self, prompt: &str, snapshot: &Snapshot) -> Result<Vec<Value>, AgentError> {
        match self {
            Self::Gemini(agent) => agent.propose(prompt, snapshot).await,
            Self::Scripted(agent) => agent.propose(prompt).await,
            Self::Disabled => Err(AgentError::NotConfigured),
        }
    }
}

/// Replays queued replies in order. Used for demos and tests.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    replies: Mutex<VecDeque<Result<Vec<Value>, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new<I>(replies: I) -> Self
    where
        I: IntoIterator<Item = Result<Vec<Value>, String>>,
    {
        Self { replies: Mutex::new(replies.into_iter().collect()), prompts: Mutex::default() }
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }

    async fn propose(&self, prompt: &str) -> Result<Vec<Value>, AgentError> {
        self.prompts.lock().await.push(prompt.to_string());
        match self.replies.lock().await.pop_front() {
            Some(Ok(edits)) => Ok(edits),
            Some(Err(message)) => Err(AgentError::Declined(message)),
            None => Err(AgentError::BadResponse("no scripted reply left".to_string())),
        }
    }
}
