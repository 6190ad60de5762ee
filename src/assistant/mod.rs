//! Campus assistant — automatic answers for unattended questions.
//!
//! Location questions are answered from the record store; everything
//! else goes to a text generator with the whole store as context. When
//! the generator cannot help, the reply offers a human agent, which
//! clients use to open a live chat.

pub mod gemini;
pub mod presets;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{self, CollegeInfo, Location, PromptSnapshot, SharedStore};

use presets::{APOLOGY_REPLY, ESCALATION_MARKER, ESCALATION_REPLY, language_name};

/// Generator errors. None of them reach the client.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("no generator configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generator returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("generator returned no text")]
    EmptyReply,
}

/// Text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AssistantError>;
}

/// Generator used when no API key is configured; always fails, so the
/// assistant answers with its fallback replies.
#[derive(Debug, Default)]
pub struct Unconfigured;

#[async_trait]
impl Generator for Unconfigured {
    async fn generate(&self, _prompt: &str) -> Result<String, AssistantError> {
        Err(AssistantError::NotConfigured)
    }
}

/// One prior exchange in the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssistantReply {
    pub response_text: String,
    pub map_url: Option<String>,
}

impl AssistantReply {
    fn text(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
            map_url: None,
        }
    }
}

pub struct Assistant {
    store: SharedStore,
    generator: Arc<dyn Generator>,
}

impl Assistant {
    pub fn new(store: SharedStore, generator: Arc<dyn Generator>) -> Self {
        Self { store, generator }
    }

    /// Answer `message` in the language named by `target_lang`.
    pub async fn respond(
        &self,
        message: &str,
        history: &[ChatTurn],
        target_lang: &str,
    ) -> AssistantReply {
        let language = language_name(target_lang);
        let college = store::run_blocking(&self.store, |s| s.college_info())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "college info lookup failed");
                None
            });

        let mut map_url = None;
        if let Some(place) = presets::location_query(message) {
            let lookup = store::run_blocking(&self.store, move |s| s.find_location(&place)).await;
            match lookup {
                Ok(Some(location)) => {
                    map_url = college.as_ref().and_then(|c| c.map_url.clone());
                    let prompt = location_prompt(&location, language);
                    match self.generator.generate(&prompt).await {
                        Ok(text) => {
                            return AssistantReply {
                                response_text: text.trim().to_string(),
                                map_url,
                            };
                        }
                        Err(e) => {
                            // Fall back to the general prompt.
                            tracing::warn!(error = %e, location = %location.name, "location answer failed");
                        }
                    }
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "location lookup failed"),
            }
        }

        let snapshot = store::run_blocking(&self.store, |s| s.prompt_snapshot())
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "store snapshot failed");
                PromptSnapshot::default()
            });
        let prompt = general_prompt(message, history, language, college.as_ref(), &snapshot);

        match self.generator.generate(&prompt).await {
            Ok(text) if text.contains(ESCALATION_MARKER) => AssistantReply::text(ESCALATION_REPLY),
            Ok(text) => AssistantReply {
                response_text: text.trim().to_string(),
                map_url,
            },
            Err(e) => {
                tracing::error!(error = %e, "generator call failed");
                AssistantReply::text(APOLOGY_REPLY)
            }
        }
    }
}

fn location_prompt(location: &Location, language: &str) -> String {
    format!(
        "You are a helpful campus assistant.\n\
         A user asked for the location of \"{}\".\n\
         The details for this location are: \"{}\".\n\
         Please formulate a helpful and concise response in this language: {language}.\n",
        location.name, location.details
    )
}

fn format_history(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("{}: {}", capitalize(&turn.role), turn.content))
        .collect::<Vec<_>>()
        .join("\n")
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn general_prompt(
    message: &str,
    history: &[ChatTurn],
    language: &str,
    college: Option<&CollegeInfo>,
    snapshot: &PromptSnapshot,
) -> String {
    let college_name = college.map_or("the college", |c| c.name.as_str());
    let data = serde_json::to_string_pretty(snapshot).unwrap_or_default();
    format!(
        "You are CampusGuide AI, an intelligent assistant for {college_name}.\n\
         Your primary goal is to provide concise, accurate, and friendly information to students and visitors.\n\
         You MUST respond in the following language: {language}.\n\
         \n\
         **IMPORTANT ESCALATION RULE**:\n\
         If you absolutely cannot answer the user's question with the provided database information,\n\
         or if the user seems frustrated, your ONLY response MUST be this exact English phrase:\n\
         `{ESCALATION_REPLY}`\n\
         Do not translate this specific phrase. Do not add any other text.\n\
         \n\
         Current User Query: \"{message}\"\n\
         \n\
         Use the following database information to answer the query if relevant:\n\
         {data}\n\
         \n\
         Conversation History (for context):\n\
         {history}\n\
         \n\
         Your Answer (in {language}, unless the escalation rule applies):\n",
        history = format_history(history),
    )
}
