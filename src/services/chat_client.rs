//! Client for the remote chat-completion API.
//!
//! No retries happen here: a failed call is classified and handed back to the
//! caller, which decides what the end user sees.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{info, warn};

use crate::database::models::{ChatMessage, Role};

/// Upper bound on upstream error text carried into logs and responses.
const MAX_UPSTREAM_DETAIL: usize = 300;

pub const DEFAULT_SYSTEM_PROMPT: &str = "As a professional 'Life Story Architect', you blend oral \
history methodology with narrative therapy techniques to help users reconstruct the key events of \
their lives: when and where they happened, who was there, what caused them and how they felt. Ask \
one focused question at a time, invite sensory detail, notice gaps between moments the user skips \
over, and check in gently before approaching sensitive topics. Keep every reply short, two or three \
sentences at most.";

const REGENERATE_SYSTEM_PROMPT: &str = "You are an assistant who helps improve text fluency. No \
other additional information should be added. Return ONLY the improved text without any additional \
commentary, explanations, or formatting.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("Request timeout - please try again")]
    Timeout,
    #[error("Network connection error: {0}")]
    NetworkUnavailable(String),
    #[error("AI service error {status}: {detail}")]
    UpstreamError { status: u16, detail: String },
    #[error("Malformed response from AI service: {0}")]
    MalformedResponse(String),
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Timeout => "chat_timeout",
            ChatError::NetworkUnavailable(_) => "chat_unavailable",
            ChatError::UpstreamError { .. } => "chat_upstream_error",
            ChatError::MalformedResponse(_) => "chat_malformed_response",
        }
    }

    /// Text safe to show an end user. Transport detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::NetworkUnavailable(_) => "Unable to reach the AI service".to_string(),
            ChatError::MalformedResponse(_) => "The AI service returned an invalid response".to_string(),
            ChatError::Timeout | ChatError::UpstreamError { .. } => self.to_string(),
        }
    }

    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else {
            ChatError::NetworkUnavailable(err.without_url().to_string())
        }
    }
}

/// A successful completion: the full upstream body plus the extracted reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub reply: String,
    pub body: Map<String, Value>,
}

impl Completion {
    /// Require a non-empty `choices` list whose first entry carries message text.
    pub fn from_body(body: Value) -> Result<Self, ChatError> {
        let Value::Object(body) = body else {
            return Err(ChatError::MalformedResponse("response is not a JSON object".into()));
        };
        let first = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .ok_or_else(|| ChatError::MalformedResponse("no completion choices returned".into()))?;
        let reply = first["message"]["content"]
            .as_str()
            .ok_or_else(|| ChatError::MalformedResponse("completion has no message content".into()))?
            .to_string();
        Ok(Self { reply, body })
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion, ChatError>;
}

/// Put the default instruction at the head unless the caller supplied a system message.
pub fn with_system_prompt(mut messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    if !messages.iter().any(|m| m.role == Role::System) {
        messages.insert(0, ChatMessage::new(Role::System, DEFAULT_SYSTEM_PROMPT));
    }
    messages
}

/// Reduce an upstream error body to a short, printable message.
///
/// Prefers the `error.message` (or string `error`) field of a JSON body and
/// falls back to the raw text; control characters are dropped and the result
/// is capped at `MAX_UPSTREAM_DETAIL` characters.
pub fn sanitize_upstream_detail(raw: &str) -> String {
    let extracted = serde_json::from_str::<Value>(raw).ok().and_then(|json| {
        match &json["error"] {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(String::from),
            _ => json.get("message").and_then(Value::as_str).map(String::from),
        }
    });
    let text = extracted.unwrap_or_else(|| raw.to_string());

    let mut cleaned: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(MAX_UPSTREAM_DETAIL)
        .collect();
    cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        "Unknown error".to_string()
    } else {
        cleaned
    }
}

/// Prompt for merging a new fragment into existing journal text.
pub fn regeneration_prompt(current_content: &str, new_content: &str) -> String {
    if current_content.trim().is_empty() {
        format!(
            "Please help improve the fluency of this text: \"{}\". Return ONLY the improved text \
             without any additional commentary or explanations.",
            new_content
        )
    } else {
        format!(
            "Please combine and improve the fluency of these two texts. You can make some \
             adjustment to make it more fluent. First text: \"{}\". Second text: \"{}\". Return \
             ONLY the improved text without any additional commentary or explanations.",
            current_content, new_content
        )
    }
}

/// Rewrite `new_content`, merged with `current_content` when there is any.
pub async fn regenerate_text(
    backend: &dyn ChatBackend,
    current_content: &str,
    new_content: &str,
) -> Result<String, ChatError> {
    let messages = vec![
        ChatMessage::new(Role::System, REGENERATE_SYSTEM_PROMPT),
        ChatMessage::new(Role::User, regeneration_prompt(current_content, new_content)),
    ];
    let completion = backend.complete(messages).await?;
    Ok(completion.reply.trim().to_string())
}

pub struct ChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            model: "glm-4-plus".to_string(),
        })
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion, ChatError> {
        let messages = with_system_prompt(messages);
        info!("Chat request - {} messages, model {}", messages.len(), self.model);

        let payload = json!({
            "model": self.model,
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let err = ChatError::from_transport(e);
                warn!("Chat request failed before a response: {:?}", err);
                err
            })?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let err = ChatError::UpstreamError {
                status: status.as_u16(),
                detail: sanitize_upstream_detail(&raw),
            };
            warn!("Chat API returned an error: {}", err);
            return Err(err);
        }

        let body: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ChatError::Timeout
            } else {
                ChatError::MalformedResponse("response body is not valid JSON".into())
            }
        })?;

        let completion = Completion::from_body(body).inspect_err(|e| warn!("{}", e))?;
        info!("Chat request successful");
        Ok(completion)
    }
}
