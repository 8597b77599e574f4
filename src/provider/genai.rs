//! genai-backed provider.
//!
//! Uses the genai multi-provider client in streaming mode for both trait
//! methods; `chat` collects the chunk stream into a full response. Model
//! names without a provider prefix route to a local Ollama instance, so a
//! readiness probe is exposed for the CLI to run before starting a session.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent};
use genai::Client;
use std::time::Duration;

use super::{Message, Provider, Role, TextStream};
use crate::error::ProviderError;

const OLLAMA_BASE_URL: &str = "http://localhost:11434/";

pub struct GenaiProvider {
    client: Client,
    model: String,
    temperature: Option<f32>,
}

impl GenaiProvider {
    pub fn new(model: impl Into<String>) -> Self {
        GenaiProvider {
            client: Client::default(),
            model: model.into(),
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::default().with_capture_content(true);
        if let Some(t) = self.temperature {
            options = options.with_temperature(t as f64);
        }
        options
    }

    /// Map our role-tagged history onto a genai request. The history always
    /// leads with a system message in practice; anything else degrades to an
    /// empty system prompt rather than failing.
    fn build_request(history: &[Message]) -> ChatRequest {
        let mut rest = history;
        let mut req = match history.first() {
            Some(m) if m.role == Role::System => {
                rest = &history[1..];
                ChatRequest::from_system(&m.content)
            }
            _ => ChatRequest::from_system(""),
        };
        for m in rest {
            let msg = match m.role {
                Role::System => ChatMessage::system(&m.content),
                Role::User => ChatMessage::user(&m.content),
                Role::Assistant => ChatMessage::assistant(&m.content),
            };
            req = req.append_message(msg);
        }
        req
    }
}

#[async_trait]
impl Provider for GenaiProvider {
    async fn chat(&self, history: &[Message]) -> Result<String, ProviderError> {
        let req = Self::build_request(history);
        let options = self.chat_options();

        let res = self
            .client
            .exec_chat_stream(&self.model, req, Some(&options))
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let mut stream = res.stream;
        let mut collected = String::new();
        let mut captured: Option<String> = None;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => collected.push_str(&chunk.content),
                Ok(ChatStreamEvent::End(end)) => {
                    if let Some(text) = end.captured_first_text() {
                        captured = Some(text.to_string());
                    }
                }
                Ok(_) => {}
                Err(e) => return Err(ProviderError::Stream(e.to_string())),
            }
        }

        Ok(captured.unwrap_or(collected))
    }

    async fn stream(&self, history: &[Message]) -> Result<TextStream, ProviderError> {
        let req = Self::build_request(history);
        let options = self.chat_options();

        let res = self
            .client
            .exec_chat_stream(&self.model, req, Some(&options))
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let stream = res.stream.filter_map(|event| async move {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => Some(Ok(chunk.content)),
                Ok(_) => None,
                Err(e) => Some(Err(ProviderError::Stream(e.to_string()))),
            }
        });

        Ok(stream.boxed())
    }

    fn for_model(&self, model: &str, temperature: Option<f32>) -> Option<Arc<dyn Provider>> {
        let rebound = GenaiProvider::new(model).with_temperature(temperature.or(self.temperature));
        Some(Arc::new(rebound))
    }
}

/// Validate that Ollama is running and the configured model is available.
///
/// Step 1: HTTP GET to the Ollama base URL with a 5-second timeout.
/// Step 2: HTTP POST to `/api/show` to verify the model is pulled.
///
/// The two failure modes carry distinct errors so the CLI can tell the
/// operator whether to start the server or pull the model.
pub async fn check_ollama_ready(model: &str) -> Result<(), ProviderError> {
    let http = reqwest::Client::new();

    // Server first; a dead server and a missing model need different fixes.
    if let Err(e) = http
        .get(OLLAMA_BASE_URL)
        .timeout(Duration::from_secs(5))
        .send()
        .await
    {
        return Err(ProviderError::Unavailable {
            url: OLLAMA_BASE_URL.to_string(),
            message: format!("is Ollama running? {e}"),
        });
    }

    let resp = http
        .post(format!("{OLLAMA_BASE_URL}api/show"))
        .json(&serde_json::json!({ "model": model }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ProviderError::ModelNotAvailable {
            model: model.to_string(),
            message: format!("could not query model info: {e}"),
        })?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(ProviderError::ModelNotAvailable {
            model: model.to_string(),
            message: format!(
                "not available (HTTP {}); try `ollama pull {model}`",
                resp.status()
            ),
        })
    }
}
