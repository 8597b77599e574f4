//! Model-provider abstraction.
//!
//! The agent loop only ever sees this two-method contract: send a message
//! history, get back either a complete response or a stream of text chunks.
//! The genai-backed implementation lives in [`genai`]; [`retry`] wraps any
//! provider with backoff. Tests substitute scripted fakes.

pub mod genai;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use genai::{check_ollama_ready, GenaiProvider};
pub use retry::{RetryPolicy, RetryingProvider};

/// One entry in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental response text. Each item is one chunk of assistant output.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// The capability the agent loop consumes. Implementations must be cheap to
/// share behind an `Arc` since every sub-agent holds a handle.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send the full history and return the complete assistant response.
    async fn chat(&self, history: &[Message]) -> Result<String, ProviderError>;

    /// Send the full history and return the response as a chunk stream.
    ///
    /// The default implementation performs a single `chat` call and yields
    /// the whole response as one chunk, so fakes only need `chat`.
    async fn stream(&self, history: &[Message]) -> Result<TextStream, ProviderError> {
        let text = self.chat(history).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// A provider bound to a different model, when the backend supports it.
    ///
    /// Returns `None` when the backend cannot rebind (scripted test fakes);
    /// callers fall back to `self`, so an agent definition's explicit model
    /// is honored on real backends and ignored by fakes.
    fn for_model(&self, _model: &str, _temperature: Option<f32>) -> Option<Arc<dyn Provider>> {
        None
    }
}
