use std::error::Error;

use futures::future::BoxFuture;
use thiserror::Error;

/// Result alias for text generation calls.
pub type GeneratorResult = Result<String, GeneratorError>;

/// Error raised by a text generation backend.
#[derive(Debug, Error)]
#[error("text generation failed: {message}")]
pub struct GeneratorError {
    /// Human readable description of the failure.
    message: String,
    /// Backend-specific cause, when one exists.
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl GeneratorError {
    /// Construct an error from a bare message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Construct an error wrapping a backend failure.
    pub fn backend(message: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Opaque asynchronous completion capability.
///
/// The core treats model access as "produce text or fail"; clients for real
/// model providers live outside this crate.
pub trait TextGenerator: Send + Sync {
    /// Produce a completion for the given prompt.
    fn complete(&self, prompt: String) -> BoxFuture<'static, GeneratorResult>;
}

/// Deterministic generator used by the demo binary and tests.
///
/// Echoes a short line derived from the prompt instead of calling a model,
/// so the full workshop flow can run without network access.
#[derive(Debug, Default, Clone)]
pub struct TemplateGenerator;

impl TextGenerator for TemplateGenerator {
    fn complete(&self, prompt: String) -> BoxFuture<'static, GeneratorResult> {
        let head: String = prompt.chars().take(96).collect();
        Box::pin(async move { Ok(format!("[{}]", head.trim())) })
    }
}
