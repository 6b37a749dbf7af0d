//! Local HTTP provider — a self-hosted service exposing an
//! OpenAI-style chat+stream endpoint (llama.cpp server, vLLM, Ollama,
//! LocalAI, ...).
//!
//! The wire format matches the OpenAI-compatible adapter; what differs
//! is the contract: no API key is required and the base URL is
//! mandatory, since there is no hosted default to fall back to.

use agentd_core::error::ProviderError;
use agentd_core::provider::{ChatRequest, Provider, ProviderEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::openai_compat::OpenAiCompatProvider;

pub struct LocalHttpProvider {
    inner: OpenAiCompatProvider,
}

impl LocalHttpProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, ProviderError> {
        let base_url = base_url.into();
        if base_url.is_empty() {
            return Err(ProviderError::NotConfigured(
                "local_http provider requires a base_url".into(),
            ));
        }
        Ok(Self {
            inner: OpenAiCompatProvider::named("local_http", base_url, api_key),
        })
    }
}

#[async_trait]
impl Provider for LocalHttpProvider {
    fn name(&self) -> &str {
        "local_http"
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<ProviderEvent, ProviderError>>, ProviderError> {
        self.inner.chat_stream(request).await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
