//! Provider construction — maps a session's provider selection onto a
//! concrete adapter.
//!
//! Credentials resolve in order: inline session settings, then the
//! variant's environment variable. Keys are never persisted; this is
//! the only place they are read.

use crate::anthropic::AnthropicProvider;
use crate::local::LocalHttpProvider;
use crate::openai_compat::OpenAiCompatProvider;
use agentd_core::error::ProviderError;
use agentd_core::provider::{Provider, ProviderKind, ProviderSettings};
use std::sync::Arc;

/// Build the provider a session is configured for.
pub fn build_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = resolve_api_key(kind, settings);

    match kind {
        ProviderKind::OpenaiCompat => {
            let key = api_key.ok_or_else(|| {
                ProviderError::NotConfigured(
                    "no API key for openai_compat (set OPENAI_API_KEY or provider_settings.api_key)"
                        .into(),
                )
            })?;
            Ok(Arc::new(OpenAiCompatProvider::new(
                settings.base_url.clone(),
                Some(key),
            )))
        }
        ProviderKind::Anthropic => {
            let key = api_key.ok_or_else(|| {
                ProviderError::NotConfigured(
                    "no API key for anthropic (set ANTHROPIC_API_KEY or provider_settings.api_key)"
                        .into(),
                )
            })?;
            Ok(Arc::new(AnthropicProvider::new(
                settings.base_url.clone(),
                key,
            )))
        }
        ProviderKind::LocalHttp => Ok(Arc::new(LocalHttpProvider::new(
            settings.base_url.clone(),
            api_key,
        )?)),
    }
}

fn resolve_api_key(kind: ProviderKind, settings: &ProviderSettings) -> Option<String> {
    settings
        .api_key
        .clone()
        .filter(|key| !key.is_empty())
        .or_else(|| kind.api_key_env().and_then(|var| std::env::var(var).ok()))
        .filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str, api_key: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            model: "test-model".into(),
            base_url: base_url.into(),
            api_key: api_key.map(String::from),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    #[test]
    fn inline_key_builds_openai_compat() {
        let provider =
            build_provider(ProviderKind::OpenaiCompat, &settings("", Some("sk-test"))).unwrap();
        assert_eq!(provider.name(), "openai_compat");
    }

    #[test]
    fn anthropic_without_key_is_not_configured() {
        // Only meaningful when the env var is absent; skip otherwise.
        if std::env::var("ANTHROPIC_API_KEY").is_ok() {
            return;
        }
        let err = build_provider(ProviderKind::Anthropic, &settings("", None)).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn local_http_needs_no_key() {
        let provider = build_provider(
            ProviderKind::LocalHttp,
            &settings("http://localhost:8080/v1", None),
        )
        .unwrap();
        assert_eq!(provider.name(), "local_http");
    }

    #[test]
    fn local_http_requires_base_url() {
        let err = build_provider(ProviderKind::LocalHttp, &settings("", None)).unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}
