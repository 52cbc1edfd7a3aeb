//! Provider factory: builds the configured model backend.

use std::sync::Arc;
use std::time::Duration;

use jarvis_config::LlmConfig;
use jarvis_core::provider::Provider;
use tracing::info;

use crate::openai_compat::OpenAiCompatProvider;

/// Build the model backend described by `[llm]`.
///
/// Every supported backend speaks the OpenAI-compatible streaming protocol;
/// the provider name only chooses a default endpoint.
pub fn build_from_config(config: &LlmConfig) -> Arc<dyn Provider> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));
    let api_key = config.api_key.clone().unwrap_or_else(|| "EMPTY".into());

    info!(provider = %config.provider, base_url = %base_url, model = %config.model, "Using model backend");

    Arc::new(OpenAiCompatProvider::with_timeout(
        &config.provider,
        base_url,
        api_key,
        Duration::from_secs(config.request_timeout_secs),
    ))
}

/// Get the default base URL for well-known backends.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "lmstudio" => "http://localhost:1234/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        _ => "http://localhost:8000/v1".into(),
    }
}
