//! Provider Configuration - LLM provider creation and API key resolution.

use instead_core::LlmConfig;
use instead_core::llm::{ProviderConfig, ProviderType};

/// Environment key fragment for a provider name (`open-router` -> `OPEN_ROUTER`)
fn provider_env_key(provider: &str) -> String {
    provider.trim().to_uppercase().replace('-', "_")
}

/// Resolve an API key: `INSTEAD_<PROVIDER>_API_KEY`, then the config file,
/// then the generic `INSTEAD_LLM_API_KEY`.
pub(crate) fn resolve_api_key<F>(provider: &str, configured: Option<&str>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let env_var = format!("INSTEAD_{}_API_KEY", provider_env_key(provider));
    lookup(&env_var)
        .filter(|key| !key.is_empty())
        .or_else(|| configured.map(str::to_string).filter(|key| !key.is_empty()))
        .or_else(|| lookup("INSTEAD_LLM_API_KEY"))
        .unwrap_or_default()
}

/// Build a provider configuration from the `llm` config section
pub(crate) fn create_provider_config(llm: &LlmConfig) -> ProviderConfig {
    provider_config_with(llm, |key| std::env::var(key).ok())
}

pub(crate) fn provider_config_with<F>(llm: &LlmConfig, lookup: F) -> ProviderConfig
where
    F: Fn(&str) -> Option<String>,
{
    let provider_type = ProviderType::from(llm.provider.as_str());
    let api_key = resolve_api_key(&llm.provider, llm.api_key.as_deref(), lookup);
    if api_key.is_empty() && provider_type == ProviderType::OpenAi {
        tracing::warn!("No API key configured for provider '{}'", llm.provider);
    }

    ProviderConfig {
        name: llm.provider.clone(),
        provider_type,
        api_key,
        base_url: llm.base_url.clone().filter(|url| !url.trim().is_empty()),
        organization: llm.organization.clone().filter(|org| !org.is_empty()),
        default_model: llm.model.clone(),
        timeout_ms: llm.timeout.saturating_mul(1000),
    }
}
