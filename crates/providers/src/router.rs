//! Tier router — builds the ranked tier list from configuration.
//!
//! One HTTP client is shared by every tier. Without a credential no tier
//! is built, so the orchestrator never attempts a remote call.

use crate::fallback::{ModelFallbackOrchestrator, RetryPolicy, TierHandle};
use crate::openai_compat::OpenAiCompatProvider;
use crate::quota::{ModelTier, QuotaTable};
use opsdesk_config::{AppConfig, TierConfig};
use opsdesk_core::context::LocalResponder;
use opsdesk_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Build tier handles backed by the OpenAI-compatible client.
pub fn build_tiers(config: &AppConfig) -> Vec<TierHandle> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        });

    build_tiers_with(config, |tier, api_key| {
        Arc::new(OpenAiCompatProvider::with_client(
            tier.name.clone(),
            config.api_base_url.clone(),
            api_key,
            client.clone(),
        ))
    })
}

/// Build tier handles with a custom provider factory.
///
/// Returns an empty list, without calling `factory`, when no API key is set.
pub fn build_tiers_with<F>(config: &AppConfig, mut factory: F) -> Vec<TierHandle>
where
    F: FnMut(&TierConfig, &str) -> Arc<dyn Provider>,
{
    let Some(api_key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
        info!("No API key configured; remote tiers disabled");
        return Vec::new();
    };

    config
        .tiers_by_rank()
        .into_iter()
        .map(|tier| TierHandle::new(ModelTier::from_config(tier), factory(tier, api_key)))
        .collect()
}

/// Wire a ready-to-use orchestrator from configuration.
pub fn build_orchestrator(
    config: &AppConfig,
    tiers: Vec<TierHandle>,
    quota: Arc<QuotaTable>,
    responder: Arc<dyn LocalResponder>,
) -> ModelFallbackOrchestrator {
    info!(tiers = tiers.len(), "Building model fallback orchestrator");
    ModelFallbackOrchestrator::new(quota, responder)
        .with_tiers(tiers)
        .with_retry(RetryPolicy::from_config(config))
        .with_timeout(Duration::from_secs(config.request_timeout_secs))
        .with_history_window(config.context.history_window)
        .with_max_message_chars(config.history.max_message_chars)
        .with_sampling(config.temperature, Some(config.max_tokens))
}
