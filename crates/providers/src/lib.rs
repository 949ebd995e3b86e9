//! Decision maker implementations for deskloop.
//!
//! All implementations satisfy `deskloop_core::DecisionMaker`.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatDecisionMaker;

use deskloop_core::decision::DecisionMaker;
use deskloop_core::error::DecisionError;
use std::sync::Arc;

/// Build the configured decision maker. An API key is required.
pub fn build_from_config(
    config: &deskloop_config::AppConfig,
) -> Result<Arc<dyn DecisionMaker>, DecisionError> {
    let api_key = config.api_key.clone().ok_or_else(|| {
        DecisionError::NotConfigured(
            "no API key; set DESKLOOP_API_KEY or api_key in ~/.deskloop/config.toml".into(),
        )
    })?;

    let decision_maker = OpenAiCompatDecisionMaker::new("openai_compat", &config.base_url, api_key, &config.model)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    tracing::info!(base_url = %config.base_url, model = %config.model, "Decision maker ready");
    Ok(Arc::new(decision_maker))
}
