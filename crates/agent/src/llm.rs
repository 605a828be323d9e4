//! Structured model invocation.
//!
//! Every stage talks to the language model through [`StructuredLlm::invoke`]:
//! a system prompt, a user message, and a JSON schema the reply must match.
//! The reply is parsed into a typed [`ModelOutput`]; anything that does not
//! parse or fails the type's own checks becomes a [`ValidationError`].

use lorekeep_core::error::{Error, ValidationError};
use lorekeep_core::message::Message;
use lorekeep_core::provider::{Provider, ProviderRequest, ResponseSchema};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// A typed model reply with its JSON schema and semantic checks.
pub trait ModelOutput: DeserializeOwned + Send {
    /// Schema name sent to the provider and used in validation errors.
    const NAME: &'static str;

    fn json_schema() -> serde_json::Value;

    /// Field-level problems serde cannot catch (ranges, empty strings).
    fn issues(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A provider bound to one model and sampling setup.
#[derive(Clone)]
pub struct StructuredLlm {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl StructuredLlm {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.3,
            max_tokens: None,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &lorekeep_config::AppConfig) -> Self {
        Self::new(provider, &config.default_model)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt and parse the reply as `T`.
    ///
    /// Backend failures surface as `Error::Provider`; malformed replies as
    /// `Error::Validation`.
    pub async fn invoke<T: ModelOutput>(&self, system_prompt: &str, user_message: &str) -> Result<T, Error> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system_prompt), Message::user(user_message)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_schema: Some(ResponseSchema {
                name: T::NAME.to_string(),
                schema: T::json_schema(),
            }),
        };

        let response = self.provider.complete(request).await?;
        debug!(
            schema = T::NAME,
            model = %response.model,
            tokens = response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
            "Model replied"
        );
        Ok(parse_output::<T>(&response.message.content)?)
    }
}

/// Parse raw model text as `T`, then run its semantic checks.
pub fn parse_output<T: ModelOutput>(raw: &str) -> Result<T, ValidationError> {
    let body = strip_fences(raw);
    if body.is_empty() {
        return Err(ValidationError::single(T::NAME, "empty response"));
    }
    let value: T = serde_json::from_str(body).map_err(|e| ValidationError::single(T::NAME, e.to_string()))?;
    let issues = value.issues();
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(ValidationError::new(T::NAME, issues))
    }
}

/// Models sometimes wrap JSON in a markdown fence despite the schema.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
