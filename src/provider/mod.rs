//! Component A: provider adapters (spec.md §4.1).
//!
//! One [`Adapter`] per provider tag builds a provider-specific HTTP
//! request and turns that provider's JSON response shape into the
//! common `(text, Usage, finish state)` triple. Everything above the
//! wire format — retries, rate limiting, the circuit breaker, JSON
//! recovery, schema extraction into a [`crate::model::ProviderAnswer`]
//! — lives in [`crate::client`], mirroring how the teacher splits
//! `drivers::Driver` (wire format per provider) from `queues::chat`
//! (the actually-shared retry/queueing logic).

pub mod anthropic;
pub mod gemini;
pub mod json_recovery;
pub mod openai;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;

use crate::{
    config::ProviderConfig,
    error::{ErrorKind, ProviderError},
    model::{ProviderTag, Usage},
};

/// Parameters for one chat-completion call, independent of provider.
#[derive(Debug, Clone)]
pub struct CallParams<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallParams<'_> {
    fn default() -> Self {
        Self {
            model: "",
            prompt: "",
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

/// The provider-agnostic result of successfully decoding a 2xx JSON
/// response body (spec.md §4.1 steps 1-4).
#[derive(Debug, Clone)]
pub struct DecodedResponse {
    /// The assistant's raw text content (not yet parsed as structured
    /// JSON — that happens in [`crate::client`]).
    pub text: String,
    pub usage: Usage,
    pub model: String,
    /// Set when the provider's own finish-reason / stop-reason signals
    /// a safety or content filter trip (spec.md §4.1 step 4).
    pub safety_blocked: bool,
}

/// One provider's request builder + response normalizer.
pub trait Adapter: std::fmt::Debug + Send + Sync {
    fn provider_tag(&self) -> ProviderTag;

    /// Build the outgoing HTTP request for `params`.
    fn build_request(
        &self,
        client: &Client,
        config: &ProviderConfig,
        params: &CallParams<'_>,
    ) -> RequestBuilder;

    /// Decode a 2xx JSON body into the common shape (spec.md §4.1
    /// steps 1-4). Returns a `parse_error`/`safety_block`
    /// [`ProviderError`] if the body doesn't match this provider's
    /// expected shape.
    fn decode_response(
        &self,
        requested_model: &str,
        body: &Value,
    ) -> Result<DecodedResponse, ProviderError>;
}

/// Build an [`Adapter`] for `tag`.
pub fn adapter_for(tag: ProviderTag) -> Box<dyn Adapter> {
    match tag {
        ProviderTag::OpenAi => Box::new(openai::OpenAiAdapter),
        ProviderTag::Anthropic => Box::new(anthropic::AnthropicAdapter),
        ProviderTag::Gemini => Box::new(gemini::GeminiAdapter),
    }
}

/// Classify an HTTP status code per spec.md §4.1's response
/// classification table. Only called for non-2xx responses.
pub fn classify_http_status(status: StatusCode) -> ProviderError {
    let code = status.as_u16();
    match code {
        401 => ProviderError::new(ErrorKind::AuthError, "authentication rejected")
            .with_status(code),
        403 => ProviderError::new(ErrorKind::Forbidden, "request forbidden").with_status(code),
        429 => ProviderError::new(ErrorKind::RateLimit, "remote rate limit").with_status(code),
        500..=599 => {
            ProviderError::new(ErrorKind::ServerError, "remote server error").with_status(code)
        }
        _ => ProviderError::new(ErrorKind::NetworkError, format!("unexpected status {code}"))
            .with_status(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http_status() {
        assert_eq!(
            classify_http_status(StatusCode::UNAUTHORIZED).kind,
            ErrorKind::AuthError
        );
        assert_eq!(
            classify_http_status(StatusCode::FORBIDDEN).kind,
            ErrorKind::Forbidden
        );
        assert_eq!(
            classify_http_status(StatusCode::TOO_MANY_REQUESTS).kind,
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify_http_status(StatusCode::BAD_GATEWAY).kind,
            ErrorKind::ServerError
        );
    }
}
