//! Anthropic Messages API wire format (spec.md §6).

use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::{
    config::ProviderConfig,
    error::{ErrorKind, ProviderError},
    model::{ProviderTag, Usage},
    prelude::*,
};

use super::{Adapter, CallParams, DecodedResponse};

#[derive(Debug)]
pub struct AnthropicAdapter;

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl Adapter for AnthropicAdapter {
    fn provider_tag(&self) -> ProviderTag {
        ProviderTag::Anthropic
    }

    fn build_request(
        &self,
        client: &Client,
        config: &ProviderConfig,
        params: &CallParams<'_>,
    ) -> RequestBuilder {
        let url = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [
                { "role": "user", "content": params.prompt },
            ],
        });
        let mut req = client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        if let Some(key) = &config.credential {
            req = req.header("x-api-key", key);
        }
        req
    }

    fn decode_response(
        &self,
        requested_model: &str,
        body: &Value,
    ) -> Result<DecodedResponse, ProviderError> {
        let stop_reason = body.get("stop_reason").and_then(Value::as_str);
        let safety_blocked = matches!(stop_reason, Some("content_filter") | Some("safety"));

        let content = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::new(ErrorKind::ParseError, "no content in response"))?;
        let text = content
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");

        let usage = body
            .get("usage")
            .map(|u| {
                let input = u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output = u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                Usage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: input + output,
                    cost_usd: None,
                }
            })
            .unwrap_or_default();

        let model = body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_owned();

        Ok(DecodedResponse {
            text,
            usage,
            model,
            safety_blocked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_response() {
        let body = json!({
            "model": "claude-3-5-sonnet-20241022",
            "stop_reason": "end_turn",
            "content": [
                { "type": "text", "text": "{\"answer\":" },
                { "type": "text", "text": "\"42\"}" },
            ],
            "usage": { "input_tokens": 20, "output_tokens": 8 },
        });
        let decoded = AnthropicAdapter.decode_response("claude", &body).unwrap();
        assert_eq!(decoded.text, "{\"answer\":\"42\"}");
        assert_eq!(decoded.usage.total_tokens, 28);
        assert!(!decoded.safety_blocked);
    }

    #[test]
    fn test_safety_stop_reason() {
        let body = json!({ "stop_reason": "safety", "content": [] });
        let decoded = AnthropicAdapter.decode_response("claude", &body).unwrap();
        assert!(decoded.safety_blocked);
    }
}
