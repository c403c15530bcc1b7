//! OpenAI (and OpenAI-compatible) wire format (spec.md §6).

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
pub struct OpenAiAdapter;

impl Adapter for OpenAiAdapter {
    fn provider_tag(&self) -> ProviderTag {
        ProviderTag::OpenAi
    }

    fn build_request(
        &self,
        client: &Client,
        config: &ProviderConfig,
        params: &CallParams<'_>,
    ) -> RequestBuilder {
        let url = format!("{}/v1/chat/completions", config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": params.model,
            "messages": [
                { "role": "user", "content": params.prompt },
            ],
            "response_format": { "type": "json_object" },
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        let mut req = client.post(url).json(&body);
        if let Some(key) = &config.credential {
            req = req.bearer_auth(key);
        }
        req
    }

    fn decode_response(
        &self,
        requested_model: &str,
        body: &Value,
    ) -> Result<DecodedResponse, ProviderError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::new(ErrorKind::ParseError, "no choices in response"))?;

        let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
        let safety_blocked = finish_reason == Some("content_filter");

        let text = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let usage = body
            .get("usage")
            .map(|u| {
                let input = u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output = u
                    .get("completion_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let total = u
                    .get("total_tokens")
                    .and_then(Value::as_u64)
                    .unwrap_or(input + output);
                Usage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: total,
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
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": { "content": "{\"answer\":\"42\"}" },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15 },
        });
        let decoded = OpenAiAdapter.decode_response("gpt-4o", &body).unwrap();
        assert_eq!(decoded.text, "{\"answer\":\"42\"}");
        assert_eq!(decoded.usage.input_tokens, 10);
        assert_eq!(decoded.usage.output_tokens, 5);
        assert_eq!(decoded.model, "gpt-4o-2024-08-06");
        assert!(!decoded.safety_blocked);
    }

    #[test]
    fn test_content_filter_is_safety_blocked() {
        let body = json!({
            "choices": [{ "message": { "content": "" }, "finish_reason": "content_filter" }],
        });
        let decoded = OpenAiAdapter.decode_response("gpt-4o", &body).unwrap();
        assert!(decoded.safety_blocked);
    }

    #[test]
    fn test_missing_choices_is_parse_error() {
        let body = json!({});
        let err = OpenAiAdapter.decode_response("gpt-4o", &body).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
    }
}
