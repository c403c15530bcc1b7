//! Gemini `generateContent` wire format (spec.md §6).

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
pub struct GeminiAdapter;

impl Adapter for GeminiAdapter {
    fn provider_tag(&self) -> ProviderTag {
        ProviderTag::Gemini
    }

    fn build_request(
        &self,
        client: &Client,
        config: &ProviderConfig,
        params: &CallParams<'_>,
    ) -> RequestBuilder {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            params.model
        );
        let body = json!({
            "contents": [
                { "parts": [{ "text": params.prompt }] },
            ],
            "generationConfig": {
                "temperature": params.temperature,
                "responseMimeType": "application/json",
                "maxOutputTokens": params.max_tokens,
            },
        });
        let mut req = client.post(url).json(&body);
        if let Some(key) = &config.credential {
            req = req.query(&[("key", key.as_str())]);
        }
        req
    }

    fn decode_response(
        &self,
        requested_model: &str,
        body: &Value,
    ) -> Result<DecodedResponse, ProviderError> {
        let candidate = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ProviderError::new(ErrorKind::ParseError, "no candidates in response"))?;

        let finish_reason = candidate.get("finishReason").and_then(Value::as_str);
        let safety_blocked = matches!(finish_reason, Some("SAFETY") | Some("RECITATION") | Some("OTHER"));

        let text = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let usage = body
            .get("usageMetadata")
            .map(|u| {
                let input = u
                    .get("promptTokenCount")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let output = u
                    .get("candidatesTokenCount")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let total = u
                    .get("totalTokenCount")
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

        Ok(DecodedResponse {
            text,
            usage,
            model: requested_model.to_owned(),
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
            "candidates": [{
                "content": { "parts": [{ "text": "{\"answer\":\"42\"}" }] },
                "finishReason": "STOP",
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 4,
                "totalTokenCount": 16,
            },
        });
        let decoded = GeminiAdapter
            .decode_response("gemini-1.5-pro", &body)
            .unwrap();
        assert_eq!(decoded.text, "{\"answer\":\"42\"}");
        assert_eq!(decoded.usage.total_tokens, 16);
        assert!(!decoded.safety_blocked);
    }

    #[test]
    fn test_safety_finish_reason() {
        let body = json!({
            "candidates": [{ "content": {"parts": []}, "finishReason": "SAFETY" }],
        });
        let decoded = GeminiAdapter
            .decode_response("gemini-1.5-pro", &body)
            .unwrap();
        assert!(decoded.safety_blocked);
    }
}
