//! Component D: the per-provider client actor (spec.md §4.4).
//!
//! Spec.md §9 maps the source's process-per-provider actor onto either
//! "a task with an inbound command channel, or a mutex-guarded struct".
//! We take the mutex-guarded struct option: a [`tokio::sync::Mutex`]
//! held for the full duration of a call (including its retries) gives
//! the same "one call in flight per provider, B and C mutated without
//! external locks" guarantee as a dedicated actor task, with less
//! machinery. This is the same trade the teacher makes in
//! `queues::work::WorkQueue` — a bounded resource guarded by ordinary
//! async primitives rather than a hand-rolled scheduler.

use std::time::{Duration, Instant};

use reqwest::Client as HttpClient;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    circuit_breaker::{Allow, CircuitBreaker, CircuitState},
    config::{CircuitBreakerConfig, ProviderConfig},
    error::{ErrorKind, ProviderError},
    model::{AnswerStatus, Citation, ProviderTag, Usage},
    prelude::*,
    provider::{Adapter, CallParams, adapter_for, classify_http_status, json_recovery},
    rate_limit::{Acquire, TokenBucket},
};

/// Everything the client produces for one call, short of the `run_id`
/// and `round` the coordinator stamps on afterward.
#[derive(Debug, Clone)]
pub struct ProviderCallOutcome {
    pub model: String,
    pub status: AnswerStatus,
    pub answer: Option<String>,
    pub confidence: Option<f64>,
    pub key_claims: Option<Vec<String>>,
    pub assumptions: Option<Vec<String>>,
    pub citations: Option<Vec<Citation>>,
    pub usage: Usage,
    pub latency_ms: u64,
    pub error: Option<ProviderError>,
    pub raw_response: Option<String>,
}

/// State returned by [`ProviderClient::inspect`] (spec.md §6,
/// `ProviderClient.Inspect`).
#[derive(Debug, Clone, Copy)]
pub struct Inspect {
    pub circuit_state: CircuitState,
    pub tokens_available: f64,
}

struct ClientState {
    breaker: CircuitBreaker,
    bucket: TokenBucket,
}

/// One long-lived serialized client for one provider.
pub struct ProviderClient {
    adapter: Box<dyn Adapter>,
    http: HttpClient,
    config: ProviderConfig,
    max_retries: u32,
    debug_mode: bool,
    state: Mutex<ClientState>,
}

impl ProviderClient {
    pub fn new(
        config: ProviderConfig,
        circuit_breaker_config: CircuitBreakerConfig,
        max_retries: u32,
        debug_mode: bool,
    ) -> Self {
        let adapter = adapter_for(config.tag);
        let bucket = config.rate_limit.to_token_bucket();
        let breaker = CircuitBreaker::with_params(
            circuit_breaker_config.failure_threshold,
            circuit_breaker_config.recovery_timeout,
        );
        Self {
            adapter,
            http: HttpClient::new(),
            config,
            max_retries,
            debug_mode,
            state: Mutex::new(ClientState { breaker, bucket }),
        }
    }

    pub fn tag(&self) -> ProviderTag {
        self.config.tag
    }

    /// Current breaker/bucket state, for health reporting.
    pub async fn inspect(&self) -> Inspect {
        let mut guard = self.state.lock().await;
        Inspect {
            circuit_state: guard.breaker.state(),
            tokens_available: guard.bucket.available(),
        }
    }

    /// Run one chat-completion call and parse its Round-1/Round-2 answer
    /// schema (spec.md §4.4, §6).
    #[instrument(level = "debug", skip(self, prompt), fields(provider = %self.config.tag))]
    pub async fn call(&self, prompt: &str, model: Option<&str>) -> ProviderCallOutcome {
        match self.call_raw(prompt, model).await {
            Ok(raw) => match json_recovery::parse_with_recovery(&raw.text)
                .and_then(|value| parse_round_schema(&value))
            {
                Some(parsed) => ProviderCallOutcome {
                    model: raw.model,
                    status: AnswerStatus::Ok,
                    answer: Some(parsed.answer),
                    confidence: parsed.confidence,
                    key_claims: parsed.key_claims,
                    assumptions: parsed.assumptions,
                    citations: parsed.citations,
                    usage: raw.usage,
                    latency_ms: raw.latency_ms,
                    error: None,
                    raw_response: raw.raw_response,
                },
                None => ProviderCallOutcome {
                    model: raw.model,
                    status: AnswerStatus::ParseError,
                    answer: Some(raw.text),
                    confidence: None,
                    key_claims: None,
                    assumptions: None,
                    citations: None,
                    usage: raw.usage,
                    latency_ms: raw.latency_ms,
                    error: Some(ProviderError::new(
                        ErrorKind::ParseError,
                        "assistant text did not contain the expected JSON shape",
                    )),
                    raw_response: raw.raw_response,
                },
            },
            Err(err) => failure_outcome(
                model.unwrap_or(&self.config.default_model).to_owned(),
                err,
                Duration::default(),
            ),
        }
    }

    /// Run one call and return its decoded text undecoded by any
    /// response schema, for callers — namely [`crate::arbiter`] — that
    /// apply their own JSON shape on top (spec.md §4.6).
    #[instrument(level = "debug", skip(self, prompt), fields(provider = %self.config.tag))]
    pub async fn call_raw(&self, prompt: &str, model: Option<&str>) -> Result<RawCall, ProviderError> {
        let model = model.unwrap_or(&self.config.default_model).to_owned();
        let mut guard = self.state.lock().await;

        // Step 1: consult the circuit breaker.
        if guard.breaker.allow() == Allow::Rejected {
            return Err(ProviderError::new(ErrorKind::CircuitOpen, "circuit breaker is open"));
        }

        // Step 2: consult the rate limiter. Does not count against the
        // breaker.
        if guard.bucket.acquire() == Acquire::RateLimited {
            return Err(ProviderError::new(ErrorKind::RateLimited, "local rate limit exceeded"));
        }

        let params = CallParams {
            model: &model,
            prompt,
            temperature: 0.7,
            max_tokens: 4096,
        };

        let mut attempt = 0u32;
        let start = Instant::now();
        loop {
            if attempt > 0 {
                // Retries re-check the breaker (it may have opened from
                // this same call's own prior failure) but not the
                // bucket (spec.md §4.4 step 5).
                if guard.breaker.allow() == Allow::Rejected {
                    return Err(ProviderError::new(ErrorKind::CircuitOpen, "circuit breaker is open"));
                }
            }

            match self.attempt_once(&params, self.config.timeout).await {
                Ok(mut raw) => {
                    guard.breaker.record_success();
                    raw.latency_ms = start.elapsed().as_millis() as u64;
                    return Ok(raw);
                }
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let backoff_ms = 1000u64 * 2u64.pow(attempt);
                    warn!(attempt, backoff_ms, error = %err, "retrying provider call");
                    attempt += 1;
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    continue;
                }
                Err(err) => {
                    guard.breaker.record_failure();
                    return Err(err);
                }
            }
        }
    }

    /// Perform exactly one HTTP round trip and normalize the result.
    async fn attempt_once(
        &self,
        params: &CallParams<'_>,
        timeout: Duration,
    ) -> Result<RawCall, ProviderError> {
        let request = self.adapter.build_request(&self.http, &self.config, params);

        let response = match tokio::time::timeout(timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) if err.is_timeout() => {
                return Err(ProviderError::new(ErrorKind::Timeout, err.to_string()));
            }
            Ok(Err(err)) => {
                return Err(ProviderError::new(ErrorKind::NetworkError, err.to_string()));
            }
            Err(_) => {
                return Err(ProviderError::new(ErrorKind::Timeout, "request timed out"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(classify_http_status(status));
        }

        let raw_text = response
            .text()
            .await
            .map_err(|err| ProviderError::new(ErrorKind::NetworkError, err.to_string()))?;
        let body: Value = serde_json::from_str(&raw_text)
            .map_err(|_| ProviderError::new(ErrorKind::ParseError, "response body is not JSON"))?;

        let decoded = self.adapter.decode_response(params.model, &body)?;
        if decoded.safety_blocked {
            return Err(ProviderError::new(
                ErrorKind::SafetyBlock,
                "provider safety filter triggered",
            ));
        }

        let raw_response = self.debug_mode.then(|| raw_text.clone());

        Ok(RawCall {
            model: decoded.model,
            text: decoded.text,
            usage: decoded.usage,
            latency_ms: 0,
            raw_response,
        })
    }
}

/// The decoded text and usage of one successful provider call, before
/// any caller-specific JSON schema has been applied.
#[derive(Debug, Clone)]
pub struct RawCall {
    pub model: String,
    pub text: String,
    pub usage: Usage,
    pub latency_ms: u64,
    pub raw_response: Option<String>,
}

fn failure_outcome(model: String, err: ProviderError, elapsed: Duration) -> ProviderCallOutcome {
    let status = if err.kind == ErrorKind::Timeout {
        AnswerStatus::Timeout
    } else if err.kind == ErrorKind::ParseError {
        AnswerStatus::ParseError
    } else {
        AnswerStatus::Error
    };
    ProviderCallOutcome {
        model,
        status,
        answer: None,
        confidence: None,
        key_claims: None,
        assumptions: None,
        citations: None,
        usage: Usage::default(),
        latency_ms: elapsed.as_millis() as u64,
        error: Some(err),
        raw_response: None,
    }
}

struct ParsedRoundAnswer {
    answer: String,
    confidence: Option<f64>,
    key_claims: Option<Vec<String>>,
    assumptions: Option<Vec<String>>,
    citations: Option<Vec<Citation>>,
}

/// Parse the Round-1/Round-2 response schema from spec.md §6.
fn parse_round_schema(value: &Value) -> Option<ParsedRoundAnswer> {
    let answer = value.get("answer")?.as_str()?.to_owned();
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|c| c.clamp(0.0, 1.0));
    let key_claims = value
        .get("key_claims")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect());
    let assumptions = value
        .get("assumptions")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect());
    let citations = value.get("citations").and_then(Value::as_array).map(|a| {
        a.iter()
            .map(|c| Citation {
                title: c.get("title").and_then(Value::as_str).map(String::from),
                url: c.get("url").and_then(Value::as_str).map(String::from),
            })
            .collect()
    });
    Some(ParsedRoundAnswer {
        answer,
        confidence,
        key_claims,
        assumptions,
        citations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_schema_full() {
        let value = json!({
            "answer": "42",
            "confidence": 0.85,
            "key_claims": ["42 is the answer"],
            "assumptions": ["the question was serious"],
            "citations": [{"title": "Life", "url": "https://example.com"}],
        });
        let parsed = parse_round_schema(&value).unwrap();
        assert_eq!(parsed.answer, "42");
        assert_eq!(parsed.confidence, Some(0.85));
        assert_eq!(parsed.key_claims.unwrap(), vec!["42 is the answer"]);
    }

    #[test]
    fn test_parse_round_schema_missing_answer() {
        let value = json!({ "confidence": 0.5 });
        assert!(parse_round_schema(&value).is_none());
    }

    #[test]
    fn test_parse_round_schema_confidence_clamped() {
        let value = json!({ "answer": "x", "confidence": 1.5 });
        let parsed = parse_round_schema(&value).unwrap();
        assert_eq!(parsed.confidence, Some(1.0));
    }
}
