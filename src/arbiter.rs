//! Component F: the arbiter ("Dredd") synthesis chain (spec.md §4.6).
//!
//! Re-uses D (`crate::client::ProviderClient`) for the arbiter call
//! itself — the arbiter is just another provider call with its own
//! prompt and its own response schema, the same way the teacher's
//! `cmd::chat` re-uses `llm_client::complete` for both the main chat
//! turn and any follow-up summarization call.

use std::collections::HashMap;

use serde_json::Value;

use crate::{
    client::ProviderClient,
    config::MarketConfig,
    cost::CostCalculator,
    ids::RunId,
    model::{ArbiterOutput, ArbiterSpec, Conflict, ConflictClaim, ConflictStatus, FactTableEntry, ProviderTag},
    prelude::*,
    provider::json_recovery,
};

/// Everything the coordinator has in hand once a round loop breaks.
pub struct ArbiterInput<'a> {
    pub run_id: RunId,
    pub question: &'a str,
    pub rounds_completed: u32,
    /// The successful answers from the final round, alongside the
    /// provider tag they came from (spec.md §4.6 inputs).
    pub answers: &'a [(ProviderTag, crate::model::ProviderAnswer)],
    pub chat_override: Option<&'a ArbiterSpec>,
}

/// Run the full primary→retry→fallback chain and produce an
/// [`ArbiterOutput`] (spec.md §4.6). Never fails — on total failure it
/// returns `arbiter_failed = true` with the best available answer.
pub async fn synthesize(
    clients: &HashMap<ProviderTag, ProviderClient>,
    config: &MarketConfig,
    cost: &CostCalculator,
    input: ArbiterInput<'_>,
) -> ArbiterOutput {
    let prompt = build_prompt(input.question, input.answers);
    let primary = input
        .chat_override
        .cloned()
        .unwrap_or_else(|| config.arbiter_default.clone());

    let mut output = try_spec(clients, cost, &primary, &prompt).await;
    if output.is_none() {
        info!("primary arbiter attempt failed or produced no final_answer; retrying once");
        output = try_spec(clients, cost, &primary, &prompt).await;
    }
    if output.is_none() {
        warn!("primary arbiter exhausted; falling back");
        output = try_spec(clients, cost, &config.arbiter_fallback, &prompt).await;
    }

    let mut output = match output {
        Some(output) => output,
        None => {
            warn!("arbiter chain exhausted entirely; falling back to best answer by confidence");
            fallback_output(&config.arbiter_fallback, input.answers)
        }
    };
    output.run_id = input.run_id;
    output
}

/// One attempt at one arbiter spec: call D, parse the response, and
/// build an [`ArbiterOutput`] if (and only if) the response both
/// succeeded and carried a usable `final_answer`.
async fn try_spec(
    clients: &HashMap<ProviderTag, ProviderClient>,
    cost: &CostCalculator,
    spec: &ArbiterSpec,
    prompt: &str,
) -> Option<ArbiterOutput> {
    let client = clients.get(&spec.provider)?;
    let raw = match client.call_raw(prompt, Some(&spec.model)).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(provider = %spec.provider, error = %err, "arbiter call failed");
            return None;
        }
    };

    let value = json_recovery::parse_with_recovery(&raw.text)?;
    let final_answer = value.get("final_answer").and_then(Value::as_str)?.to_owned();

    let cost_usd = cost.cost_usd(&raw.model, raw.usage.input_tokens, raw.usage.output_tokens);
    Some(ArbiterOutput {
        run_id: crate::ids::RunId::default(),
        arbiter: ArbiterSpec::new(spec.provider, raw.model.clone()),
        final_answer: Some(final_answer),
        agreements: string_array(&value, "agreements"),
        conflicts: parse_conflicts(&value),
        fact_table: parse_fact_table(&value),
        next_questions: string_array(&value, "next_questions"),
        overall_confidence: value.get("overall_confidence").and_then(Value::as_f64),
        arbiter_failed: false,
        latency_ms: raw.latency_ms,
        cost_usd,
    })
}

/// Every attempt failed: synthesize a degraded output from the best
/// non-null-confidence answer (spec.md §4.6 step 5).
fn fallback_output(
    fallback_spec: &ArbiterSpec,
    answers: &[(ProviderTag, crate::model::ProviderAnswer)],
) -> ArbiterOutput {
    let best = answers
        .iter()
        .filter_map(|(_, a)| a.confidence.map(|c| (c, a)))
        .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    ArbiterOutput {
        run_id: crate::ids::RunId::default(),
        arbiter: fallback_spec.clone(),
        final_answer: best.and_then(|(_, a)| a.answer.clone()),
        agreements: Vec::new(),
        conflicts: Vec::new(),
        fact_table: Vec::new(),
        next_questions: Vec::new(),
        overall_confidence: best.map(|(c, _)| c),
        arbiter_failed: true,
        latency_ms: 0,
        cost_usd: None,
    }
}

/// Build the arbiter prompt carrying every final-round answer
/// (spec.md §4.6 step 1).
fn build_prompt(question: &str, answers: &[(ProviderTag, crate::model::ProviderAnswer)]) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are the arbiter. Synthesize a single final answer from the following provider responses.\n\n");
    prompt.push_str("Question: ");
    prompt.push_str(question);
    prompt.push_str("\n\n");

    for (tag, answer) in answers {
        prompt.push_str(&format!(
            "--- {} ({}) ---\nconfidence: {}\nanswer: {}\n",
            tag,
            answer.model,
            answer
                .confidence
                .map(|c| c.to_string())
                .unwrap_or_else(|| "null".into()),
            answer.answer.as_deref().unwrap_or(""),
        ));
        if let Some(claims) = &answer.key_claims {
            prompt.push_str("key_claims:\n");
            for claim in claims {
                prompt.push_str(&format!("  - {claim}\n"));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Respond as JSON: {\"final_answer\": str, \"agreements\": [str], \
         \"conflicts\": [{\"topic\": str, \"claims\": [{\"provider\": str, \"claim\": str}], \
         \"resolution\": str, \"status\": \"RESOLVED\"|\"UNRESOLVED\", \"confidence\": number}], \
         \"fact_table\": [{\"claim\": str, \"support\": [str], \"confidence\": number}], \
         \"next_questions\": [str], \"overall_confidence\": number}",
    );
    prompt
}

fn string_array(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

/// `conflicts` may be a bare array or `{items: [...]}` (spec.md §4.6
/// step 6).
fn items_array<'a>(value: &'a Value, key: &str) -> Vec<&'a Value> {
    match value.get(key) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(obj)) => obj
            .get("items")
            .and_then(Value::as_array)
            .map(|a| a.iter().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_conflicts(value: &Value) -> Vec<Conflict> {
    items_array(value, "conflicts")
        .into_iter()
        .filter_map(|c| {
            let topic = c.get("topic").and_then(Value::as_str)?.to_owned();
            let claims = c
                .get("claims")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(|claim| {
                            let provider = parse_provider_tag(claim.get("provider")?.as_str()?)?;
                            let claim_text = claim.get("claim")?.as_str()?.to_owned();
                            Some(ConflictClaim { provider, claim: claim_text })
                        })
                        .collect()
                })
                .unwrap_or_default();
            let resolution = c.get("resolution").and_then(Value::as_str).unwrap_or("").to_owned();
            let status = match c.get("status").and_then(Value::as_str) {
                Some("RESOLVED") => ConflictStatus::Resolved,
                _ => ConflictStatus::Unresolved,
            };
            let confidence = c.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            Some(Conflict { topic, claims, resolution, status, confidence })
        })
        .collect()
}

fn parse_fact_table(value: &Value) -> Vec<FactTableEntry> {
    items_array(value, "fact_table")
        .into_iter()
        .filter_map(|entry| {
            let claim = entry.get("claim")?.as_str()?.to_owned();
            let support = entry
                .get("support")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| parse_provider_tag(v.as_str()?)).collect())
                .unwrap_or_default();
            let confidence = entry.get("confidence").and_then(Value::as_f64).unwrap_or(0.0);
            Some(FactTableEntry { claim, support, confidence })
        })
        .collect()
}

fn parse_provider_tag(s: &str) -> Option<ProviderTag> {
    ProviderTag::ALL.into_iter().find(|t| t.as_str().eq_ignore_ascii_case(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerStatus, ProviderAnswer, Usage};

    fn answer(provider: ProviderTag, confidence: f64) -> (ProviderTag, ProviderAnswer) {
        (
            provider,
            ProviderAnswer {
                run_id: crate::ids::RunId::default(),
                round: 1,
                provider,
                model: "m".into(),
                status: AnswerStatus::Ok,
                answer: Some("42".into()),
                confidence: Some(confidence),
                key_claims: Some(vec!["42".into()]),
                assumptions: None,
                citations: None,
                usage: Usage::default(),
                latency_ms: 10,
                error: None,
                raw_response: None,
            },
        )
    }

    #[test]
    fn test_build_prompt_includes_every_answer() {
        let answers = vec![answer(ProviderTag::OpenAi, 0.9), answer(ProviderTag::Anthropic, 0.7)];
        let prompt = build_prompt("what is the answer?", &answers);
        assert!(prompt.contains("openai"));
        assert!(prompt.contains("anthropic"));
        assert!(prompt.contains("what is the answer?"));
    }

    #[test]
    fn test_fallback_output_picks_highest_confidence() {
        let answers = vec![answer(ProviderTag::OpenAi, 0.4), answer(ProviderTag::Anthropic, 0.9)];
        let fallback_spec = ArbiterSpec::new(ProviderTag::OpenAi, "gpt-4o");
        let output = fallback_output(&fallback_spec, &answers);
        assert!(output.arbiter_failed);
        assert_eq!(output.overall_confidence, Some(0.9));
        assert_eq!(output.final_answer, Some("42".into()));
    }

    #[test]
    fn test_parse_conflicts_accepts_items_wrapper() {
        let value = json!({
            "conflicts": { "items": [
                { "topic": "t", "claims": [{"provider": "openai", "claim": "c"}],
                  "resolution": "r", "status": "RESOLVED", "confidence": 0.5 }
            ] }
        });
        let conflicts = parse_conflicts(&value);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].status, ConflictStatus::Resolved);
    }

    #[test]
    fn test_parse_provider_tag_case_insensitive() {
        assert_eq!(parse_provider_tag("OpenAI"), Some(ProviderTag::OpenAi));
        assert_eq!(parse_provider_tag("bogus"), None);
    }
}
