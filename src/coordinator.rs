//! Component G: the Market Coordinator (spec.md §4.7).
//!
//! The per-run round-loop state machine. Fans out to D (one
//! [`ProviderClient`] per provider) bounded by `max_concurrency`, the
//! same `futures::stream::buffer_unordered` pattern the teacher uses
//! in `cmd::StreamOpts::apply_stream_buffering_opts` for its own
//! bounded-parallelism job queue.

use std::{collections::HashMap, sync::Arc};

use futures::stream::{self, StreamExt};

use crate::{
    arbiter::{self, ArbiterInput},
    client::{ProviderCallOutcome, ProviderClient},
    config::MarketConfig,
    convergence,
    cost::CostCalculator,
    error::{MarketError, ProviderError},
    ids::RunId,
    model::{AnswerStatus, ArbiterSpec, ProviderAnswer, ProviderTag, Run, RunStatus},
    prelude::*,
    store::{RunRecord, Store},
};

/// Per-run overrides to the process-wide defaults (spec.md §6,
/// `Market.Run(chat_id, question, opts)`).
#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub max_rounds: Option<u32>,
    pub arbiter_spec: Option<ArbiterSpec>,
}

pub struct MarketCoordinator {
    config: MarketConfig,
    clients: HashMap<ProviderTag, ProviderClient>,
    cost: CostCalculator,
    store: Arc<dyn Store>,
}

impl MarketCoordinator {
    pub fn new(config: MarketConfig, store: Arc<dyn Store>) -> Self {
        let clients = config
            .providers
            .iter()
            .map(|p| {
                let client = ProviderClient::new(
                    p.clone(),
                    config.circuit_breaker,
                    config.market.max_retries,
                    config.market.debug_mode,
                );
                (p.tag, client)
            })
            .collect();
        Self {
            config,
            clients,
            cost: CostCalculator::with_default_rates(),
            store,
        }
    }

    /// Run the market for one question (spec.md §4.7).
    #[instrument(level = "info", skip(self, question), fields(chat_id))]
    pub async fn run(
        &self,
        chat_id: i64,
        question: &str,
        opts: RunOpts,
    ) -> Result<RunRecord, MarketError> {
        let thread = self.store.upsert_thread(chat_id).await.map_err(persistence_error)?;
        let run = Run::start(thread.id, question);
        let run_id = run.id;
        self.store.create_run(&run).await.map_err(persistence_error)?;

        let enabled = self.config.enabled_providers();
        if enabled.is_empty() {
            warn!("no enabled providers with credentials; failing run");
            return self.fail_run(run_id, 0).await;
        }

        let max_rounds = opts.max_rounds.unwrap_or(self.config.market.max_rounds);

        let mut total_latency_ms: u64 = 0;
        let mut total_cost_usd: f64 = 0.0;
        let mut prev_by_provider: HashMap<ProviderTag, ProviderAnswer> = HashMap::new();
        let mut round = 1u32;
        let mut converged = false;
        let mut successful: Vec<ProviderAnswer> = Vec::new();

        loop {
            let answers = self
                .run_round(run_id, round, question, &enabled, &prev_by_provider)
                .await;

            for answer in &answers {
                self.store.insert_answer(answer).await.map_err(persistence_error)?;
                total_latency_ms += answer.latency_ms;
                if let Some(cost) = answer.usage.cost_usd {
                    total_cost_usd += cost;
                }
            }

            successful = answers.iter().filter(|a| a.is_successful()).cloned().collect();
            if successful.is_empty() {
                warn!(round, "no successful answers this round; failing run");
                return self.fail_run(run_id, round).await;
            }

            prev_by_provider = successful.iter().map(|a| (a.provider, a.clone())).collect();
            converged = convergence::converged(
                &successful,
                self.config.market.convergence_confidence_threshold,
                self.config.market.convergence_claim_overlap,
            );

            if round >= max_rounds || converged {
                break;
            }
            round += 1;
        }

        let arbiter_answers: Vec<(ProviderTag, ProviderAnswer)> =
            successful.into_iter().map(|a| (a.provider, a)).collect();
        let arbiter_spec_override = opts.arbiter_spec.as_ref().or(thread.arbiter_override.as_ref());
        let arbiter_output = arbiter::synthesize(
            &self.clients,
            &self.config,
            &self.cost,
            ArbiterInput {
                run_id,
                question,
                rounds_completed: round,
                answers: &arbiter_answers,
                chat_override: arbiter_spec_override,
            },
        )
        .await;

        total_latency_ms += arbiter_output.latency_ms;
        if let Some(cost) = arbiter_output.cost_usd {
            total_cost_usd += cost;
        }
        self.store
            .insert_arbiter_output(&arbiter_output)
            .await
            .map_err(persistence_error)?;

        self.store
            .finalize_run(run_id, RunStatus::Completed, round, converged, total_latency_ms, total_cost_usd)
            .await
            .map_err(persistence_error)?;

        self.store
            .load_run(run_id)
            .await
            .map_err(persistence_error)?
            .ok_or_else(|| persistence_error(anyhow!("run {run_id} vanished after finalize_run")))
    }

    /// Fan out one round to every enabled provider, bounded by
    /// `max_concurrency` (spec.md §4.7 step 5, §5).
    async fn run_round(
        &self,
        run_id: RunId,
        round: u32,
        question: &str,
        enabled: &[&crate::config::ProviderConfig],
        prev_by_provider: &HashMap<ProviderTag, ProviderAnswer>,
    ) -> Vec<ProviderAnswer> {
        let disagreements = if round > 1 {
            let prev_answers: Vec<ProviderAnswer> = prev_by_provider.values().cloned().collect();
            convergence::disagreements(&prev_answers)
        } else {
            Vec::new()
        };

        let tasks = enabled.iter().map(|provider_config| {
            let provider = provider_config.tag;
            let model = provider_config.default_model.clone();
            let prompt = build_prompt(question, round, provider, prev_by_provider, &disagreements);
            let deadline = provider_config.timeout + crate::config::MarketOpts::TASK_DEADLINE_GRACE;
            async move {
                let client = &self.clients[&provider];
                match tokio::time::timeout(deadline, client.call(&prompt, Some(&model))).await {
                    Ok(outcome) => outcome_to_answer(run_id, round, provider, outcome, &self.cost),
                    Err(_) => timeout_answer(run_id, round, provider, &model),
                }
            }
        });

        stream::iter(tasks)
            .buffer_unordered(self.config.market.max_concurrency)
            .collect()
            .await
    }

    async fn fail_run(&self, run_id: RunId, rounds_completed: u32) -> Result<RunRecord, MarketError> {
        self.store
            .finalize_run(run_id, RunStatus::Failed, rounds_completed, false, 0, 0.0)
            .await
            .map_err(persistence_error)?;
        Err(MarketError::AllProvidersFailed)
    }
}

/// The [`crate::store::Store`] trait speaks `anyhow::Error`, since most
/// of its failures are genuinely unexpected (a broken connection pool,
/// a row that doesn't decode). At the coordinator boundary we fold that
/// down into the one typed variant spec.md §7 assigns to storage
/// failures; `MarketError::Persistence` itself is reserved for the
/// `sqlx::Error` surfaced directly by pool setup in `cmd::run`.
fn persistence_error(err: anyhow::Error) -> MarketError {
    MarketError::Config(format!("persistence failure: {err:#}"))
}

fn outcome_to_answer(
    run_id: RunId,
    round: u32,
    provider: ProviderTag,
    outcome: ProviderCallOutcome,
    cost: &CostCalculator,
) -> ProviderAnswer {
    let mut usage = outcome.usage;
    usage.cost_usd = cost.cost_usd(&outcome.model, usage.input_tokens, usage.output_tokens);
    ProviderAnswer {
        run_id,
        round,
        provider,
        model: outcome.model,
        status: outcome.status,
        answer: outcome.answer,
        confidence: outcome.confidence,
        key_claims: outcome.key_claims,
        assumptions: outcome.assumptions,
        citations: outcome.citations,
        usage,
        latency_ms: outcome.latency_ms,
        error: outcome.error,
        raw_response: outcome.raw_response,
    }
}

fn timeout_answer(run_id: RunId, round: u32, provider: ProviderTag, model: &str) -> ProviderAnswer {
    ProviderAnswer {
        run_id,
        round,
        provider,
        model: model.to_owned(),
        status: AnswerStatus::Timeout,
        answer: None,
        confidence: None,
        key_claims: None,
        assumptions: None,
        citations: None,
        usage: Default::default(),
        latency_ms: 0,
        error: Some(ProviderError::new(
            crate::error::ErrorKind::Timeout,
            "round task killed by coordinator deadline",
        )),
        raw_response: None,
    }
}

const CITATION_JSON_SHAPE: &str = "{\"answer\": str, \"confidence\": number in [0,1], \
     \"key_claims\": [str], \"assumptions\": [str], \
     \"citations\": [{\"title\": str|null, \"url\": str|null}]}";

/// Build the per-provider prompt for one round (spec.md §4.7 step 5).
fn build_prompt(
    question: &str,
    round: u32,
    provider: ProviderTag,
    prev_by_provider: &HashMap<ProviderTag, ProviderAnswer>,
    disagreements: &[convergence::Disagreement],
) -> String {
    if round == 1 {
        return round_one_prompt(question);
    }
    match prev_by_provider.get(&provider) {
        // A provider that failed the previous round starts fresh.
        None => round_one_prompt(question),
        Some(own_prev) => {
            let mut prompt = format!("Question: {question}\n\nYour previous answer:\n{}\n\n", own_prev.answer.as_deref().unwrap_or(""));
            prompt.push_str("Other providers' previous answers:\n");
            for (other, answer) in prev_by_provider {
                if *other == provider {
                    continue;
                }
                prompt.push_str(&format!(
                    "- {} (confidence {}): {}\n",
                    other,
                    answer.confidence.map(|c| c.to_string()).unwrap_or_else(|| "null".into()),
                    truncate_bytes(answer.answer.as_deref().unwrap_or(""), 1500),
                ));
                if let Some(claims) = &answer.key_claims {
                    for claim in claims {
                        prompt.push_str(&format!("    key claim: {claim}\n"));
                    }
                }
            }
            if !disagreements.is_empty() {
                prompt.push_str("\nDisagreements noted so far:\n");
                for d in disagreements {
                    prompt.push_str(&format!("- {}\n", d.topic));
                    for (p, claim) in &d.claims {
                        prompt.push_str(&format!("    {p}: {claim}\n"));
                    }
                }
            }
            prompt.push_str("\nRevise your answer if warranted. Respond as JSON: ");
            prompt.push_str(CITATION_JSON_SHAPE);
            prompt
        }
    }
}

fn round_one_prompt(question: &str) -> String {
    format!("Question: {question}\n\nRespond as JSON: {CITATION_JSON_SHAPE}")
}

/// Truncate `s` to at most `max_bytes` bytes without splitting a UTF-8
/// character (spec.md §4.7 step 5: "answer truncated to 1500 bytes").
fn truncate_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_bytes_respects_char_boundaries() {
        let s = "héllo world";
        let truncated = truncate_bytes(s, 2);
        assert!(s.as_bytes().len() >= truncated.as_bytes().len());
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }

    #[test]
    fn test_truncate_bytes_noop_when_short() {
        assert_eq!(truncate_bytes("short", 1500), "short");
    }

    #[test]
    fn test_round_one_prompt_for_failed_provider() {
        let prev = HashMap::new();
        let prompt = build_prompt("q", 2, ProviderTag::OpenAi, &prev, &[]);
        assert_eq!(prompt, round_one_prompt("q"));
    }
}
