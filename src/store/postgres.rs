//! A Postgres-backed `Store`, grounded on the governance-dashboard
//! services' plain `sqlx::query`/`query_as` style (no compile-time
//! `query!` macro, since the schema lives only in this crate's own
//! migrations rather than a `DATABASE_URL`-visible dev database).

use sqlx::{PgPool, Row};

use crate::{
    ids::{RunId, ThreadId},
    model::{ArbiterOutput, ProviderAnswer, Run, RunStatus, Thread},
    prelude::*,
};

use super::{RunRecord, Store};

/// Schema-per-crate Postgres store. Migrations are expected to create
/// the four tables named in spec.md §6 (`threads`, `runs`,
/// `provider_answers`, `dredd_outputs`).
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_thread(&self, chat_id: i64) -> Result<Thread> {
        if let Some(row) = sqlx::query("SELECT id, chat_id, arbiter_override, created_at FROM threads WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
            .context("selecting thread by chat_id")?
        {
            return Ok(row_to_thread(&row)?);
        }

        let thread = Thread {
            id: ThreadId::new(),
            chat_id,
            arbiter_override: None,
            created_at: chrono::Utc::now(),
        };
        sqlx::query(
            "INSERT INTO threads (id, chat_id, arbiter_override, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(thread.id.0)
        .bind(thread.chat_id)
        .bind(serde_json::to_value(&thread.arbiter_override)?)
        .bind(thread.created_at)
        .execute(&self.pool)
        .await
        .context("inserting new thread")?;
        Ok(thread)
    }

    async fn create_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, thread_id, question, status, rounds_completed, \
             convergence_achieved, total_latency_ms, total_cost_usd, created_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(run.id.0)
        .bind(run.thread_id.0)
        .bind(&run.question)
        .bind(serde_json::to_string(&run.status)?)
        .bind(run.rounds_completed as i32)
        .bind(run.convergence_achieved)
        .bind(run.total_latency_ms as i64)
        .bind(run.total_cost_usd)
        .bind(run.created_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .context("inserting new run")?;
        Ok(())
    }

    async fn insert_answer(&self, answer: &ProviderAnswer) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_answers (run_id, round, provider, model, status, answer, \
             confidence, key_claims, assumptions, citations, usage, latency_ms, error, raw_response) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(answer.run_id.0)
        .bind(answer.round as i32)
        .bind(answer.provider.as_str())
        .bind(&answer.model)
        .bind(serde_json::to_string(&answer.status)?)
        .bind(&answer.answer)
        .bind(answer.confidence)
        .bind(serde_json::to_value(&answer.key_claims)?)
        .bind(serde_json::to_value(&answer.assumptions)?)
        .bind(serde_json::to_value(&answer.citations)?)
        .bind(serde_json::to_value(&answer.usage)?)
        .bind(answer.latency_ms as i64)
        .bind(serde_json::to_value(&answer.error)?)
        .bind(&answer.raw_response)
        .execute(&self.pool)
        .await
        .context("inserting provider answer")?;
        Ok(())
    }

    async fn insert_arbiter_output(&self, output: &ArbiterOutput) -> Result<()> {
        sqlx::query(
            "INSERT INTO dredd_outputs (run_id, provider, model, final_answer, agreements, \
             conflicts, fact_table, next_questions, overall_confidence, arbiter_failed, \
             latency_ms, cost_usd) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(output.run_id.0)
        .bind(output.arbiter.provider.as_str())
        .bind(&output.arbiter.model)
        .bind(&output.final_answer)
        .bind(serde_json::to_value(&output.agreements)?)
        .bind(serde_json::to_value(&output.conflicts)?)
        .bind(serde_json::to_value(&output.fact_table)?)
        .bind(serde_json::to_value(&output.next_questions)?)
        .bind(output.overall_confidence)
        .bind(output.arbiter_failed)
        .bind(output.latency_ms as i64)
        .bind(output.cost_usd)
        .execute(&self.pool)
        .await
        .context("inserting arbiter output")?;
        Ok(())
    }

    async fn finalize_run(
        &self,
        run_id: RunId,
        status: RunStatus,
        rounds_completed: u32,
        convergence_achieved: bool,
        total_latency_ms: u64,
        total_cost_usd: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = $1, rounds_completed = $2, convergence_achieved = $3, \
             total_latency_ms = $4, total_cost_usd = $5, completed_at = now() WHERE id = $6",
        )
        .bind(serde_json::to_string(&status)?)
        .bind(rounds_completed as i32)
        .bind(convergence_achieved)
        .bind(total_latency_ms as i64)
        .bind(total_cost_usd)
        .bind(run_id.0)
        .execute(&self.pool)
        .await
        .context("finalizing run")?;
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let Some(run_row) = sqlx::query(
            "SELECT id, thread_id, question, status, rounds_completed, convergence_achieved, \
             total_latency_ms, total_cost_usd, created_at, completed_at FROM runs WHERE id = $1",
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("loading run")?
        else {
            return Ok(None);
        };

        let answer_rows = sqlx::query(
            "SELECT run_id, round, provider, model, status, answer, confidence, key_claims, \
             assumptions, citations, usage, latency_ms, error, raw_response \
             FROM provider_answers WHERE run_id = $1 ORDER BY round",
        )
        .bind(run_id.0)
        .fetch_all(&self.pool)
        .await
        .context("loading provider answers")?;
        let answers = answer_rows
            .iter()
            .map(row_to_answer)
            .collect::<Result<Vec<_>>>()?;

        let arbiter_output = sqlx::query(
            "SELECT run_id, provider, model, final_answer, agreements, conflicts, fact_table, \
             next_questions, overall_confidence, arbiter_failed, latency_ms, cost_usd \
             FROM dredd_outputs WHERE run_id = $1",
        )
        .bind(run_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("loading arbiter output")?
        .map(|row| row_to_arbiter_output(&row))
        .transpose()?;

        Ok(Some(RunRecord {
            run: row_to_run(&run_row)?,
            answers,
            arbiter_output,
        }))
    }
}

fn row_to_thread(row: &sqlx::postgres::PgRow) -> Result<Thread> {
    Ok(Thread {
        id: ThreadId(row.try_get("id")?),
        chat_id: row.try_get("chat_id")?,
        arbiter_override: serde_json::from_value(row.try_get("arbiter_override")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> Result<Run> {
    let status: String = row.try_get("status")?;
    Ok(Run {
        id: RunId(row.try_get("id")?),
        thread_id: ThreadId(row.try_get("thread_id")?),
        question: row.try_get("question")?,
        status: serde_json::from_str(&status)?,
        rounds_completed: row.try_get::<i32, _>("rounds_completed")? as u32,
        convergence_achieved: row.try_get("convergence_achieved")?,
        total_latency_ms: row.try_get::<i64, _>("total_latency_ms")? as u64,
        total_cost_usd: row.try_get("total_cost_usd")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_answer(row: &sqlx::postgres::PgRow) -> Result<ProviderAnswer> {
    let status: String = row.try_get("status")?;
    let provider: String = row.try_get("provider")?;
    Ok(ProviderAnswer {
        run_id: RunId(row.try_get("run_id")?),
        round: row.try_get::<i32, _>("round")? as u32,
        provider: parse_provider(&provider)?,
        model: row.try_get("model")?,
        status: serde_json::from_str(&status)?,
        answer: row.try_get("answer")?,
        confidence: row.try_get("confidence")?,
        key_claims: serde_json::from_value(row.try_get("key_claims")?)?,
        assumptions: serde_json::from_value(row.try_get("assumptions")?)?,
        citations: serde_json::from_value(row.try_get("citations")?)?,
        usage: serde_json::from_value(row.try_get("usage")?)?,
        latency_ms: row.try_get::<i64, _>("latency_ms")? as u64,
        error: serde_json::from_value(row.try_get("error")?)?,
        raw_response: row.try_get("raw_response")?,
    })
}

fn row_to_arbiter_output(row: &sqlx::postgres::PgRow) -> Result<ArbiterOutput> {
    let provider: String = row.try_get("provider")?;
    Ok(ArbiterOutput {
        run_id: RunId(row.try_get("run_id")?),
        arbiter: crate::model::ArbiterSpec::new(parse_provider(&provider)?, row.try_get::<String, _>("model")?),
        final_answer: row.try_get("final_answer")?,
        agreements: serde_json::from_value(row.try_get("agreements")?)?,
        conflicts: serde_json::from_value(row.try_get("conflicts")?)?,
        fact_table: serde_json::from_value(row.try_get("fact_table")?)?,
        next_questions: serde_json::from_value(row.try_get("next_questions")?)?,
        overall_confidence: row.try_get("overall_confidence")?,
        arbiter_failed: row.try_get("arbiter_failed")?,
        latency_ms: row.try_get::<i64, _>("latency_ms")? as u64,
        cost_usd: row.try_get("cost_usd")?,
    })
}

fn parse_provider(s: &str) -> Result<crate::model::ProviderTag> {
    crate::model::ProviderTag::ALL
        .into_iter()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| anyhow!("unknown provider tag in database row: {s}"))
}
