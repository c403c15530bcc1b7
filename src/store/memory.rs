//! An in-memory `Store`, grounded on the teacher's
//! `drivers::echo::EchoDriver` test-double pattern: a trivial
//! implementation of the real trait, usable both in unit tests and as
//! a zero-dependency way to exercise the coordinator without Postgres.

use std::{collections::HashMap, sync::Mutex};

use chrono::Utc;

use crate::{
    ids::{RunId, ThreadId},
    model::{ArbiterOutput, ProviderAnswer, Run, RunStatus, Thread},
    prelude::*,
};

use super::{RunRecord, Store};

#[derive(Default)]
struct State {
    threads_by_chat: HashMap<i64, ThreadId>,
    threads: HashMap<ThreadId, Thread>,
    runs: HashMap<RunId, Run>,
    answers: HashMap<RunId, Vec<ProviderAnswer>>,
    arbiter_outputs: HashMap<RunId, ArbiterOutput>,
}

/// A `Store` backed by in-process maps, guarded by a single mutex.
///
/// Good enough for tests and for a single-process deployment without a
/// database; it does not survive a restart and offers no cross-process
/// consistency.
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_thread(&self, chat_id: i64) -> Result<Thread> {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.threads_by_chat.get(&chat_id) {
            return Ok(state.threads[id].clone());
        }
        let thread = Thread {
            id: ThreadId::new(),
            chat_id,
            arbiter_override: None,
            created_at: Utc::now(),
        };
        state.threads_by_chat.insert(chat_id, thread.id);
        state.threads.insert(thread.id, thread.clone());
        Ok(thread)
    }

    async fn create_run(&self, run: &Run) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.runs.insert(run.id, run.clone());
        state.answers.entry(run.id).or_default();
        Ok(())
    }

    async fn insert_answer(&self, answer: &ProviderAnswer) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.answers.entry(answer.run_id).or_default().push(answer.clone());
        Ok(())
    }

    async fn insert_arbiter_output(&self, output: &ArbiterOutput) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.arbiter_outputs.insert(output.run_id, output.clone());
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
        let mut state = self.state.lock().unwrap();
        let run = state
            .runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow!("finalize_run: no such run {run_id}"))?;
        run.status = status;
        run.rounds_completed = rounds_completed;
        run.convergence_achieved = convergence_achieved;
        run.total_latency_ms = total_latency_ms;
        run.total_cost_usd = total_cost_usd;
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>> {
        let state = self.state.lock().unwrap();
        let Some(run) = state.runs.get(&run_id) else {
            return Ok(None);
        };
        Ok(Some(RunRecord {
            run: run.clone(),
            answers: state.answers.get(&run_id).cloned().unwrap_or_default(),
            arbiter_output: state.arbiter_outputs.get(&run_id).cloned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerStatus, ProviderTag, Usage};

    #[tokio::test]
    async fn test_upsert_thread_is_idempotent() {
        let store = MemoryStore::new();
        let a = store.upsert_thread(42).await.unwrap();
        let b = store.upsert_thread(42).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_round_trip_run_and_answers() {
        let store = MemoryStore::new();
        let thread = store.upsert_thread(1).await.unwrap();
        let run = Run::start(thread.id, "what is the answer?");
        store.create_run(&run).await.unwrap();

        let answer = ProviderAnswer {
            run_id: run.id,
            round: 1,
            provider: ProviderTag::OpenAi,
            model: "gpt-4o".into(),
            status: AnswerStatus::Ok,
            answer: Some("42".into()),
            confidence: Some(0.9),
            key_claims: None,
            assumptions: None,
            citations: None,
            usage: Usage::default(),
            latency_ms: 10,
            error: None,
            raw_response: None,
        };
        store.insert_answer(&answer).await.unwrap();
        store
            .finalize_run(run.id, RunStatus::Completed, 1, true, 10, 0.001)
            .await
            .unwrap();

        let record = store.load_run(run.id).await.unwrap().unwrap();
        assert_eq!(record.answers.len(), 1);
        assert_eq!(record.run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_load_run_missing_is_none() {
        let store = MemoryStore::new();
        assert!(store.load_run(RunId::new()).await.unwrap().is_none());
    }
}
