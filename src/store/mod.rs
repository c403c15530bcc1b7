//! Component I: the persistence contract (spec.md §3, §6).
//!
//! One trait the coordinator writes through; two implementations, the
//! way the teacher keeps `drivers::Driver` as a trait with a real
//! driver per remote plus `drivers::echo::EchoDriver` as an in-process
//! stand-in for tests.

pub mod memory;
pub mod postgres;

use crate::{
    ids::RunId,
    model::{ArbiterOutput, ProviderAnswer, Run, Thread},
    prelude::*,
};

/// Everything the coordinator needs from durable storage.
///
/// Every method maps to one independent transaction (spec.md §5): the
/// store is not expected to offer cross-call atomicity beyond what each
/// individual write needs.
#[async_trait]
pub trait Store: Send + Sync {
    /// Find or create the Thread for `chat_id`.
    async fn upsert_thread(&self, chat_id: i64) -> Result<Thread>;

    /// Persist a newly created, in-progress Run.
    async fn create_run(&self, run: &Run) -> Result<()>;

    /// Persist one provider answer (success or failure) for a round.
    async fn insert_answer(&self, answer: &ProviderAnswer) -> Result<()>;

    /// Persist the run's arbiter synthesis (spec.md invariant 1: at most
    /// one per run).
    async fn insert_arbiter_output(&self, output: &ArbiterOutput) -> Result<()>;

    /// Update a run's terminal fields. Called exactly once per run
    /// (spec.md invariant 3).
    async fn finalize_run(
        &self,
        run_id: RunId,
        status: crate::model::RunStatus,
        rounds_completed: u32,
        convergence_achieved: bool,
        total_latency_ms: u64,
        total_cost_usd: f64,
    ) -> Result<()>;

    /// Load a run plus everything persisted under it, for the caller
    /// that started it (spec.md §4.7 step 10).
    async fn load_run(&self, run_id: RunId) -> Result<Option<RunRecord>>;
}

/// A run together with its persisted answers and arbiter output.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run: Run,
    pub answers: Vec<ProviderAnswer>,
    pub arbiter_output: Option<ArbiterOutput>,
}
