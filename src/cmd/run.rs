//! The `run` subcommand: ask the market one question end-to-end and
//! print the resulting [`dredd_market::store::RunRecord`] as JSON.

use std::sync::Arc;

use clap::Args;
use dredd_market::{
    config::{MarketConfig, MarketOpts},
    coordinator::{MarketCoordinator, RunOpts},
    prelude::*,
    store::{Store, memory::MemoryStore, postgres::PostgresStore},
};
use sqlx::postgres::PgPoolOptions;

/// `run` command line arguments.
#[derive(Debug, Args)]
pub struct RunOptsCli {
    /// The question to put to every enabled provider.
    pub question: String,

    /// A synthetic chat id to group this run under. Defaults to a fresh
    /// one-off thread.
    #[clap(long, default_value = "0")]
    pub chat_id: i64,

    /// Postgres connection string to persist through (`migrations/` has
    /// the schema). Falls back to an in-process, non-durable store when
    /// unset.
    #[clap(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Market-wide options (round budget, concurrency, convergence
    /// thresholds, retry/timeout defaults).
    #[clap(flatten)]
    pub market_opts: MarketOpts,
}

/// Run the `run` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_run(opts: &RunOptsCli) -> Result<()> {
    let config = MarketConfig::from_env(opts.market_opts.clone());
    let store: Arc<dyn Store> = match &opts.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await
                .map_err(dredd_market::error::MarketError::Persistence)?;
            Arc::new(PostgresStore::new(pool))
        }
        None => Arc::new(MemoryStore::new()),
    };
    let coordinator = MarketCoordinator::new(config, store);

    let record = coordinator
        .run(opts.chat_id, &opts.question, RunOpts::default())
        .await?;

    println!("{}", serde_json::to_string_pretty(&RunRecordJson::from(&record))?);
    Ok(())
}

/// A serde-friendly projection of [`dredd_market::store::RunRecord`] for
/// the CLI's own JSON output (the store types already derive
/// `Serialize`, this just groups them the way an operator wants to read
/// them).
#[derive(Debug, Serialize)]
struct RunRecordJson<'a> {
    run: &'a dredd_market::model::Run,
    answers: &'a [dredd_market::model::ProviderAnswer],
    arbiter_output: &'a Option<dredd_market::model::ArbiterOutput>,
}

impl<'a> From<&'a dredd_market::store::RunRecord> for RunRecordJson<'a> {
    fn from(record: &'a dredd_market::store::RunRecord) -> Self {
        Self {
            run: &record.run,
            answers: &record.answers,
            arbiter_output: &record.arbiter_output,
        }
    }
}
