use std::str::FromStr;

use clap::Parser;
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use dredd_market::prelude::*;

mod cmd;

/// Ask a market of LLM providers one question and synthesize a single
/// answer.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - OPENAI_API_KEY / OPENAI_API_BASE
  - ANTHROPIC_API_KEY / ANTHROPIC_API_BASE
  - GEMINI_API_KEY (or GOOGLE_API_KEY) / GEMINI_API_BASE
  - DATABASE_URL (optional; omit for an in-process, non-durable store)

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(flatten)]
    run: cmd::run::RunOptsCli,
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing.
    let directive = Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    real_main().await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main() -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    cmd::run::cmd_run(&opts.run).await
}
