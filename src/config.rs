//! Process-wide configuration (spec.md §6, §9 "shared global
//! configuration").
//!
//! Built once at startup and passed down by reference, the way the
//! teacher builds `LlmOpts`/`StreamOpts` from `clap::Args` and never
//! re-reads them mid-run. The one legitimate exception, per spec.md §9,
//! is the set of *enabled* providers, which is read fresh each time a
//! market starts (an operator may have disabled a provider between
//! runs).

use std::time::Duration;

use clap::Args;

use crate::{
    model::{ArbiterSpec, ProviderTag},
    rate_limit::RateLimit,
};

/// Command-line / environment configuration for one provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub tag: ProviderTag,
    pub enabled: bool,
    pub models: Vec<String>,
    pub default_model: String,
    pub base_url: String,
    pub rate_limit: RateLimit,
    pub timeout: Duration,
    /// The API credential, read from the environment. `None` means the
    /// provider can't be started (spec.md §7, `provider_not_started`).
    pub credential: Option<String>,
}

impl ProviderConfig {
    fn env_credential(var: &str) -> Option<String> {
        std::env::var(var).ok().filter(|s| !s.is_empty())
    }

    /// Build the default configuration for `tag` from environment
    /// variables, following the teacher's `OPENAI_API_KEY`/
    /// `OPENAI_API_BASE` convention.
    pub fn from_env(tag: ProviderTag) -> Self {
        match tag {
            ProviderTag::OpenAi => Self {
                tag,
                enabled: true,
                models: vec!["gpt-4o".into(), "gpt-4o-mini".into()],
                default_model: "gpt-4o".into(),
                base_url: std::env::var("OPENAI_API_BASE")
                    .unwrap_or_else(|_| "https://api.openai.com".into()),
                rate_limit: RateLimit::new(10, crate::rate_limit::RateLimitPeriod::Second),
                timeout: Duration::from_millis(25_000),
                credential: Self::env_credential("OPENAI_API_KEY"),
            },
            ProviderTag::Anthropic => Self {
                tag,
                enabled: true,
                models: vec!["claude-3-5-sonnet-20241022".into()],
                default_model: "claude-3-5-sonnet-20241022".into(),
                base_url: std::env::var("ANTHROPIC_API_BASE")
                    .unwrap_or_else(|_| "https://api.anthropic.com".into()),
                rate_limit: RateLimit::new(5, crate::rate_limit::RateLimitPeriod::Second),
                timeout: Duration::from_millis(25_000),
                credential: Self::env_credential("ANTHROPIC_API_KEY"),
            },
            ProviderTag::Gemini => Self {
                tag,
                enabled: true,
                models: vec!["gemini-1.5-pro".into()],
                default_model: "gemini-1.5-pro".into(),
                base_url: std::env::var("GEMINI_API_BASE")
                    .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".into()),
                rate_limit: RateLimit::new(10, crate::rate_limit::RateLimitPeriod::Second),
                timeout: Duration::from_millis(30_000),
                credential: Self::env_credential("GEMINI_API_KEY")
                    .or_else(|| Self::env_credential("GOOGLE_API_KEY")),
            },
        }
    }

    /// Is this provider usable right now (spec.md §4.7 step 3)?
    pub fn is_usable(&self) -> bool {
        self.enabled && self.credential.is_some()
    }

    /// Sanity-check that `default_model` is one of the provider's own
    /// advertised `models` (spec.md §3, `ProviderConfig`). A mismatch
    /// means an operator edited one list without the other; we warn
    /// rather than fail outright, since the default is still usable as
    /// a model string even if it's missing from the advertised set.
    fn warn_if_default_model_unlisted(&self) {
        if !self.models.iter().any(|m| m == &self.default_model) {
            tracing::warn!(
                provider = %self.tag,
                default_model = %self.default_model,
                models = ?self.models,
                "default_model is not in the provider's advertised models list",
            );
        }
    }
}

/// Circuit breaker defaults (spec.md §6).
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(30_000),
        }
    }
}

/// Command-line options governing one market run (spec.md §6).
#[derive(Debug, Clone, Args)]
pub struct MarketOpts {
    /// Upper bound on the number of rounds (spec.md §9: effective
    /// default is 2, not 5).
    #[clap(long, default_value = "2")]
    pub max_rounds: u32,

    /// Per-provider-call deadline, in milliseconds.
    #[clap(long, default_value = "25000")]
    pub provider_timeout_ms: u64,

    /// Retry budget per call (not counting the first attempt).
    #[clap(long, default_value = "2")]
    pub max_retries: u32,

    /// Parallel fan-out cap per round.
    #[clap(long, default_value = "4")]
    pub max_concurrency: usize,

    /// Stop-condition threshold on confidence spread.
    #[clap(long, default_value = "0.1")]
    pub convergence_confidence_threshold: f64,

    /// Stop-condition threshold on claim-set Jaccard overlap.
    #[clap(long, default_value = "0.7")]
    pub convergence_claim_overlap: f64,

    /// Persist raw provider responses alongside the normalized answer.
    #[clap(long)]
    pub debug_mode: bool,
}

impl Default for MarketOpts {
    fn default() -> Self {
        Self {
            max_rounds: 2,
            provider_timeout_ms: 25_000,
            max_retries: 2,
            max_concurrency: 4,
            convergence_confidence_threshold: 0.1,
            convergence_claim_overlap: 0.7,
            debug_mode: false,
        }
    }
}

impl MarketOpts {
    /// Grace period added to a provider's own timeout to get the
    /// per-round-task kill deadline (spec.md §4.7 step 5, §5).
    pub const TASK_DEADLINE_GRACE: Duration = Duration::from_secs(5);
}

/// The fully assembled, immutable configuration for one process
/// (spec.md §3, `ProviderConfig`).
#[derive(Debug, Clone)]
pub struct MarketConfig {
    pub market: MarketOpts,
    pub providers: Vec<ProviderConfig>,
    pub circuit_breaker: CircuitBreakerConfig,
    pub arbiter_default: ArbiterSpec,
    pub arbiter_fallback: ArbiterSpec,
}

impl MarketConfig {
    /// Build configuration from the environment and CLI opts, the way
    /// the teacher's `main.rs` calls `dotenvy::dotenv()` then
    /// `Opts::parse()` before doing anything else.
    pub fn from_env(market: MarketOpts) -> Self {
        let providers: Vec<ProviderConfig> = ProviderTag::ALL
            .into_iter()
            .map(ProviderConfig::from_env)
            .map(|mut provider| {
                // `--provider-timeout-ms` (spec.md §6) is the one
                // knob this crate exposes for the per-call deadline;
                // it overrides each provider's own default rather
                // than sitting next to it unread.
                provider.timeout = Duration::from_millis(market.provider_timeout_ms);
                provider.warn_if_default_model_unlisted();
                provider
            })
            .collect();
        Self {
            market,
            providers,
            circuit_breaker: CircuitBreakerConfig::default(),
            arbiter_default: ArbiterSpec::new(ProviderTag::OpenAi, "gpt-4o"),
            arbiter_fallback: ArbiterSpec::new(ProviderTag::OpenAi, "gpt-4o"),
        }
    }

    /// Providers that are both enabled and credentialed right now
    /// (spec.md §4.7 step 3 — read fresh at market start, per spec.md
    /// §9).
    pub fn enabled_providers(&self) -> Vec<&ProviderConfig> {
        self.providers.iter().filter(|p| p.is_usable()).collect()
    }

    pub fn provider(&self, tag: ProviderTag) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.tag == tag)
    }
}
