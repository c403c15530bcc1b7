//! Core data model (spec.md §3).
//!
//! All timestamps are UTC. All ids are the opaque 128-bit identifiers in
//! [`crate::ids`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ProviderError,
    ids::{RunId, ThreadId},
};

/// The closed set of providers this market knows how to call.
///
/// Per spec.md §9, the provider enumeration is a closed tagged variant,
/// not a dynamically-extensible registry — adding a provider means
/// adding a variant and an adapter, not registering a string at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderTag {
    /// All known provider tags, in a stable order.
    pub const ALL: [ProviderTag; 3] =
        [ProviderTag::OpenAi, ProviderTag::Anthropic, ProviderTag::Gemini];

    /// The tag as a short lowercase string, used in logs and as a
    /// persistence key.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::OpenAi => "openai",
            ProviderTag::Anthropic => "anthropic",
            ProviderTag::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent association between an external chat and its arbiter
/// override. Mutated only by the chat collaborator (out of scope here);
/// the market engine only reads the override fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub chat_id: i64,
    /// Chat-scoped override of the default arbiter, if the operator set
    /// one for this conversation.
    pub arbiter_override: Option<ArbiterSpec>,
    pub created_at: DateTime<Utc>,
}

/// Which provider + model to use as the arbiter ("Dredd").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterSpec {
    pub provider: ProviderTag,
    pub model: String,
}

impl ArbiterSpec {
    pub fn new(provider: ProviderTag, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

/// The lifecycle status of a [`Run`]. Transitions from `InProgress` to a
/// terminal status exactly once (spec.md invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One execution of the market for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub thread_id: ThreadId,
    pub question: String,
    pub status: RunStatus,
    pub rounds_completed: u32,
    pub convergence_achieved: bool,
    pub total_latency_ms: u64,
    pub total_cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    /// Start a new, in-progress run for `question`.
    pub fn start(thread_id: ThreadId, question: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            thread_id,
            question: question.into(),
            status: RunStatus::InProgress,
            rounds_completed: 0,
            convergence_achieved: false,
            total_latency_ms: 0,
            total_cost_usd: 0.0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// The outcome of one provider call, as classified by spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Ok,
    Error,
    Timeout,
    ParseError,
}

/// Token and cost accounting for one provider call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: Option<f64>,
}

/// A citation a provider attached to a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub title: Option<String>,
    pub url: Option<String>,
}

/// One normalized response from one provider in one round
/// (spec.md §3, `ProviderAnswer`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderAnswer {
    pub run_id: RunId,
    pub round: u32,
    pub provider: ProviderTag,
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
    /// Only populated when `debug_mode` is enabled (spec.md §3).
    pub raw_response: Option<String>,
}

impl ProviderAnswer {
    /// Is this one of the statuses the coordinator treats as
    /// "successful" for convergence/persistence purposes (spec.md §4.7
    /// step 5)?
    pub fn is_successful(&self) -> bool {
        matches!(self.status, AnswerStatus::Ok | AnswerStatus::ParseError)
    }
}

/// One side of a disagreement, as surfaced to the next round's prompt and
/// to the arbiter's conflict table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictClaim {
    pub provider: ProviderTag,
    pub claim: String,
}

/// The resolution status of one arbiter conflict entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Resolved,
    Unresolved,
}

/// One disputed topic in the arbiter's synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub topic: String,
    pub claims: Vec<ConflictClaim>,
    pub resolution: String,
    pub status: ConflictStatus,
    pub confidence: f64,
}

/// One row of the arbiter's fact table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactTableEntry {
    pub claim: String,
    pub support: Vec<ProviderTag>,
    pub confidence: f64,
}

/// One synthesis per run, unique by run id (spec.md invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterOutput {
    pub run_id: RunId,
    pub arbiter: ArbiterSpec,
    pub final_answer: Option<String>,
    pub agreements: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub fact_table: Vec<FactTableEntry>,
    pub next_questions: Vec<String>,
    pub overall_confidence: Option<f64>,
    pub arbiter_failed: bool,
    pub latency_ms: u64,
    pub cost_usd: Option<f64>,
}
