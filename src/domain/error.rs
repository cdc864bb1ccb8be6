//! Domain error types.
//!
//! Fatal kinds abort a run before or during candidate processing. Recoverable
//! kinds are isolated to a single candidate by the orchestrator.

use chrono::NaiveDate;

/// Failure of one LLM confirmation call.
///
/// Every variant that can occur after a request reached the provider carries
/// the cost incurred before the failure, so the screen can bill it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmCallError {
    #[error("llm call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("llm transport error: {reason}")]
    Transport { reason: String },

    #[error("llm api error (status {status}): {reason}")]
    Api { status: u16, reason: String },

    #[error("invalid llm response: {reason}")]
    InvalidResponse { reason: String, cost: f64 },

    #[error("llm task aborted: {reason}")]
    Task { reason: String },
}

impl LlmCallError {
    /// Cost already incurred when the call failed.
    pub fn cost(&self) -> f64 {
        match self {
            LlmCallError::InvalidResponse { cost, .. } => *cost,
            LlmCallError::Timeout { .. }
            | LlmCallError::Transport { .. }
            | LlmCallError::Api { .. }
            | LlmCallError::Task { .. } => 0.0,
        }
    }
}

/// Top-level error type for intrascreen.
#[derive(Debug, thiserror::Error)]
pub enum ScreenerError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("unknown {role} pattern '{name}' (expected one of: {expected})")]
    UnknownPattern {
        role: String,
        name: String,
        expected: String,
    },

    #[error(
        "query failed for {ticker} {start}..{end} (entry {entry_pattern}, exit {exit_pattern}): {reason}"
    )]
    QueryExecution {
        ticker: String,
        start: NaiveDate,
        end: NaiveDate,
        entry_pattern: String,
        exit_pattern: String,
        reason: String,
    },

    #[error("chart generation failed for {ticker} on {date}: {reason}")]
    ChartGeneration {
        ticker: String,
        date: NaiveDate,
        reason: String,
    },

    #[error(transparent)]
    LlmCall(#[from] LlmCallError),

    #[error("failed to write {path}: {reason}")]
    OutputWrite { path: String, reason: String },

    #[error("invalid candidate row: {reason}")]
    RowMapping { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ScreenerError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ScreenerError::ChartGeneration { .. }
                | ScreenerError::LlmCall(_)
                | ScreenerError::OutputWrite { .. }
                | ScreenerError::RowMapping { .. }
        )
    }
}

impl From<&ScreenerError> for std::process::ExitCode {
    fn from(err: &ScreenerError) -> Self {
        let code: u8 = match err {
            ScreenerError::Io(_) | ScreenerError::OutputWrite { .. } => 1,
            ScreenerError::ConfigParse { .. }
            | ScreenerError::ConfigMissing { .. }
            | ScreenerError::ConfigInvalid { .. }
            | ScreenerError::UnknownPattern { .. } => 2,
            ScreenerError::Database { .. } | ScreenerError::QueryExecution { .. } => 3,
            ScreenerError::ChartGeneration { .. }
            | ScreenerError::LlmCall(_)
            | ScreenerError::RowMapping { .. } => 4,
            ScreenerError::Cancelled => 130,
        };
        std::process::ExitCode::from(code)
    }
}
