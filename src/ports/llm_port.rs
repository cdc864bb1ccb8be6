//! LLM confirmation client port.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

use crate::domain::error::LlmCallError;
use crate::domain::screen::ScreenConfig;
use crate::domain::signal::{Direction, Signal};

/// Everything a single confirmation call receives. Every call dispatched for
/// one candidate gets the same request.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    pub ticker: String,
    pub pattern: String,
    pub signal: Signal,
    pub chart_path: Option<PathBuf>,
    pub screen_config: ScreenConfig,
    pub raw_config: serde_json::Value,
    pub context: Option<String>,
    pub debug: bool,
    pub market_metrics_text: Option<String>,
}

/// One call's answer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LlmVote {
    pub proceed: bool,
    pub direction: Option<Direction>,
    pub cost: f64,
    pub rationale: Option<String>,
    pub proposed_stop_loss: Option<f64>,
    pub proposed_profit_target: Option<f64>,
    pub raw_response: Option<String>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn confirm(&self, request: &LlmRequest) -> Result<LlmVote, LlmCallError>;
}
