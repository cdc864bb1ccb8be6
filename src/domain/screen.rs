//! LLM confirmation screen with multi-call consensus.
//!
//! A disabled or absent screen passes every candidate through at zero cost.
//! An enabled screen fans out `num_calls` independent calls, joins them all
//! (each under its own timeout), then reduces the settled outcomes with
//! [`reach_consensus`].

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{LlmCallError, ScreenerError};
use super::signal::Direction;
use crate::ports::llm_port::{LlmClient, LlmRequest, LlmVote};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenConfig {
    pub enabled: bool,
    pub num_calls: usize,
    pub agreement_threshold: usize,
    pub call_timeout: Duration,
    /// Bill the partial cost reported by calls that failed.
    pub bill_failed_calls: bool,
    /// Send the market-metrics prompt text with each call.
    pub include_market_context: bool,
    pub debug: bool,
    pub context: Option<String>,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        ScreenConfig {
            enabled: false,
            num_calls: 1,
            agreement_threshold: 1,
            call_timeout: Duration::from_secs(60),
            bill_failed_calls: true,
            include_market_context: true,
            debug: false,
            context: None,
        }
    }
}

pub type CallOutcome = Result<LlmVote, LlmCallError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallDebug {
    pub index: usize,
    pub outcome: String,
    pub cost: f64,
    pub raw_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreeningDecision {
    pub proceed: bool,
    pub direction: Option<Direction>,
    pub cost: f64,
    pub chart_path: Option<PathBuf>,
    pub averaged_stop_loss: Option<f64>,
    pub averaged_profit_target: Option<f64>,
    pub rationale: Option<String>,
    pub debug: Option<Vec<CallDebug>>,
}

impl ScreeningDecision {
    pub fn pass_through(chart_path: Option<PathBuf>) -> Self {
        ScreeningDecision {
            proceed: true,
            direction: None,
            cost: 0.0,
            chart_path,
            averaged_stop_loss: None,
            averaged_profit_target: None,
            rationale: None,
            debug: None,
        }
    }
}

fn billable(cost: f64) -> f64 {
    if cost.is_finite() && cost > 0.0 { cost } else { 0.0 }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Reduce settled call outcomes to a decision.
///
/// A usable vote says `proceed` and resolves to a direction: the call's own,
/// else `nominal`. The direction with the most usable votes wins if its count
/// reaches the threshold; two directions tied at or above the threshold is a
/// split vote and rejects.
pub fn reach_consensus(
    outcomes: &[CallOutcome],
    nominal: Option<Direction>,
    config: &ScreenConfig,
) -> ScreeningDecision {
    let threshold = config.agreement_threshold.max(1);

    let cost: f64 = outcomes
        .iter()
        .map(|o| match o {
            Ok(vote) => billable(vote.cost),
            Err(err) if config.bill_failed_calls => billable(err.cost()),
            Err(_) => 0.0,
        })
        .sum();

    let vote_direction = |vote: &LlmVote| -> Option<Direction> {
        if vote.proceed {
            vote.direction.or(nominal)
        } else {
            None
        }
    };

    let count_for = |direction: Direction| {
        outcomes
            .iter()
            .filter(|o| matches!(o, Ok(v) if vote_direction(v) == Some(direction)))
            .count()
    };
    let long_votes = count_for(Direction::Long);
    let short_votes = count_for(Direction::Short);

    let winner = match (long_votes >= threshold, short_votes >= threshold) {
        (true, false) => Some(Direction::Long),
        (false, true) => Some(Direction::Short),
        (true, true) if long_votes > short_votes => Some(Direction::Long),
        (true, true) if short_votes > long_votes => Some(Direction::Short),
        _ => None,
    };

    let debug = config.debug.then(|| {
        outcomes
            .iter()
            .enumerate()
            .map(|(index, o)| match o {
                Ok(vote) => CallDebug {
                    index,
                    outcome: match vote_direction(vote) {
                        Some(d) => format!("vote {d}"),
                        None => "reject".to_string(),
                    },
                    cost: billable(vote.cost),
                    raw_response: vote.raw_response.clone(),
                },
                Err(err) => CallDebug {
                    index,
                    outcome: format!("error: {err}"),
                    cost: billable(err.cost()),
                    raw_response: None,
                },
            })
            .collect()
    });

    match winner {
        Some(direction) => {
            let voters: Vec<&LlmVote> = outcomes
                .iter()
                .filter_map(|o| o.as_ref().ok())
                .filter(|v| vote_direction(v) == Some(direction))
                .collect();
            ScreeningDecision {
                proceed: true,
                direction: Some(direction),
                cost,
                chart_path: None,
                averaged_stop_loss: mean(voters.iter().filter_map(|v| v.proposed_stop_loss)),
                averaged_profit_target: mean(
                    voters.iter().filter_map(|v| v.proposed_profit_target),
                ),
                rationale: voters.iter().find_map(|v| v.rationale.clone()),
                debug,
            }
        }
        None => {
            let failed = outcomes.iter().filter(|o| o.is_err()).count();
            ScreeningDecision {
                proceed: false,
                direction: None,
                cost,
                chart_path: None,
                averaged_stop_loss: None,
                averaged_profit_target: None,
                rationale: Some(format!(
                    "consensus not reached: {long_votes} long, {short_votes} short, {failed} failed of {} calls (threshold {threshold})",
                    outcomes.len()
                )),
                debug,
            }
        }
    }
}

pub struct LlmScreen {
    client: Arc<dyn LlmClient>,
    config: ScreenConfig,
}

impl LlmScreen {
    pub fn new(client: Arc<dyn LlmClient>, config: ScreenConfig) -> Self {
        LlmScreen { client, config }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.num_calls > 0
    }

    /// Dispatch every call, wait for all of them to settle, then reduce.
    ///
    /// Pending calls are aborted if `cancel` fires; no decision is produced then.
    pub async fn screen(
        &self,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<ScreeningDecision, ScreenerError> {
        let chart_path = request.chart_path.clone();
        let nominal = request.signal.direction;
        let calls = self.config.num_calls;
        let timeout = self.config.call_timeout;
        let request = Arc::new(request);

        let mut tasks = JoinSet::new();
        for index in 0..calls {
            let client = Arc::clone(&self.client);
            let request = Arc::clone(&request);
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(timeout, client.confirm(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(LlmCallError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                };
                (index, outcome)
            });
        }

        let mut settled: Vec<Option<CallOutcome>> = vec![None; calls];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(ScreenerError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => {
                        match &outcome {
                            Ok(vote) => debug!(call = index, proceed = vote.proceed, direction = ?vote.direction, cost = vote.cost, "llm call settled"),
                            Err(err) => warn!(call = index, error = %err, "llm call failed"),
                        }
                        settled[index] = Some(outcome);
                    }
                    Some(Err(err)) => warn!(error = %err, "llm call task did not complete"),
                    None => break,
                }
            }
        }

        let outcomes: Vec<CallOutcome> = settled
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    Err(LlmCallError::Task {
                        reason: "task panicked".to_string(),
                    })
                })
            })
            .collect();

        let mut decision = reach_consensus(&outcomes, nominal, &self.config);
        decision.chart_path = chart_path;
        Ok(decision)
    }
}

/// Screen one candidate, passing it through when no enabled screen is supplied.
pub async fn screen_candidate(
    screen: Option<&LlmScreen>,
    request: LlmRequest,
    cancel: &CancellationToken,
) -> Result<ScreeningDecision, ScreenerError> {
    match screen {
        Some(s) if s.is_enabled() => s.screen(request, cancel).await,
        _ => Ok(ScreeningDecision::pass_through(request.chart_path)),
    }
}
