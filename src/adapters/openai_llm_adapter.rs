//! OpenAI-compatible chat-completions client for candidate confirmation.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::domain::error::{LlmCallError, ScreenerError};
use crate::domain::signal::Direction;
use crate::ports::config_port::ConfigPort;
use crate::ports::llm_port::{LlmClient, LlmRequest, LlmVote};

const SYSTEM_PROMPT: &str = "You are an experienced intraday trader reviewing pattern-detected trade \
candidates. Decide whether the setup is worth taking. Respond only with valid JSON.";

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Duration,
    /// USD per 1,000 prompt tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1,000 completion tokens.
    pub output_cost_per_1k: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            max_tokens: 512,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
            input_cost_per_1k: 0.0025,
            output_cost_per_1k: 0.01,
        }
    }
}

impl LlmConfig {
    /// Read `[llm]`. The key comes from `api_key`, or from the environment
    /// variable named by `api_key_env` (default `OPENAI_API_KEY`).
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ScreenerError> {
        let defaults = Self::default();
        let api_key = match config.get_string("llm", "api_key") {
            Some(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => {
                let var = config
                    .get_string("llm", "api_key_env")
                    .unwrap_or_else(|| "OPENAI_API_KEY".to_string());
                std::env::var(&var).map_err(|_| ScreenerError::ConfigMissing {
                    section: "llm".into(),
                    key: format!("api_key (or environment variable {var})"),
                })?
            }
        };
        let timeout_secs = config.get_double("llm", "timeout_secs", defaults.timeout.as_secs_f64());

        Ok(Self {
            api_url: config.get_string("llm", "api_url").unwrap_or(defaults.api_url),
            api_key,
            model: config.get_string("llm", "model").unwrap_or(defaults.model),
            max_tokens: config
                .get_int("llm", "max_tokens", i64::from(defaults.max_tokens))
                .clamp(1, 32_768) as u32,
            temperature: config.get_double("llm", "temperature", defaults.temperature),
            timeout: Duration::from_secs_f64(timeout_secs.max(1.0)),
            input_cost_per_1k: config.get_double("llm", "input_cost_per_1k", defaults.input_cost_per_1k),
            output_cost_per_1k: config.get_double(
                "llm",
                "output_cost_per_1k",
                defaults.output_cost_per_1k,
            ),
        })
    }

    pub fn cost(&self, usage: &Usage) -> f64 {
        usage.prompt_tokens as f64 / 1000.0 * self.input_cost_per_1k
            + usage.completion_tokens as f64 / 1000.0 * self.output_cost_per_1k
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Default, Deserialize)]
struct VoteBody {
    #[serde(default)]
    proceed: bool,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    profit_target: Option<f64>,
    #[serde(default)]
    rationale: Option<String>,
}

pub struct OpenAiLlmAdapter {
    config: LlmConfig,
    client: reqwest::Client,
}

/// MIME type for charts that can be attached as an image part.
fn raster_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Prompt text for one call. `chart_attached` is true only when the chart
/// travels with the message as an image part.
pub fn build_prompt(request: &LlmRequest, chart_attached: bool) -> String {
    let signal = &request.signal;
    let mut prompt = format!(
        "Ticker: {}\nPattern: {}\nSignal: {} at {} price ${:.2}\nNominal direction: {}\n",
        request.ticker,
        request.pattern,
        match signal.kind {
            crate::domain::signal::SignalKind::Entry => "entry",
            crate::domain::signal::SignalKind::Exit => "exit",
        },
        signal.timestamp.format("%Y-%m-%d %H:%M"),
        signal.price,
        signal.direction.map_or("unspecified", |d| d.as_str()),
    );
    if let Some(text) = &request.market_metrics_text {
        prompt.push('\n');
        prompt.push_str(text);
        prompt.push('\n');
    }
    if let Some(context) = &request.context {
        prompt.push_str("\nAdditional context:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    if chart_attached {
        prompt.push_str("\nThe attached image charts the session up to the signal.\n");
    }
    prompt.push_str(
        r#"
Respond in JSON format:
{
    "proceed": true|false,
    "direction": "long"|"short"|null,
    "stop_loss": <price or null>,
    "profit_target": <price or null>,
    "rationale": "<brief explanation>"
}"#,
    );
    prompt
}

/// Parse the JSON object embedded in a model reply.
pub fn parse_vote(content: &str, cost: f64) -> Result<LlmVote, LlmCallError> {
    let invalid = |reason: String| LlmCallError::InvalidResponse { reason, cost };
    let start = content
        .find('{')
        .ok_or_else(|| invalid("no JSON found in response".to_string()))?;
    let end = content
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| invalid("no closing brace found".to_string()))?;

    let body: VoteBody = serde_json::from_str(&content[start..=end])
        .map_err(|e| invalid(format!("failed to parse JSON: {e}")))?;

    Ok(LlmVote {
        proceed: body.proceed,
        direction: body.direction.and_then(|d| d.parse::<Direction>().ok()),
        cost,
        rationale: body.rationale,
        proposed_stop_loss: body.stop_loss.filter(|v| v.is_finite() && *v > 0.0),
        proposed_profit_target: body.profit_target.filter(|v| v.is_finite() && *v > 0.0),
        raw_response: Some(content.to_string()),
    })
}

impl OpenAiLlmAdapter {
    pub fn new(config: LlmConfig) -> Result<Self, ScreenerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ScreenerError::ConfigInvalid {
                section: "llm".into(),
                key: "api_url".into(),
                reason: e.to_string(),
            })?;
        Ok(Self { config, client })
    }

    pub fn build_body(&self, request: &LlmRequest, image: Option<(&str, &[u8])>) -> serde_json::Value {
        let prompt = build_prompt(request, image.is_some());
        let user_content = match image {
            Some((mime, bytes)) => json!([
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime};base64,{}", STANDARD.encode(bytes)) }
                }
            ]),
            None => json!(prompt),
        };
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmAdapter {
    async fn confirm(&self, request: &LlmRequest) -> Result<LlmVote, LlmCallError> {
        let chart = match request.chart_path.as_deref() {
            Some(path) => match raster_mime(path) {
                Some(mime) => {
                    let bytes = tokio::fs::read(path).await.map_err(|e| LlmCallError::Transport {
                        reason: format!("failed to read chart {}: {e}", path.display()),
                    })?;
                    Some((mime, bytes))
                }
                None => None,
            },
            None => None,
        };
        let body = self.build_body(
            request,
            chart.as_ref().map(|(mime, bytes)| (*mime, bytes.as_slice())),
        );

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmCallError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(LlmCallError::Api {
                status: status.as_u16(),
                reason,
            });
        }

        let response_json: serde_json::Value =
            response.json().await.map_err(|e| LlmCallError::InvalidResponse {
                reason: e.to_string(),
                cost: 0.0,
            })?;

        let usage: Usage = response_json
            .get("usage")
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();
        let cost = self.config.cost(&usage);
        debug!(
            model = %self.config.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost,
            "llm response received"
        );

        let content = response_json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| LlmCallError::InvalidResponse {
                reason: "missing content".to_string(),
                cost,
            })?;

        parse_vote(content, cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::screen::ScreenConfig;
    use crate::domain::signal::Signal;
    use chrono::NaiveDateTime;
    use std::path::PathBuf;

    fn request(chart: Option<&str>) -> LlmRequest {
        LlmRequest {
            ticker: "SPY".into(),
            pattern: "quick_rise+fixed_time".into(),
            signal: Signal::entry(
                NaiveDateTime::parse_from_str("2024-03-01 09:45", "%Y-%m-%d %H:%M").unwrap(),
                226.38,
                Some(Direction::Long),
            ),
            chart_path: chart.map(PathBuf::from),
            screen_config: ScreenConfig::default(),
            raw_config: serde_json::Value::Null,
            context: Some("FOMC day".into()),
            debug: false,
            market_metrics_text: Some("- Gap: UP +1.50 (1.48%)".into()),
        }
    }

    fn adapter() -> OpenAiLlmAdapter {
        OpenAiLlmAdapter::new(LlmConfig {
            api_key: "test".into(),
            ..LlmConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn prompt_includes_context_and_metrics() {
        let prompt = build_prompt(&request(None), false);
        assert!(prompt.contains("Ticker: SPY"));
        assert!(prompt.contains("entry at 2024-03-01 09:45 price $226.38"));
        assert!(prompt.contains("- Gap: UP +1.50 (1.48%)"));
        assert!(prompt.contains("FOMC day"));
        assert!(prompt.contains("\"proceed\""));
    }

    #[test]
    fn parse_vote_extracts_embedded_json() {
        let reply = "Sure.\n```json\n{\"proceed\": true, \"direction\": \"SHORT\", \"stop_loss\": 227.1, \"rationale\": \"fade\"}\n```";
        let vote = parse_vote(reply, 0.004).unwrap();
        assert!(vote.proceed);
        assert_eq!(vote.direction, Some(Direction::Short));
        assert_eq!(vote.proposed_stop_loss, Some(227.1));
        assert_eq!(vote.proposed_profit_target, None);
        assert_eq!(vote.cost, 0.004);
        assert_eq!(vote.rationale.as_deref(), Some("fade"));
    }

    #[test]
    fn parse_vote_errors_keep_cost() {
        let err = parse_vote("no json here", 0.002).unwrap_err();
        assert_eq!(err.cost(), 0.002);
        assert!(matches!(parse_vote("{ broken", 0.0), Err(LlmCallError::InvalidResponse { .. })));
    }

    #[test]
    fn unknown_direction_becomes_none() {
        let vote = parse_vote("{\"proceed\": true, \"direction\": \"sideways\"}", 0.0).unwrap();
        assert_eq!(vote.direction, None);
    }

    #[test]
    fn cost_uses_token_pricing() {
        let config = LlmConfig {
            input_cost_per_1k: 0.01,
            output_cost_per_1k: 0.03,
            ..LlmConfig::default()
        };
        let usage = Usage {
            prompt_tokens: 2000,
            completion_tokens: 100,
        };
        assert!((config.cost(&usage) - 0.023).abs() < 1e-12);
    }

    #[test]
    fn body_attaches_raster_images_only() {
        let adapter = adapter();
        let text_only = adapter.build_body(&request(None), None);
        assert!(text_only["messages"][1]["content"].is_string());

        // An SVG chart path without image bytes must not claim an attachment.
        let svg_only = adapter.build_body(&request(Some("c.svg")), None);
        assert!(!svg_only["messages"][1]["content"].as_str().unwrap().contains("attached image"));

        let with_image = adapter.build_body(&request(Some("c.png")), Some(("image/png", b"abc")));
        let parts = with_image["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,YWJj");
        assert!(parts[0]["text"].as_str().unwrap().contains("attached image"));

        assert_eq!(raster_mime(Path::new("chart.SVG")), None);
        assert_eq!(raster_mime(Path::new("chart.jpeg")), Some("image/jpeg"));
    }

    #[test]
    fn config_reads_llm_section() {
        let config = FileConfigAdapter::from_string(
            "[llm]\napi_key = sk-test\nmodel = gpt-4o-mini\nmax_tokens = 256\n",
        )
        .unwrap();
        let llm = LlmConfig::from_config(&config).unwrap();
        assert_eq!(llm.api_key, "sk-test");
        assert_eq!(llm.model, "gpt-4o-mini");
        assert_eq!(llm.max_tokens, 256);
        assert_eq!(llm.api_url, LlmConfig::default().api_url);
    }

    #[test]
    fn missing_key_env_is_config_error() {
        let config = FileConfigAdapter::from_string(
            "[llm]\napi_key_env = INTRASCREEN_TEST_KEY_THAT_IS_NOT_SET\n",
        )
        .unwrap();
        assert!(matches!(
            LlmConfig::from_config(&config),
            Err(ScreenerError::ConfigMissing { .. })
        ));
    }
}
