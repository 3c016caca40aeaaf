//! The single path from the pipeline to the model endpoint.
//!
//! [`ModelGateway::call`] sends one prompt, demands a JSON object back, and
//! returns it as `id -> text`. Transport failures (429, 5xx, timeouts) are
//! retried with exponential backoff. Output that does not parse as JSON gets
//! exactly one repair request and is never retried beyond that. Every outcome
//! is written to the daily call log.

mod reply;
pub mod sanitize;

pub use reply::{is_reasoning_model, ApiFlavor, TokenUsage};

use crate::call_log::{CallLog, CallLogEntry, CallStatus};
use crate::retry::{with_retry_if, RetryConfig, RetryFailure};
use reply::{build_request, ModelReply};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// System instruction sent with every translation request.
pub const JSON_ONLY_SYSTEM_PROMPT: &str = "Respond ONLY with a JSON object. No additional text.";

const REPAIR_SYSTEM_PROMPT: &str = "You are a JSON validator and fixer.";

const REPAIR_PROMPT_PREFIX: &str = "The following string is meant to be a JSON object but contains invalid syntax. \
Please correct any formatting issues (e.g., unescaped quotes) and respond ONLY with the valid JSON object.\n\n";

/// Longest error body kept from a failed HTTP response.
const MAX_ERROR_BODY: usize = 500;

/// Transport-level failure of a single HTTP attempt.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response envelope: {0}")]
    Envelope(#[source] serde_json::Error),
}

impl TransportError {
    /// Rate limits, server errors, timeouts and connection problems are worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Request(e) => !e.is_builder(),
            TransportError::Envelope(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("GatewayExhausted: model endpoint still failing after {attempts} attempt(s): {last_error}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },

    #[error("model endpoint rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("InvalidModelOutput: {0}")]
    InvalidModelOutput(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Run-scoped gateway configuration, fixed at construction.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub api_url: String,
    pub flavor: ApiFlavor,
    /// Directory for the daily call log files
    pub log_dir: PathBuf,
    /// Log the first prompt and the first raw response at info level
    pub trace_prompts: bool,
    /// First backoff delay; doubles on each retry
    pub retry_base_delay: Duration,
}

impl GatewayConfig {
    pub fn new(api_key: impl Into<String>, api_url: impl Into<String>, log_dir: impl Into<PathBuf>) -> Self {
        let api_key = api_key.into();
        Self {
            flavor: ApiFlavor::select(false, &api_key),
            api_key,
            api_url: api_url.into(),
            log_dir: log_dir.into(),
            trace_prompts: false,
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn with_flavor(mut self, flavor: ApiFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_trace_prompts(mut self, trace: bool) -> Self {
        self.trace_prompts = trace;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }
}

/// Per-call parameters.
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub model: String,
    pub timeout: Duration,
    /// Total attempts allowed for transport failures
    pub max_retries: u32,
    pub temperature: f32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 4,
            temperature: 0.0,
        }
    }
}

/// Why a cleaned model output could not be used.
enum ParseFailure {
    Syntax(serde_json::Error),
    NotAnObject(&'static str),
}

pub struct ModelGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    call_log: CallLog,
    traced_prompt: AtomicBool,
    traced_response: AtomicBool,
}

impl ModelGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(GatewayError::Client)?;
        Ok(Self {
            client,
            call_log: CallLog::new(config.log_dir.clone()),
            config,
            traced_prompt: AtomicBool::new(false),
            traced_response: AtomicBool::new(false),
        })
    }

    pub fn flavor(&self) -> ApiFlavor {
        self.config.flavor
    }

    pub fn call_log(&self) -> &CallLog {
        &self.call_log
    }

    /// Send `prompt` and return the model's JSON object as `id -> text`.
    ///
    /// `language` is only used for logging.
    pub async fn call(
        &self,
        prompt: &str,
        language: &str,
        options: &CallOptions,
    ) -> Result<HashMap<String, String>, GatewayError> {
        let started = Instant::now();
        let temperature = (!is_reasoning_model(&options.model)).then_some(options.temperature);
        let retry = RetryConfig {
            initial_delay: self.config.retry_base_delay,
            ..RetryConfig::model_call(options.max_retries.max(1))
        };

        if self.config.trace_prompts && !self.traced_prompt.swap(true, Ordering::Relaxed) {
            info!("First prompt sent to model:\n{}", prompt);
        }

        let outcome = with_retry_if(
            &retry,
            &format!("Model call ({})", language),
            move |_| {
                self.send_once(
                    self.config.flavor,
                    JSON_ONLY_SYSTEM_PROMPT,
                    prompt,
                    &options.model,
                    temperature,
                    options.timeout,
                )
            },
            TransportError::is_retryable,
        )
        .await;

        let (reply, attempt) = match outcome {
            Ok(success) => success,
            Err(failure) => {
                let attempts = failure.attempts();
                let error = gateway_error(failure);
                self.log(
                    self.entry(CallStatus::FatalError, prompt, language, options, started)
                        .with_attempt(attempts)
                        .with_error(&error),
                );
                return Err(error);
            }
        };

        let usage = reply.usage();
        let Some(raw_text) = reply.text() else {
            let error =
                GatewayError::InvalidModelOutput("response contained no text output".to_string());
            self.log(
                self.entry(CallStatus::FatalError, prompt, language, options, started)
                    .with_attempt(attempt)
                    .with_error(&error),
            );
            return Err(error);
        };

        if self.config.trace_prompts && !self.traced_response.swap(true, Ordering::Relaxed) {
            info!("First raw model response:\n{}", raw_text);
        }

        let cleaned = sanitize::clean_model_output(&raw_text);
        match parse_object(&cleaned) {
            Ok(parsed) => {
                self.log(
                    self.entry(CallStatus::Ok, prompt, language, options, started)
                        .with_attempt(attempt)
                        .with_tokens(usage.input_tokens, usage.output_tokens),
                );
                debug!("Model returned {} items for {}", parsed.len(), language);
                Ok(parsed)
            }
            Err(ParseFailure::NotAnObject(kind)) => {
                let error = GatewayError::InvalidModelOutput(format!(
                    "expected a JSON object, got {}",
                    kind
                ));
                self.log(
                    self.entry(CallStatus::FatalError, prompt, language, options, started)
                        .with_attempt(attempt)
                        .with_error(&error)
                        .with_excerpt(&cleaned),
                );
                Err(error)
            }
            Err(ParseFailure::Syntax(e)) => {
                warn!(
                    "Model output for {} is not valid JSON ({}), attempting repair",
                    language, e
                );
                self.log(
                    self.entry(CallStatus::InvalidJson, prompt, language, options, started)
                        .with_attempt(attempt)
                        .with_error(&e)
                        .with_excerpt(&cleaned),
                );
                self.repair(&cleaned, prompt, language, options, attempt, usage, started)
                    .await
            }
        }
    }

    /// One repair round-trip: ask the model to fix its own JSON. Never retried.
    ///
    /// `usage` is the token usage of the original call, which is what the
    /// `repaired_json` line records.
    #[allow(clippy::too_many_arguments)]
    async fn repair(
        &self,
        broken: &str,
        prompt: &str,
        language: &str,
        options: &CallOptions,
        attempt: u32,
        usage: TokenUsage,
        started: Instant,
    ) -> Result<HashMap<String, String>, GatewayError> {
        let repair_prompt = format!("{}{}", REPAIR_PROMPT_PREFIX, broken);
        let temperature = (!is_reasoning_model(&options.model)).then_some(0.0);

        let result = match self
            .send_once(
                ApiFlavor::ChatCompletions,
                REPAIR_SYSTEM_PROMPT,
                &repair_prompt,
                &options.model,
                temperature,
                options.timeout,
            )
            .await
        {
            Ok(reply) => {
                let repair_usage = reply.usage();
                debug!(
                    "Repair call for {} used {:?} input / {:?} output tokens",
                    language, repair_usage.input_tokens, repair_usage.output_tokens
                );
                match reply.text() {
                    Some(text) => {
                        let cleaned = sanitize::clean_model_output(&text);
                        match parse_object(&cleaned) {
                            Ok(parsed) => Ok(parsed),
                            Err(ParseFailure::Syntax(e)) => Err((
                                format!("repair attempt is still not valid JSON: {}", e),
                                Some(cleaned),
                            )),
                            Err(ParseFailure::NotAnObject(kind)) => Err((
                                format!("repair attempt returned {}, not a JSON object", kind),
                                Some(cleaned),
                            )),
                        }
                    }
                    None => Err(("repair response contained no text output".to_string(), None)),
                }
            }
            Err(e) => Err((format!("repair request failed: {}", e), None)),
        };

        match result {
            Ok(parsed) => {
                info!("Repaired malformed JSON for {}", language);
                self.log(
                    self.entry(CallStatus::RepairedJson, prompt, language, options, started)
                        .with_attempt(attempt)
                        .with_tokens(usage.input_tokens, usage.output_tokens),
                );
                Ok(parsed)
            }
            Err((reason, excerpt)) => {
                let error = GatewayError::InvalidModelOutput(reason);
                let mut entry = self
                    .entry(CallStatus::FatalError, prompt, language, options, started)
                    .with_attempt(attempt)
                    .with_error(&error);
                if let Some(excerpt) = excerpt {
                    entry = entry.with_excerpt(&excerpt);
                }
                self.log(entry);
                Err(error)
            }
        }
    }

    /// A single HTTP round-trip.
    async fn send_once(
        &self,
        flavor: ApiFlavor,
        system: &str,
        prompt: &str,
        model: &str,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<ModelReply, TransportError> {
        let url = format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            flavor.endpoint()
        );
        let request = build_request(flavor, model, system, prompt, temperature);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .timeout(timeout)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        ModelReply::parse(flavor, &body).map_err(TransportError::Envelope)
    }

    fn entry(
        &self,
        status: CallStatus,
        prompt: &str,
        language: &str,
        options: &CallOptions,
        started: Instant,
    ) -> CallLogEntry {
        let mut entry = CallLogEntry::new(status, prompt, &options.model, language);
        entry.temperature = (!is_reasoning_model(&options.model)).then_some(options.temperature);
        entry.latency_ms = started.elapsed().as_millis() as u64;
        entry
    }

    fn log(&self, entry: CallLogEntry) {
        if let Err(e) = self.call_log.append(&entry) {
            warn!(
                "Failed to write call log in {}: {}",
                self.call_log.dir().display(),
                e
            );
        }
    }
}

fn gateway_error(failure: RetryFailure<TransportError>) -> GatewayError {
    match failure {
        RetryFailure::Exhausted {
            attempts,
            last_error,
        } => GatewayError::Exhausted {
            attempts,
            last_error,
        },
        RetryFailure::Aborted {
            error: TransportError::Status { status, body },
            ..
        } => GatewayError::Rejected { status, body },
        RetryFailure::Aborted {
            error: TransportError::Envelope(e),
            ..
        } => GatewayError::InvalidModelOutput(format!("unexpected response envelope: {}", e)),
        RetryFailure::Aborted { attempt, error } => GatewayError::Exhausted {
            attempts: attempt,
            last_error: error,
        },
    }
}

fn parse_object(text: &str) -> Result<HashMap<String, String>, ParseFailure> {
    let value: Value = serde_json::from_str(text).map_err(ParseFailure::Syntax)?;
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(id, v)| {
                let text = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (id, text)
            })
            .collect()),
        Value::Array(_) => Err(ParseFailure::NotAnObject("an array")),
        Value::String(_) => Err(ParseFailure::NotAnObject("a string")),
        Value::Number(_) => Err(ParseFailure::NotAnObject("a number")),
        Value::Bool(_) => Err(ParseFailure::NotAnObject("a boolean")),
        Value::Null => Err(ParseFailure::NotAnObject("null")),
    }
}
