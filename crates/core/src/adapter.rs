//! Adapter seam: turning provider calls into usage records.
//!
//! Each provider integration implements [`UsageProducer`] for whatever it
//! observes (a response body, an SDK object, a stream summary). The tracer
//! only ever sees the resulting [`UsageRecord`]; how adapters hook into the
//! provider call is their own business.

use std::time::Duration;

use crate::usage::{Task, UsageRecord};

/// Produces a normalized usage record from one observed provider call.
pub trait UsageProducer<Call: ?Sized>: Send + Sync {
    /// The provider this adapter recognizes (e.g. "openai").
    fn provider(&self) -> &str;

    /// Extract usage from the call, or `None` if it carries none.
    fn usage(&self, call: &Call) -> Option<UsageRecord>;
}

/// A finished chat completion, as captured around the provider call.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    /// The raw JSON response body.
    pub body: serde_json::Value,
    /// Time from request to full response.
    pub latency: Duration,
}

/// Adapter for chat completion bodies.
///
/// Understands both `prompt_tokens`/`completion_tokens` (OpenAI-compatible)
/// and `input_tokens`/`output_tokens` (Anthropic) usage blocks.
#[derive(Debug, Clone)]
pub struct ChatCompletionUsage {
    provider: String,
}

impl ChatCompletionUsage {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
        }
    }
}

impl UsageProducer<ChatCompletion> for ChatCompletionUsage {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn usage(&self, call: &ChatCompletion) -> Option<UsageRecord> {
        let model = call.body.get("model")?.as_str()?;
        let usage = call.body.get("usage")?;

        let field = |names: [&str; 2]| {
            names
                .iter()
                .find_map(|n| usage.get(*n).and_then(serde_json::Value::as_u64))
        };
        let input = field(["prompt_tokens", "input_tokens"])?;
        let output = field(["completion_tokens", "output_tokens"]).unwrap_or(0);

        Some(
            UsageRecord::new(model)
                .with_provider(self.provider.clone())
                .with_task(Task::Chat)
                .with_tokens(input, output)
                .with_duration_ms(call.latency.as_secs_f64() * 1000.0),
        )
    }
}
