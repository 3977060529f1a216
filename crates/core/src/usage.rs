//! Usage records: the normalized description of one inference call.
//!
//! Adapters build a [`UsageRecord`] from a provider-specific response; the
//! tracer stamps identifiers onto it and ships it to the remote scorer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What kind of inference the call performed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    TextGeneration,
    Chat,
    TextEmbedding,
    TextToImage,
    ImageToText,
    TextToSpeech,
    SpeechToText,
    Translation,
    MultimodalGeneration,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TextGeneration => "text-generation",
            Self::Chat => "chat",
            Self::TextEmbedding => "text-embedding",
            Self::TextToImage => "text-to-image",
            Self::ImageToText => "image-to-text",
            Self::TextToSpeech => "text-to-speech",
            Self::SpeechToText => "speech-to-text",
            Self::Translation => "translation",
            Self::MultimodalGeneration => "multimodal-generation",
        };
        f.write_str(s)
    }
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text-generation" => Ok(Self::TextGeneration),
            "chat" => Ok(Self::Chat),
            "text-embedding" => Ok(Self::TextEmbedding),
            "text-to-image" => Ok(Self::TextToImage),
            "image-to-text" => Ok(Self::ImageToText),
            "text-to-speech" => Ok(Self::TextToSpeech),
            "speech-to-text" => Ok(Self::SpeechToText),
            "translation" => Ok(Self::Translation),
            "multimodal-generation" => Ok(Self::MultimodalGeneration),
            other => Err(format!("unknown task '{other}'")),
        }
    }
}

/// Pixel dimensions of an input or output image, serialized as `"WxH"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for ImageDimensions {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in '{s}'"))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in '{s}'"))?;
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for ImageDimensions {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageDimensions> for String {
    fn from(value: ImageDimensions) -> Self {
        value.to_string()
    }
}

/// Resource consumption and attribution for a single inference call.
///
/// Built by adapters and treated as immutable afterwards, except for the
/// one-time stamping of identifiers the tracer performs at submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Model identifier as reported by the provider (e.g. "gpt-4o").
    pub model_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_family: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hugging_face_path: Option<String>,

    /// The hosting provider (e.g. "openai", "anthropic").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_service_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_seconds: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_seconds: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input_images: Vec<ImageDimensions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_images: Vec<ImageDimensions>,

    /// Wall-clock latency of the provider call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_duration_ms: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_region: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_datetime: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,

    // --- Attribution ---
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Identifier stamped by the tracer at submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl UsageRecord {
    /// Create a record for the given model with no usage yet.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.managed_service_id = Some(provider.into());
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.request_duration_ms = Some(duration_ms);
        self
    }

    pub fn with_audio_seconds(mut self, input: Option<f64>, output: Option<f64>) -> Self {
        self.input_audio_seconds = input;
        self.output_audio_seconds = output;
        self
    }

    pub fn with_input_image(mut self, image: ImageDimensions) -> Self {
        self.input_images.push(image);
        self
    }

    pub fn with_output_image(mut self, image: ImageDimensions) -> Self {
        self.output_images.push(image);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Total tokens (input + output), or 0 if not recorded. Saturates at
    /// `u64::MAX` for absurd provider-reported counts.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens
            .unwrap_or(0)
            .saturating_add(self.output_tokens.unwrap_or(0))
    }
}
