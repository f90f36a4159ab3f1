//! Client side of the hosted try-on model.
//!
//! The orchestrator talks to the model through the [`TryOnModel`] trait so that it can be driven
//! by a fake in tests. [`GradioClient`] is the production implementation, speaking the Gradio
//! HTTP API of a Hugging Face Space.
//!
//! Hosted apps return either a single file or a sequence of files (IDM-VTON returns the try-on
//! image followed by the mask it used). [`RawOutput`] captures both shapes and is collapsed to
//! one [`GeneratedImage`] before leaving the client, so callers never see the difference.

pub mod gradio;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub use gradio::GradioClient;

/// Everything the model needs for one try-on.
#[derive(Debug, Clone, PartialEq)]
pub struct TryOnInput {
    /// Local path of the person photo, used as the canvas background
    pub person_image: PathBuf,
    /// Local path of the garment image
    pub garment_image: PathBuf,
    pub garment_description: String,
    /// Detect the garment region automatically
    pub auto_mask: bool,
    /// Crop the person image before compositing
    pub auto_crop: bool,
    pub denoise_steps: u32,
    pub seed: i64,
}

/// A generated image downloaded to local disk. The caller owns the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("request to model failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("model endpoint {endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: StatusCode,
        body: String,
    },

    #[error("model reported an error: {message}")]
    Remote { message: String },

    #[error("unexpected response from model: {message}")]
    Protocol { message: String },

    #[error("model returned no output")]
    EmptyOutput,

    #[error("failed to store model output: {0}")]
    Io(#[from] std::io::Error),
}

impl InferenceError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }
}

/// A hosted model that dresses a person photo in a garment.
#[async_trait]
pub trait TryOnModel: Send + Sync {
    async fn predict(&self, input: TryOnInput) -> Result<GeneratedImage, InferenceError>;
}

/// A file reference as returned by a Gradio app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OutputFile {
    /// `gradio.FileData` object
    FileData {
        path: String,
        #[serde(default)]
        url: Option<String>,
    },
    /// Bare server path or URL
    Path(String),
}

impl OutputFile {
    pub fn path(&self) -> &str {
        match self {
            OutputFile::FileData { path, .. } | OutputFile::Path(path) => path,
        }
    }
}

/// Raw return value of a prediction: one file, or one file per output component.
///
/// `Sequence` is tried first; a struct variant would otherwise accept a JSON array positionally.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawOutput {
    Sequence(Vec<OutputFile>),
    Single(OutputFile),
}

impl RawOutput {
    /// The primary output: the value itself, or the first element of a sequence.
    pub fn into_primary(self) -> Option<OutputFile> {
        match self {
            RawOutput::Single(file) => Some(file),
            RawOutput::Sequence(files) => files.into_iter().next(),
        }
    }
}
