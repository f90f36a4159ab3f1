//! Gradio HTTP API client for Hugging Face Spaces.
//!
//! Gradio 5 serves its HTTP API under `/gradio_api`, Gradio 4 at the root. The client reads the
//! prefix from `GET {base}/config` on first use (unless configured) and keeps it for its lifetime.
//! Below, `{api}` stands for `{base}{prefix}`.
//!
//! A prediction takes four round trips:
//!
//! 1. `POST {api}/upload` once per input image (multipart field `files`), which returns the
//!    server-side paths
//! 2. `POST {api}/call/{name}` with `{"data": [...]}`, which returns an `event_id`
//! 3. `GET {api}/call/{name}/{event_id}`, a server-sent event stream that ends with either
//!    `event: complete` carrying the outputs or `event: error`
//! 4. `GET` of the primary output file, written into the scratch directory

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{GeneratedImage, InferenceError, OutputFile, RawOutput, TryOnInput, TryOnModel};
use crate::catalog::public_url;
use crate::config::InferenceConfig;

const DEFAULT_OUTPUT_EXTENSION: &str = "webp";

/// Resolve a Space id (`owner/name`) to the URL its Gradio app is served from.
pub fn space_url(space: &str) -> Result<Url, url::ParseError> {
    let host = space.trim().to_lowercase().replace(['/', '_', '.'], "-");
    Url::parse(&format!("https://{host}.hf.space"))
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    event_id: String,
}

/// The parts of an app's `/config` the client needs.
#[derive(Debug, Deserialize)]
struct AppConfig {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    api_prefix: Option<String>,
}

/// Path segments of an API prefix such as `/gradio_api`.
fn prefix_segments(prefix: &str) -> Vec<String> {
    prefix.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

pub struct GradioClient {
    client: Client,
    base_url: Url,
    api_name: String,
    token: Option<String>,
    scratch_dir: PathBuf,
    prefix: OnceCell<Vec<String>>,
}

impl GradioClient {
    /// Build a client for the configured Space. Downloaded outputs land in `scratch_dir`.
    pub fn new(config: &InferenceConfig, scratch_dir: impl Into<PathBuf>) -> Result<Self, InferenceError> {
        let base_url = match &config.endpoint_url {
            Some(url) => url.clone(),
            None => space_url(&config.space).map_err(|e| InferenceError::protocol(format!("invalid space id '{}': {e}", config.space)))?,
        };

        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let token = config.token.clone().filter(|t| !t.trim().is_empty());
        info!(
            base_url = %base_url,
            api_name = %config.api_name,
            authenticated = token.is_some(),
            "Configured Gradio client"
        );

        Ok(Self {
            client: builder.build()?,
            base_url,
            api_name: config.api_name.trim_start_matches('/').to_string(),
            token,
            scratch_dir: scratch_dir.into(),
            prefix: match &config.api_prefix {
                Some(prefix) => OnceCell::new_with(Some(prefix_segments(prefix))),
                None => OnceCell::new(),
            },
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// API prefix segments, fetched from the app's `/config` on first call.
    async fn api_prefix(&self) -> Result<&[String], InferenceError> {
        let prefix = self.prefix.get_or_try_init(|| self.discover_prefix()).await?;
        Ok(prefix.as_slice())
    }

    async fn discover_prefix(&self) -> Result<Vec<String>, InferenceError> {
        let url = public_url(&self.base_url, &["config"]);
        let response = self.authorized(self.client.get(url.clone())).send().await?;
        let config: AppConfig = ensure_success(response, &url).await?.json().await?;

        let prefix = config.api_prefix.unwrap_or_default();
        info!(
            version = config.version.as_deref().unwrap_or("unknown"),
            api_prefix = %prefix,
            "Discovered Gradio app"
        );
        Ok(prefix_segments(&prefix))
    }

    async fn endpoint(&self, segments: &[&str]) -> Result<Url, InferenceError> {
        let mut all: Vec<&str> = self.api_prefix().await?.iter().map(String::as_str).collect();
        all.extend_from_slice(segments);
        Ok(public_url(&self.base_url, &all))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Like [`Self::authorized`], but only for URLs on the app's own origin.
    fn authorized_for(&self, url: &Url, request: RequestBuilder) -> RequestBuilder {
        if url.origin() == self.base_url.origin() {
            self.authorized(request)
        } else {
            request
        }
    }

    /// Upload a local file and return its server-side path.
    async fn upload(&self, path: &Path) -> Result<String, InferenceError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        let part = multipart::Part::bytes(bytes).file_name(file_name).mime_str(mime.essence_str())?;
        let form = multipart::Form::new().part("files", part);

        let url = self.endpoint(&["upload"]).await?;
        let response = self.authorized(self.client.post(url.clone())).multipart(form).send().await?;
        let paths: Vec<String> = ensure_success(response, &url).await?.json().await?;

        paths
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::protocol("upload returned no paths"))
    }

    /// Queue a prediction and return its event id.
    async fn submit(&self, data: Value) -> Result<String, InferenceError> {
        let url = self.endpoint(&["call", &self.api_name]).await?;
        let response = self
            .authorized(self.client.post(url.clone()))
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let submitted: SubmitResponse = ensure_success(response, &url).await?.json().await?;
        Ok(submitted.event_id)
    }

    /// Wait for the prediction to finish and return its raw outputs.
    async fn await_result(&self, event_id: &str) -> Result<Value, InferenceError> {
        let url = self.endpoint(&["call", &self.api_name, event_id]).await?;
        let response = self.authorized(self.client.get(url.clone())).send().await?;
        let body = ensure_success(response, &url).await?.text().await?;
        parse_event_stream(&body)
    }

    async fn file_url(&self, file: &OutputFile) -> Result<Url, InferenceError> {
        let raw = match file {
            OutputFile::FileData { url: Some(url), .. } => url.clone(),
            OutputFile::Path(path) if path.starts_with("http://") || path.starts_with("https://") => path.clone(),
            other => {
                let mut api = self.base_url.as_str().trim_end_matches('/').to_string();
                for segment in self.api_prefix().await? {
                    api.push('/');
                    api.push_str(segment);
                }
                format!("{api}/file={}", other.path())
            }
        };
        Url::parse(&raw).map_err(|e| InferenceError::protocol(format!("invalid output URL '{raw}': {e}")))
    }

    /// Download an output file into the scratch directory.
    async fn download(&self, file: &OutputFile) -> Result<PathBuf, InferenceError> {
        let url = self.file_url(file).await?;
        let response = self.authorized_for(&url, self.client.get(url.clone())).send().await?;
        let bytes = ensure_success(response, &url).await?.bytes().await?;

        let destination = self
            .scratch_dir
            .join(format!("gradio_{}.{}", Uuid::new_v4().simple(), output_extension(file.path())));
        tokio::fs::write(&destination, &bytes).await?;
        debug!(url = %url, path = %destination.display(), bytes = bytes.len(), "Downloaded model output");
        Ok(destination)
    }
}

#[async_trait]
impl TryOnModel for GradioClient {
    #[instrument(skip(self, input), fields(base_url = %self.base_url, steps = input.denoise_steps, seed = input.seed), err)]
    async fn predict(&self, input: TryOnInput) -> Result<GeneratedImage, InferenceError> {
        let person = self.upload(&input.person_image).await?;
        let garment = self.upload(&input.garment_image).await?;

        let data = json!([
            {
                "background": file_data(&person, &input.person_image),
                "layers": [],
                "composite": null,
            },
            file_data(&garment, &input.garment_image),
            input.garment_description,
            input.auto_mask,
            input.auto_crop,
            input.denoise_steps,
            input.seed,
        ]);

        let event_id = self.submit(data).await?;
        debug!(event_id = %event_id, "Prediction queued");

        let outputs = self.await_result(&event_id).await?;
        let raw: RawOutput = serde_json::from_value(outputs)
            .map_err(|e| InferenceError::protocol(format!("outputs are not files: {e}")))?;
        let primary = raw.into_primary().ok_or(InferenceError::EmptyOutput)?;

        let path = self.download(&primary).await?;
        Ok(GeneratedImage { path })
    }
}

/// `gradio.FileData` payload referencing an uploaded file.
fn file_data(server_path: &str, local: &Path) -> Value {
    json!({
        "path": server_path,
        "orig_name": local.file_name().and_then(|n| n.to_str()),
        "meta": { "_type": "gradio.FileData" },
    })
}

fn output_extension(path: &str) -> String {
    Path::new(path.rsplit('/').next().unwrap_or(path))
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_OUTPUT_EXTENSION.to_string())
}

async fn ensure_success(response: Response, url: &Url) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(endpoint = %url, status = %status, "Model endpoint returned an error status");
    Err(InferenceError::Status {
        endpoint: url.to_string(),
        status,
        body,
    })
}

/// Extract the outcome of a finished Gradio event stream.
///
/// Returns the `data` of the `complete` event. An `error` event becomes
/// [`InferenceError::Remote`]; a stream that ends without either is a protocol error.
fn parse_event_stream(body: &str) -> Result<Value, InferenceError> {
    let mut event: Option<&str> = None;
    let mut data = String::new();

    // A trailing blank line terminates the final event even if the server omitted it
    for line in body.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            match event.take() {
                Some("complete") => {
                    return serde_json::from_str(&data)
                        .map_err(|e| InferenceError::protocol(format!("invalid complete payload: {e}")));
                }
                Some("error") => return Err(remote_error(&data)),
                _ => {}
            }
            data.clear();
        } else if let Some(name) = line.strip_prefix("event:") {
            event = Some(name.trim());
        } else if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.trim_start());
        }
    }

    Err(InferenceError::protocol("event stream ended without a result"))
}

fn remote_error(data: &str) -> InferenceError {
    let message = match serde_json::from_str::<Value>(data) {
        Ok(Value::String(message)) => message,
        Ok(Value::Null) | Err(_) if data.trim().is_empty() || data.trim() == "null" => "unknown error".to_string(),
        _ => data.trim().to_string(),
    };
    InferenceError::Remote { message }
}
