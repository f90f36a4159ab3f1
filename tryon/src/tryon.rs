//! Try-on orchestration.
//!
//! [`TryOnService::perform`] runs one request end to end: resolve the product and its garment
//! image, stage the uploaded photo in scratch space, call the model, and promote the generated
//! image into the results directory. The scratch photo is removed on every exit path.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use scopeguard::ScopeGuard;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use url::Url;
use utoipa::ToSchema;

use crate::catalog::{Catalog, public_url};
use crate::config::TryOnConfig;
use crate::inference::{InferenceError, TryOnInput, TryOnModel};
use crate::storage::FileStore;

/// One try-on request as received from a client.
#[derive(Debug, Clone)]
pub struct TryOnRequest {
    pub product_id: String,
    pub person_image: Bytes,
    /// File name supplied by the uploader, if any
    pub person_filename: Option<String>,
    pub seed: i64,
    pub steps: u32,
}

/// A completed try-on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOn {
    pub product_id: String,
    /// File name inside the results directory
    pub file_name: String,
    /// Public URL of the generated image
    pub result_url: String,
}

#[derive(Debug, Error)]
pub enum TryOnError {
    #[error("Product '{product_id}' does not exist")]
    ProductNotFound { product_id: String },

    #[error("Garment image '{file_name}' for product '{product_id}' is missing, please contact the administrator")]
    MissingAsset { product_id: String, file_name: String },

    #[error("Try-on model failed: {0}")]
    RemoteFailure(#[from] InferenceError),

    #[error("Failed to process images: {0}")]
    IoFailure(#[from] std::io::Error),
}

/// Machine-readable failure category reported to clients as `error_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TryOnErrorKind {
    NotFound,
    MissingAsset,
    RemoteFailure,
    IoFailure,
}

impl TryOnErrorKind {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(self) -> bool {
        matches!(self, TryOnErrorKind::RemoteFailure)
    }
}

impl TryOnError {
    pub fn kind(&self) -> TryOnErrorKind {
        match self {
            TryOnError::ProductNotFound { .. } => TryOnErrorKind::NotFound,
            TryOnError::MissingAsset { .. } => TryOnErrorKind::MissingAsset,
            TryOnError::RemoteFailure(_) => TryOnErrorKind::RemoteFailure,
            TryOnError::IoFailure(_) => TryOnErrorKind::IoFailure,
        }
    }
}

pub struct TryOnService {
    catalog: Arc<Catalog>,
    store: FileStore,
    model: Arc<dyn TryOnModel>,
    settings: TryOnConfig,
    base_url: Url,
}

impl TryOnService {
    pub fn new(catalog: Arc<Catalog>, store: FileStore, model: Arc<dyn TryOnModel>, settings: TryOnConfig, base_url: Url) -> Self {
        Self {
            catalog,
            store,
            model,
            settings,
            base_url,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn settings(&self) -> &TryOnConfig {
        &self.settings
    }

    /// Public URL of a file in the results directory.
    pub fn result_url(&self, file_name: &str) -> String {
        public_url(&self.base_url, &["results", file_name]).to_string()
    }

    #[instrument(
        skip(self, request),
        fields(product_id = %request.product_id, seed = request.seed, steps = request.steps, bytes = request.person_image.len()),
        err
    )]
    pub async fn perform(&self, request: TryOnRequest) -> Result<TryOn, TryOnError> {
        let product = self
            .catalog
            .find(&request.product_id)
            .ok_or_else(|| TryOnError::ProductNotFound {
                product_id: request.product_id.clone(),
            })?;

        if !self.store.garment_exists(&product.file_name).await {
            error!(
                product_id = %product.id,
                path = %self.store.garment_path(&product.file_name).display(),
                "Garment image missing from static directory"
            );
            return Err(TryOnError::MissingAsset {
                product_id: product.id.clone(),
                file_name: product.file_name.clone(),
            });
        }

        let scratch = self
            .store
            .write_scratch(&request.person_image, request.person_filename.as_deref())
            .await?;
        let scratch = scopeguard::guard(scratch, remove_scratch);

        let input = TryOnInput {
            person_image: scratch.clone(),
            garment_image: self.store.garment_path(&product.file_name),
            garment_description: self.settings.garment_description.clone(),
            auto_mask: self.settings.auto_mask,
            auto_crop: self.settings.auto_crop,
            denoise_steps: request.steps,
            seed: request.seed,
        };

        info!("Sending try-on request to model");
        let predicted = self.model.predict(input).await;

        // The guard only fires if this future is dropped before the model answers
        let scratch = ScopeGuard::into_inner(scratch);
        log_removal_failure(&scratch, tokio::fs::remove_file(&scratch).await);
        let generated = predicted?;

        let file_name = self
            .store
            .store_result(&generated.path, &product.id)
            .await
            .inspect_err(|e| error!(path = %generated.path.display(), error = %e, "Generated image could not be moved to results"))?;

        let result_url = self.result_url(&file_name);
        info!(result = %file_name, "Try-on completed");

        Ok(TryOn {
            product_id: product.id.clone(),
            file_name,
            result_url,
        })
    }
}

fn remove_scratch(path: PathBuf) {
    log_removal_failure(&path, std::fs::remove_file(&path));
}

fn log_removal_failure(path: &Path, result: io::Result<()>) {
    if let Err(e) = result
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove scratch upload");
    }
}
