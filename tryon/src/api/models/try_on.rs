use axum::extract::Multipart;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::TryOnConfig;
use crate::errors::{Error, Result};
use crate::tryon::{TryOnError, TryOnErrorKind, TryOnRequest};

/// Multipart body of a try-on request (documentation only; parsed by [`TryOnForm`])
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct TryOnUpload {
    /// Catalog id of the garment to try on
    pub product_id: String,
    /// Full-body photo of the person
    #[schema(value_type = String, format = Binary)]
    pub person_image: Vec<u8>,
    /// Generation seed
    #[schema(default = 42)]
    pub seed: Option<i64>,
    /// Denoising steps
    #[schema(default = 30, minimum = 1)]
    pub steps: Option<u32>,
}

/// Outcome of a try-on. Logical failures are reported here with `success: false`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TryOnResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<TryOnErrorKind>,
}

impl TryOnResponse {
    pub fn success(result_url: String) -> Self {
        Self {
            success: true,
            result_url: Some(result_url),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(error: &TryOnError) -> Self {
        Self {
            success: false,
            result_url: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}

/// Fields collected from a try-on multipart form.
///
/// Unknown fields are ignored. `product_id` may be absent when the product comes from the path.
#[derive(Debug, Default)]
pub struct TryOnForm {
    pub product_id: Option<String>,
    pub person_image: Option<(Bytes, Option<String>)>,
    pub seed: Option<String>,
    pub steps: Option<String>,
}

impl TryOnForm {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| Error::BadRequest {
            message: format!("Failed to parse multipart data: {e}"),
        })? {
            let name = field.name().unwrap_or("").to_string();
            match name.as_str() {
                "person_image" => {
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await.map_err(|e| Error::BadRequest {
                        message: format!("Failed to read person_image: {e}"),
                    })?;
                    form.person_image = Some((bytes, file_name));
                }
                "product_id" | "seed" | "steps" => {
                    let value = field.text().await.map_err(|e| Error::BadRequest {
                        message: format!("Failed to read {name}: {e}"),
                    })?;
                    let value = Some(value.trim().to_string());
                    match name.as_str() {
                        "product_id" => form.product_id = value,
                        "seed" => form.seed = value,
                        _ => form.steps = value,
                    }
                }
                _ => {}
            }
        }

        Ok(form)
    }

    /// Validate the collected fields into a request, filling defaults from configuration.
    pub fn into_request(self, product_id: Option<String>, settings: &TryOnConfig) -> Result<TryOnRequest> {
        let product_id = product_id
            .or(self.product_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| bad_request("product_id is required"))?;

        let (person_image, person_filename) = self.person_image.ok_or_else(|| bad_request("person_image is required"))?;
        if person_image.is_empty() {
            return Err(bad_request("person_image is empty"));
        }

        let seed = match self.seed.as_deref() {
            None | Some("") => settings.default_seed,
            Some(raw) => raw.parse().map_err(|_| bad_request(format!("seed must be an integer, got '{raw}'")))?,
        };

        let steps = match self.steps.as_deref() {
            None | Some("") => settings.default_steps,
            Some(raw) => raw.parse().map_err(|_| bad_request(format!("steps must be an integer, got '{raw}'")))?,
        };
        if steps == 0 || steps > settings.max_steps {
            return Err(bad_request(format!("steps must be between 1 and {}", settings.max_steps)));
        }

        Ok(TryOnRequest {
            product_id,
            person_image,
            person_filename,
            seed,
            steps,
        })
    }
}

fn bad_request(message: impl Into<String>) -> Error {
    Error::BadRequest { message: message.into() }
}
