use axum::{
    Json,
    extract::{Multipart, State},
};
use tracing::warn;

use crate::AppState;
use crate::api::models::try_on::{TryOnForm, TryOnResponse, TryOnUpload};
use crate::errors::Result;

/// Dress the uploaded person photo in a catalog garment
#[utoipa::path(
    post,
    path = "/api/try-on",
    tag = "try-on",
    summary = "Virtual try-on",
    description = "Runs the hosted try-on model on the uploaded photo and the garment image of `product_id`.

Unknown products, missing garment images, model failures and local I/O failures are reported with
`success: false` and an `error_kind` of `not_found`, `missing_asset`, `remote_failure` or `io_failure`.
Only `remote_failure` is worth retrying.",
    request_body(content = TryOnUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Try-on outcome", body = TryOnResponse),
        (status = 400, description = "Malformed form, missing fields or non-integer seed/steps"),
        (status = 413, description = "Payload too large"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn try_on(State(state): State<AppState>, multipart: Multipart) -> Result<Json<TryOnResponse>> {
    let form = TryOnForm::from_multipart(multipart).await?;
    let request = form.into_request(None, state.try_on.settings())?;

    let response = match state.try_on.perform(request).await {
        Ok(result) => TryOnResponse::success(result.result_url),
        Err(e) => {
            warn!(kind = ?e.kind(), error = %e, "Try-on failed");
            TryOnResponse::failure(&e)
        }
    };
    Ok(Json(response))
}
