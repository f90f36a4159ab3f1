use axum::{
    Json,
    extract::{Path, State},
};

use crate::AppState;
use crate::api::models::products::ProductResponse;
use crate::errors::{Error, Result};

/// List the product catalog
#[utoipa::path(
    get,
    path = "/api/products",
    tag = "products",
    summary = "List products",
    description = "Returns every product in the catalog, in display order.",
    responses(
        (status = 200, description = "Product catalog", body = [ProductResponse]),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_products(State(state): State<AppState>) -> Json<Vec<ProductResponse>> {
    let catalog = state.catalog();
    Json(
        catalog
            .products()
            .iter()
            .map(|product| ProductResponse::from_product(catalog, product))
            .collect(),
    )
}

/// Get a single product
#[utoipa::path(
    get,
    path = "/api/products/{product_id}",
    tag = "products",
    summary = "Get product",
    params(("product_id" = String, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ProductResponse),
        (status = 404, description = "Unknown product"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_product(State(state): State<AppState>, Path(product_id): Path<String>) -> Result<Json<ProductResponse>> {
    let catalog = state.catalog();
    let product = catalog.find(&product_id).ok_or_else(|| Error::NotFound {
        resource: "Product".to_string(),
        id: product_id.clone(),
    })?;
    Ok(Json(ProductResponse::from_product(catalog, product)))
}
