//! JSON API for storefront frontends.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response types
//!
//! # Endpoints
//!
//! - `GET /api/products`: product catalog
//! - `GET /api/products/{id}`: single product
//! - `POST /api/try-on`: multipart try-on request
//!
//! The OpenAPI document is served at `/api/openapi.json`.

pub mod handlers;
pub mod models;
