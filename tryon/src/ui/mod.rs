//! Server-rendered storefront pages.
//!
//! A minimal browser UI over the same catalog and orchestrator as the JSON API:
//!
//! - `GET /`: product grid
//! - `GET /products/{id}`: product detail with the try-on form, showing `?result=<file>` if given
//! - `POST /products/{id}/try-on`: runs a try-on and redirects back to the detail page

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use minijinja::{Environment, context};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::AppState;
use crate::api::models::try_on::TryOnForm;
use crate::catalog::{Catalog, Product, format_price};
use crate::errors::{Error, Result};
use crate::storage::is_plain_file_name;
use crate::tryon::TryOnError;

/// Seed range offered by the detail form.
const SEED_RANGE: (i64, i64) = (0, 1000);
/// Step range offered by the detail form.
const STEPS_RANGE: (u32, u32) = (10, 50);

/// Compiled page templates.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> std::result::Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("base.html", include_str!("templates/base.html"))?;
        env.add_template("home.html", include_str!("templates/home.html"))?;
        env.add_template("detail.html", include_str!("templates/detail.html"))?;
        Ok(Self { env })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<Html<String>> {
        Ok(Html(self.env.get_template(name)?.render(ctx)?))
    }
}

#[derive(Debug, Serialize)]
struct ProductCard {
    id: String,
    name: String,
    price: String,
    image: String,
    category: String,
}

impl ProductCard {
    fn new(catalog: &Catalog, product: &Product) -> Self {
        Self {
            id: product.id.clone(),
            name: product.name.clone(),
            price: format_price(product.price),
            image: catalog.image_path(product),
            category: format!("{:?}", product.category),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DetailQuery {
    pub result: Option<String>,
}

#[instrument(skip_all)]
pub async fn home(State(state): State<AppState>) -> Result<Html<String>> {
    let catalog = state.catalog();
    let products: Vec<_> = catalog.products().iter().map(|p| ProductCard::new(catalog, p)).collect();
    state.templates.render("home.html", context! { products })
}

#[instrument(skip(state, query))]
pub async fn product_detail(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
    Query(query): Query<DetailQuery>,
) -> Result<Response> {
    let Some(product) = state.catalog().find(&product_id) else {
        return Ok(Redirect::to("/").into_response());
    };

    let result_image = query
        .result
        .filter(|name| is_result_name(name))
        .map(|name| state.catalog().local_path(&["results", &name]));

    Ok(render_detail(&state, product, result_image, None)?.into_response())
}

#[instrument(skip(state, multipart))]
pub async fn submit_try_on(State(state): State<AppState>, Path(product_id): Path<String>, multipart: Multipart) -> Result<Response> {
    let Some(product) = state.catalog().find(&product_id) else {
        return Ok(Redirect::to("/").into_response());
    };

    let parsed = TryOnForm::from_multipart(multipart)
        .await
        .and_then(|form| form.into_request(Some(product.id.clone()), state.try_on.settings()));
    let request = match parsed {
        Ok(request) => request,
        Err(Error::BadRequest { message }) => {
            debug!(message = %message, "Rejected try-on form");
            let page = render_detail(&state, product, None, Some(message))?;
            return Ok((StatusCode::BAD_REQUEST, page).into_response());
        }
        Err(e) => return Err(e),
    };

    match state.try_on.perform(request).await {
        Ok(result) => {
            let query: String = url::form_urlencoded::Serializer::new(String::new())
                .append_pair("result", &result.file_name)
                .finish();
            let location = format!("{}?{query}", state.catalog().local_path(&["products", &product.id]));
            Ok(Redirect::to(&location).into_response())
        }
        Err(TryOnError::ProductNotFound { .. }) => Ok(Redirect::to("/").into_response()),
        Err(e) => {
            warn!(kind = ?e.kind(), error = %e, "Try-on failed");
            Ok(render_detail(&state, product, None, Some(e.to_string()))?.into_response())
        }
    }
}

/// Result names are generated by the file store and only use `[A-Za-z0-9._-]`. They are rendered
/// unescaped inside attributes, so anything else is dropped.
fn is_result_name(name: &str) -> bool {
    is_plain_file_name(name) && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

fn render_detail(state: &AppState, product: &Product, result_image: Option<String>, error: Option<String>) -> Result<Html<String>> {
    let catalog = state.catalog();
    let settings = state.try_on.settings();
    state.templates.render(
        "detail.html",
        context! {
            product => ProductCard::new(catalog, product),
            action => catalog.local_path(&["products", &product.id, "try-on"]),
            result_image,
            error,
            seed => context! { min => SEED_RANGE.0, max => SEED_RANGE.1, default => settings.default_seed },
            steps => context! {
                min => STEPS_RANGE.0,
                max => STEPS_RANGE.1.min(settings.max_steps),
                default => settings.default_steps,
            },
        },
    )
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{FakeModel, create_test_app, create_test_config};
    use axum::http::StatusCode;
    use axum_test::multipart::{MultipartForm, Part};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn photo() -> Part {
        Part::bytes(b"person photo".to_vec()).file_name("me.jpg").mime_type("image/jpeg")
    }

    #[test]
    fn test_templates_compile() {
        super::Templates::new().unwrap();
    }

    #[test]
    fn test_is_result_name() {
        assert!(super::is_result_name("result_hoodie_basic_20250101120000_0123456789ab.webp"));
        assert!(!super::is_result_name("../config.yaml"));
        assert!(!super::is_result_name("a\"onerror=\"x.webp"));
        assert!(!super::is_result_name(".."));
    }

    #[tokio::test]
    async fn test_home_lists_products() {
        let root = TempDir::new().unwrap();
        let (server, _bg) = create_test_app(create_test_config(root.path()), Arc::new(FakeModel::succeeding())).await;

        let response = server.get("/").await;
        response.assert_status_ok();
        let html = response.text();
        assert!(html.contains("/products/hoodie_basic"));
        assert!(html.contains("189,000"));
        assert!(html.contains("/static/%EB%A7%A8%ED%88%AC%EB%A7%A81.jpg"));
    }

    #[tokio::test]
    async fn test_detail_page() {
        let root = TempDir::new().unwrap();
        let (server, _bg) = create_test_app(create_test_config(root.path()), Arc::new(FakeModel::succeeding())).await;

        let html = server.get("/products/jacket_minimal").await.text();
        assert!(html.contains("미니멀 울 자켓 (블랙)"));
        assert!(html.contains("action=\"/products/jacket_minimal/try-on\""));
        assert!(html.contains("value=\"42\""));
        assert!(html.contains("value=\"30\""));
        assert!(!html.contains("<img class=\"result\""));

        let html = server
            .get("/products/jacket_minimal")
            .add_query_param("result", "result_jacket_minimal_x.webp")
            .await
            .text();
        assert!(html.contains("src=\"/results/result_jacket_minimal_x.webp\""));

        // Path traversal in the result parameter is ignored
        let html = server
            .get("/products/jacket_minimal")
            .add_query_param("result", "../config.yaml")
            .await
            .text();
        assert!(!html.contains("config.yaml"));
    }

    #[tokio::test]
    async fn test_unknown_product_redirects_home() {
        let root = TempDir::new().unwrap();
        let (server, _bg) = create_test_app(create_test_config(root.path()), Arc::new(FakeModel::succeeding())).await;

        let response = server.get("/products/nonexistent").await;
        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.header("location"), "/");
    }

    #[tokio::test]
    async fn test_submit_redirects_to_result() {
        let root = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::succeeding());
        let (server, _bg) = create_test_app(create_test_config(root.path()), model.clone()).await;

        let form = MultipartForm::new()
            .add_text("seed", "7")
            .add_text("steps", "15")
            .add_part("person_image", photo());
        let response = server.post("/products/mtm_navy/try-on").multipart(form).await;

        response.assert_status(StatusCode::SEE_OTHER);
        let location = response.header("location");
        let location = location.to_str().unwrap();
        assert!(location.starts_with("/products/mtm_navy?result=result_mtm_navy_"));

        let input = model.last_input().unwrap();
        assert_eq!(input.seed, 7);
        assert_eq!(input.denoise_steps, 15);
    }

    #[tokio::test]
    async fn test_submit_failure_renders_error() {
        let root = TempDir::new().unwrap();
        let (server, _bg) = create_test_app(create_test_config(root.path()), Arc::new(FakeModel::failing("GPU quota exceeded"))).await;

        let form = MultipartForm::new().add_part("person_image", photo());
        let response = server.post("/products/hoodie_basic/try-on").multipart(form).await;

        response.assert_status_ok();
        assert!(response.text().contains("GPU quota exceeded"));
    }

    #[tokio::test]
    async fn test_submit_invalid_form_renders_detail_page() {
        let root = TempDir::new().unwrap();
        let model = Arc::new(FakeModel::succeeding());
        let (server, _bg) = create_test_app(create_test_config(root.path()), model.clone()).await;

        let response = server
            .post("/products/hoodie_basic/try-on")
            .multipart(MultipartForm::new().add_text("seed", "7"))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let html = response.text();
        assert!(html.contains("<p class=\"error\">person_image is required</p>"));
        assert!(html.contains("action=\"/products/hoodie_basic/try-on\""));

        let form = MultipartForm::new().add_text("steps", "0").add_part("person_image", photo());
        let response = server.post("/products/hoodie_basic/try-on").multipart(form).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.text().contains("steps must be between 1 and 100"));

        assert_eq!(model.calls(), 0);
    }
}
