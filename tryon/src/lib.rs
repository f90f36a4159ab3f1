//! # tryon: virtual try-on storefront service
//!
//! `tryon` serves a small clothing catalog and lets shoppers see a garment on a photo of
//! themselves. Try-ons are delegated to a hosted image model (IDM-VTON on a Hugging Face Space by
//! default), and the generated images are kept on local disk and served back over HTTP.
//!
//! ## Architecture
//!
//! - **[`catalog`]**: immutable product records and image URL rendering
//! - **[`tryon`]**: the orchestrator that runs one try-on end to end
//! - **[`inference`]**: the [`TryOnModel`](inference::TryOnModel) seam and its Gradio client
//! - **[`storage`]**: scratch uploads, result promotion and retention sweeps
//! - **[`api`]**: JSON endpoints under `/api`
//! - **[`ui`]**: server-rendered pages for browsers
//!
//! Request flow for `POST /api/try-on`:
//!
//! ```text
//! multipart form -> TryOnForm -> TryOnService::perform
//!     -> catalog lookup -> garment check -> scratch write
//!     -> TryOnModel::predict -> move into results/ -> result URL
//! ```
//!
//! ## Configuration
//!
//! See [`config`] for the YAML file layout and environment overrides. `BASE_URL`, `FRONTEND_URL`
//! and `HF_TOKEN` are honoured for deployment compatibility.
//!
//! ## Running
//!
//! ```bash
//! tryon -f config.yaml
//! tryon --validate   # check configuration and exit
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod inference;
mod openapi;
pub mod retention;
pub mod storage;
pub mod telemetry;
#[cfg(test)]
mod test_utils;
pub mod tryon;
pub mod ui;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument, warn};
use utoipa::OpenApi;

pub use config::Config;

use crate::{
    api::handlers::{products, try_on},
    catalog::Catalog,
    config::CorsOrigin,
    inference::{GradioClient, TryOnModel},
    openapi::ApiDoc,
    storage::FileStore,
    tryon::TryOnService,
    ui::Templates,
};

/// Shared state for all handlers.
///
/// Everything here is immutable after startup, so handlers share it without locking.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .try_on(Arc::new(service))
///     .templates(Arc::new(Templates::new()?))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub try_on: Arc<TryOnService>,
    pub templates: Arc<Templates>,
}

impl AppState {
    pub fn catalog(&self) -> &Catalog {
        self.try_on.catalog()
    }
}

/// Build the CORS layer.
///
/// `frontend_url` is always allowed. A `*` entry allows every origin; with credentials enabled the
/// request origin is mirrored instead, since browsers reject `*` on credentialed requests.
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.contains(&CorsOrigin::Wildcard) {
        if cors_config.allow_credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        let mut origins = Vec::new();
        let urls = cors_config.allowed_origins.iter().filter_map(|origin| match origin {
            CorsOrigin::Url(url) => Some(url),
            CorsOrigin::Wildcard => None,
        });
        for url in urls.chain(std::iter::once(&config.frontend_url)) {
            let header_value = url.origin().ascii_serialization().parse::<HeaderValue>()?;
            if !origins.contains(&header_value) {
                origins.push(header_value);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(cors_config.allow_credentials)
        .expose_headers(vec![http::header::LOCATION]);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `/api/*`: JSON API and its OpenAPI document
/// - `/`, `/products/*`: HTML pages
/// - `/static/*`, `/results/*`: garment and generated images
/// - `/healthz`: liveness probe
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let config = &state.config;

    let api_routes = Router::new()
        .route("/api/products", get(products::list_products))
        .route("/api/products/{product_id}", get(products::get_product))
        .route("/api/try-on", post(try_on::try_on))
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }));

    let ui_routes = Router::new()
        .route("/", get(ui::home))
        .route("/products/{product_id}", get(ui::product_detail))
        .route("/products/{product_id}/try-on", post(ui::submit_try_on));

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .merge(api_routes)
        .merge(ui_routes)
        .nest_service("/static", ServeDir::new(&config.storage.static_dir))
        .nest_service("/results", ServeDir::new(&config.storage.results_dir))
        .layer(DefaultBodyLimit::max(config.limits.max_upload_size))
        .with_state(state.clone());

    let cors_layer = create_cors_layer(config)?;
    let router = router.layer(cors_layer).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// Currently only the result retention sweeper, which is started when `results.retention` is set.
/// Dropping this struct cancels the shutdown token through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    fn start(store: FileStore, config: &Config) -> Self {
        let shutdown_token = CancellationToken::new();
        let background_tasks = retention::spawn_sweeper(store, &config.results, shutdown_token.clone())
            .into_iter()
            .collect();

        Self {
            background_tasks,
            drop_guard: Some(shutdown_token.clone().drop_guard()),
            shutdown_token,
        }
    }

    pub fn task_count(&self) -> usize {
        self.background_tasks.len()
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// The assembled service: router plus background tasks.
///
/// 1. **Create**: [`Application::new`] prepares directories, connects the model client and builds
///    the router
/// 2. **Serve**: [`Application::serve`] binds the configured address and handles requests
/// 3. **Shutdown**: when the shutdown future resolves, in-flight requests drain and background
///    tasks stop
pub struct Application {
    router: Router,
    config: Config,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create an application talking to the configured Gradio Space.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let model = GradioClient::new(&config.inference, &config.storage.scratch_dir).context("Failed to create inference client")?;
        Self::with_model(config, Arc::new(model)).await
    }

    /// Create an application backed by the given model.
    pub async fn with_model(config: Config, model: Arc<dyn TryOnModel>) -> anyhow::Result<Self> {
        info!(
            base_url = %config.base_url,
            frontend_url = %config.frontend_url,
            products = config.products.len(),
            "Starting try-on service"
        );

        let store = FileStore::new(&config.storage);
        store.ensure_dirs().await.context("Failed to create storage directories")?;

        for product in &config.products {
            if !store.garment_exists(&product.file_name).await {
                warn!(
                    product_id = %product.id,
                    path = %store.garment_path(&product.file_name).display(),
                    "Garment image missing, try-ons for this product will fail"
                );
            }
        }

        let catalog = Arc::new(Catalog::new(config.products.clone(), config.base_url.clone(), config.image_urls));
        let service = TryOnService::new(catalog, store.clone(), model, config.try_on.clone(), config.base_url.clone());
        let templates = Templates::new().context("Failed to compile page templates")?;

        let app_state = AppState::builder()
            .config(config.clone())
            .try_on(Arc::new(service))
            .templates(Arc::new(templates))
            .build();

        let router = build_router(&app_state)?;
        let bg_services = BackgroundServices::start(store, &config);

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Try-on service listening on http://{}, public URL {}", bind_addr, self.config.base_url);

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Stopping background services...");
        self.bg_services.shutdown().await;

        Ok(())
    }
}
