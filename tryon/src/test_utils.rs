//! Test utilities shared by unit and handler tests.

use async_trait::async_trait;
use axum_test::TestServer;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::catalog::Product;
use crate::config::{Config, StorageConfig};
use crate::inference::{GeneratedImage, InferenceError, TryOnInput, TryOnModel};
use crate::storage::FileStore;

/// Install the process-wide rustls provider. Required before building a `reqwest::Client`.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Configuration rooted in `root`, with garment images for every default product on disk.
pub fn create_test_config(root: &Path) -> Config {
    let config = Config {
        storage: StorageConfig {
            static_dir: root.join("static"),
            results_dir: root.join("results"),
            scratch_dir: root.join("scratch"),
        },
        ..Config::default()
    };

    let store = FileStore::new(&config.storage);
    for dir in [store.static_dir(), store.results_dir(), store.scratch_dir()] {
        std::fs::create_dir_all(dir).expect("Failed to create test directory");
    }
    seed_garments(&store, &config.products);
    config
}

/// Write a placeholder image for each product into the static directory.
pub fn seed_garments(store: &FileStore, products: &[Product]) {
    for product in products {
        std::fs::write(store.garment_path(&product.file_name), b"garment").expect("Failed to write garment image");
    }
}

pub async fn create_test_app(config: Config, model: Arc<dyn TryOnModel>) -> (TestServer, crate::BackgroundServices) {
    let app = crate::Application::with_model(config, model)
        .await
        .expect("Failed to create application");
    app.into_test_server()
}

enum Behavior {
    Succeed,
    Fail(String),
}

/// In-process stand-in for the hosted model.
///
/// On success it writes a generated image next to the person photo and returns it, like the
/// Gradio client does with its scratch downloads.
pub struct FakeModel {
    behavior: Behavior,
    calls: AtomicUsize,
    last_input: Mutex<Option<TryOnInput>>,
    person_bytes: Mutex<Option<Vec<u8>>>,
}

impl FakeModel {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_input: Mutex::new(None),
            person_bytes: Mutex::new(None),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behavior::Succeed)
    }

    pub fn failing(message: &str) -> Self {
        Self::new(Behavior::Fail(message.to_string()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<TryOnInput> {
        self.last_input.lock().unwrap().clone()
    }

    /// Contents of the person photo as seen during the last call.
    pub fn person_bytes(&self) -> Option<Vec<u8>> {
        self.person_bytes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TryOnModel for FakeModel {
    async fn predict(&self, input: TryOnInput) -> Result<GeneratedImage, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.person_bytes.lock().unwrap() = std::fs::read(&input.person_image).ok();
        *self.last_input.lock().unwrap() = Some(input.clone());

        match &self.behavior {
            Behavior::Fail(message) => Err(InferenceError::Remote { message: message.clone() }),
            Behavior::Succeed => {
                let dir = input.person_image.parent().unwrap_or(Path::new("."));
                let path = dir.join(format!("fake_{}.webp", Uuid::new_v4().simple()));
                tokio::fs::write(&path, b"generated image").await?;
                Ok(GeneratedImage { path })
            }
        }
    }
}
