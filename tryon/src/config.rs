//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `TRYON_CONFIG`
//! environment variable. A missing file is not an error: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `TRYON_` override YAML values
//! 3. **Deployment variables** - `BASE_URL`, `FRONTEND_URL` and `HF_TOKEN` set the public base
//!    URL, the extra CORS origin and the inference token respectively
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `TRYON_INFERENCE__SPACE=owner/space` sets the `inference.space` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Public URL used to build image and result links
//! BASE_URL="https://tryon.example.com"
//!
//! # Allow the storefront frontend to call the API
//! FRONTEND_URL="https://shop.example.com"
//!
//! # Authenticate against the hosted model (anonymous when unset)
//! HF_TOKEN="hf_..."
//!
//! # Keep generated images for a week
//! TRYON_RESULTS__RETENTION=7d
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, path::PathBuf, time::Duration};
use url::Url;

use crate::catalog::{ImageUrlMode, Product, default_products};
use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "TRYON_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Public base URL used to build absolute image and result links
    pub base_url: Url,
    /// URL of the storefront frontend; always added to the CORS allow-list
    pub frontend_url: Url,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
    /// On-disk layout
    pub storage: StorageConfig,
    /// Result image retention
    pub results: ResultsConfig,
    /// How product images are referenced in `/api/products`
    pub image_urls: ImageUrlMode,
    /// Hosted try-on model
    pub inference: InferenceConfig,
    /// Try-on request defaults and fixed model inputs
    pub try_on: TryOnConfig,
    /// Request size limits
    pub limits: LimitsConfig,
    /// Product catalog, in display order
    pub products: Vec<Product>,
}

/// Directories used by the service. Relative paths resolve against the working directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Garment images, served under `/static`
    pub static_dir: PathBuf,
    /// Generated images, served under `/results`
    pub results_dir: PathBuf,
    /// Scratch space for uploads and downloaded model outputs
    pub scratch_dir: PathBuf,
}

/// Result image retention.
///
/// Results are kept indefinitely unless `retention` is set, in which case a background task
/// deletes result files older than `retention` every `sweep_interval`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResultsConfig {
    #[serde(with = "humantime_serde")]
    pub retention: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

/// Hosted model connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceConfig {
    /// Hugging Face Space id (`owner/name`) hosting the Gradio app
    pub space: String,
    /// Explicit Gradio app URL; overrides the URL derived from `space`
    pub endpoint_url: Option<Url>,
    /// Gradio endpoint name
    pub api_name: String,
    /// Route prefix of the app's HTTP API (`/gradio_api` on Gradio 5, empty on Gradio 4).
    /// Read from the app's `/config` when unset.
    pub api_prefix: Option<String>,
    /// Bearer token for the Space. Anonymous access when unset.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Overall timeout per HTTP request to the Space. No timeout when unset.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
}

/// Defaults for try-on requests and the fixed inputs sent to the model.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TryOnConfig {
    /// Seed used when the request does not specify one
    pub default_seed: i64,
    /// Denoising steps used when the request does not specify them
    pub default_steps: u32,
    /// Upper bound for requested denoising steps
    pub max_steps: u32,
    /// Text description of the garment passed to the model
    pub garment_description: String,
    /// Let the model detect the garment region automatically
    pub auto_mask: bool,
    /// Let the model crop the person image before compositing
    pub auto_crop: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum request body size for uploads, in bytes
    pub max_upload_size: usize,
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests. `frontend_url` is always appended.
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard", serialize_with = "serialize_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn serialize_wildcard<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("*")
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_url: Url::parse("http://localhost:8000").expect("valid default URL"),
            frontend_url: Url::parse("http://localhost:3000").expect("valid default URL"),
            cors: CorsConfig::default(),
            storage: StorageConfig::default(),
            results: ResultsConfig::default(),
            image_urls: ImageUrlMode::default(),
            inference: InferenceConfig::default(),
            try_on: TryOnConfig::default(),
            limits: LimitsConfig::default(),
            products: default_products(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("static"),
            results_dir: PathBuf::from("results"),
            scratch_dir: PathBuf::from("."),
        }
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            retention: None,
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            space: "yisol/IDM-VTON".to_string(),
            endpoint_url: None,
            api_name: "/tryon".to_string(),
            api_prefix: None,
            token: None,
            request_timeout: None,
        }
    }
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self {
            default_seed: 42,
            default_steps: 30,
            max_steps: 100,
            garment_description: "A cool fashion item".to_string(),
            auto_mask: true,
            auto_crop: false,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 20 * 1024 * 1024, // 20 MiB
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                CorsOrigin::Url(Url::parse("http://localhost:3000").expect("valid default URL")),
                CorsOrigin::Wildcard,
            ],
            allow_credentials: true,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        for (name, url) in [("base_url", &self.base_url), ("frontend_url", &self.frontend_url)] {
            if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
                return Err(invalid(format!("{name} must be an http(s) URL, got '{url}'")));
            }
        }

        let mut ids = HashSet::new();
        for product in &self.products {
            if !is_valid_product_id(&product.id) {
                return Err(invalid(format!(
                    "product id '{}' must be non-empty and contain only ASCII letters, digits, '-' or '_'",
                    product.id
                )));
            }
            if !ids.insert(product.id.as_str()) {
                return Err(invalid(format!("duplicate product id '{}'", product.id)));
            }
            if !crate::storage::is_plain_file_name(&product.file_name) {
                return Err(invalid(format!(
                    "product '{}' has invalid file_name '{}': expected a bare file name",
                    product.id, product.file_name
                )));
            }
        }

        if self.try_on.default_steps == 0 || self.try_on.default_steps > self.try_on.max_steps {
            return Err(invalid(format!(
                "try_on.default_steps ({}) must be between 1 and try_on.max_steps ({})",
                self.try_on.default_steps, self.try_on.max_steps
            )));
        }

        if self.limits.max_upload_size == 0 {
            return Err(invalid("limits.max_upload_size must be greater than 0".to_string()));
        }

        if self.results.retention.is_some() && self.results.sweep_interval.is_zero() {
            return Err(invalid(
                "results.sweep_interval must be greater than 0 when results.retention is set".to_string(),
            ));
        }

        if self.inference.endpoint_url.is_none() && !self.inference.space.contains('/') {
            return Err(invalid(format!(
                "inference.space '{}' must look like 'owner/name' when inference.endpoint_url is unset",
                self.inference.space
            )));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("TRYON_").ignore(&["config"]).split("__"))
            // Deployment variables shared with the storefront frontend
            .merge(Env::raw().only(&["BASE_URL", "FRONTEND_URL"]))
            .merge(Env::raw().only(&["HF_TOKEN"]).map(|_| "inference.token".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(message: String) -> Error {
    Error::Internal {
        operation: format!("validate config: {message}"),
    }
}

fn is_valid_product_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use figment::Jail;

    fn args(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_defaults_without_config_file() {
        Jail::expect_with(|_jail| {
            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.port, 8000);
            assert_eq!(config.base_url.as_str(), "http://localhost:8000/");
            assert_eq!(config.frontend_url.as_str(), "http://localhost:3000/");
            assert_eq!(config.products.len(), 11);
            assert_eq!(config.try_on.default_seed, 42);
            assert_eq!(config.try_on.default_steps, 30);
            assert_eq!(config.try_on.garment_description, "A cool fashion item");
            assert!(config.try_on.auto_mask);
            assert!(!config.try_on.auto_crop);
            assert_eq!(config.inference.space, "yisol/IDM-VTON");
            assert_eq!(config.inference.api_name, "/tryon");
            assert!(config.results.retention.is_none());
            assert!(config.cors.allowed_origins.contains(&CorsOrigin::Wildcard));

            Ok(())
        });
    }

    #[test]
    fn test_deployment_env_vars() {
        Jail::expect_with(|jail| {
            jail.set_env("BASE_URL", "https://tryon.example.com");
            jail.set_env("FRONTEND_URL", "https://shop.example.com");
            jail.set_env("HF_TOKEN", "hf_secret");

            let config = Config::load(&args("missing.yaml"))?;

            assert_eq!(config.base_url.as_str(), "https://tryon.example.com/");
            assert_eq!(config.frontend_url.as_str(), "https://shop.example.com/");
            assert_eq!(config.inference.token.as_deref(), Some("hf_secret"));

            Ok(())
        });
    }

    #[test]
    fn test_yaml_and_prefixed_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
port: 9000
image_urls: relative
storage:
  static_dir: /srv/static
results:
  retention: 7d
  sweep_interval: 10m
inference:
  endpoint_url: http://gradio.internal:7860
  request_timeout: 2m
products:
  - id: tee_white
    name: White Tee
    price: 19000
    category: Top
    file_name: tee.png
"#,
            )?;
            jail.set_env("TRYON_PORT", "9100");
            jail.set_env("TRYON_TRY_ON__DEFAULT_STEPS", "25");
            jail.set_env("TRYON_CONFIG", "test.yaml");

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.port, 9100);
            assert_eq!(config.image_urls, ImageUrlMode::Relative);
            assert_eq!(config.storage.static_dir, PathBuf::from("/srv/static"));
            assert_eq!(config.storage.results_dir, PathBuf::from("results")); // still default
            assert_eq!(config.results.retention, Some(Duration::from_secs(7 * 24 * 60 * 60)));
            assert_eq!(config.results.sweep_interval, Duration::from_secs(600));
            assert_eq!(
                config.inference.endpoint_url.as_ref().map(Url::as_str),
                Some("http://gradio.internal:7860/")
            );
            assert_eq!(config.inference.request_timeout, Some(Duration::from_secs(120)));
            assert_eq!(config.try_on.default_steps, 25);
            assert_eq!(config.products.len(), 1);
            assert_eq!(config.products[0].category, Category::Top);

            Ok(())
        });
    }

    #[test]
    fn test_cors_origins_from_yaml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
cors:
  allowed_origins:
    - "*"
    - https://app.example.com
  allow_credentials: false
"#,
            )?;

            let config = Config::load(&args("test.yaml"))?;

            assert_eq!(config.cors.allowed_origins.len(), 2);
            assert_eq!(config.cors.allowed_origins[0], CorsOrigin::Wildcard);
            assert_eq!(
                config.cors.allowed_origins[1],
                CorsOrigin::Url(Url::parse("https://app.example.com").unwrap())
            );
            assert!(!config.cors.allow_credentials);

            Ok(())
        });
    }

    #[test]
    fn test_unknown_field_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "colour: blue\n")?;
            assert!(Config::load(&args("test.yaml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_duplicate_product_ids() {
        let mut config = Config::default();
        let duplicate = config.products[0].clone();
        config.products.push(duplicate);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate product id 'hoodie_basic'"));
    }

    #[test]
    fn test_validation_rejects_path_in_file_name() {
        let mut config = Config::default();
        config.products[0].file_name = "../secrets.png".to_string();
        assert!(config.validate().is_err());

        config.products[0].file_name = "nested/hoodie.png".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unsafe_product_id() {
        let mut config = Config::default();
        config.products[0].id = "hoodie basic".to_string();
        assert!(config.validate().is_err());

        config.products[0].id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_steps() {
        let mut config = Config::default();
        config.try_on.default_steps = 0;
        assert!(config.validate().is_err());

        config.try_on.default_steps = 200;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_sweep_interval_with_retention() {
        let mut config = Config::default();
        config.results.sweep_interval = Duration::ZERO;
        assert!(config.validate().is_ok());

        config.results.retention = Some(Duration::from_secs(60));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_requires_space_or_endpoint() {
        let mut config = Config::default();
        config.inference.space = "not-a-space".to_string();
        assert!(config.validate().is_err());

        config.inference.endpoint_url = Some(Url::parse("http://localhost:7860").unwrap());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
