//! Centralized configuration management.
//!
//! All configuration is loaded from environment variables at startup.
//! This provides a single source of truth and fails fast if required config is missing.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::{ModelConfig, ProviderKind, RerankerConfig};

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub observability: ObservabilityConfig,
    pub llm: ModelConfig,
    pub embedding: ModelConfig,
    pub vision: Option<ModelConfig>,
    pub reranker: Option<RerankerConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    pub shutdown_timeout_secs: u64,
}

/// Filesystem layout configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Retriever state and parsed-document by-products.
    pub working_dir: PathBuf,
    /// User uploads, `.trash/` and `query_images/` live here.
    pub upload_dir: PathBuf,
    /// Single-file catalog database; parent directory is auto-created.
    pub catalog_db_path: PathBuf,
}

/// Background indexing configuration
#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub enabled: bool,
    /// Seconds between reconciliation iterations.
    pub scan_interval: Duration,
    /// Max files dispatched into processing per iteration.
    pub max_files_per_batch: usize,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub service_name: String,
    pub log_format: LogFormat,
}

/// Log format type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl AppConfig {
    /// Load the complete configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let llm = ModelConfig::from_env("LLM", ProviderKind::Llm)
            .context("loading LLM model configuration")?;
        let embedding = ModelConfig::from_env("EMBEDDING", ProviderKind::Embedding)
            .context("loading embedding model configuration")?;

        let vision = if env::var("VISION_MODEL_NAME").is_ok() {
            Some(
                ModelConfig::from_env("VISION", ProviderKind::Vision)
                    .context("loading vision model configuration")?,
            )
        } else {
            None
        };

        let reranker = match RerankerConfig::from_env()? {
            config if config.enabled => Some(config),
            _ => None,
        };

        Ok(Self {
            server: ServerConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            indexing: IndexingConfig::from_env()?,
            observability: ObservabilityConfig::from_env(),
            llm,
            embedding,
            vision,
            reranker,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port = env::var("API_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .context("API_PORT must be a valid port number")?;

        let cors_allowed_origins = env::var("CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            hostname: env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            cors_allowed_origins,
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        })
    }
}

impl StorageConfig {
    fn from_env() -> Result<Self> {
        let working_dir =
            absolute(env::var("WORKING_DIR").unwrap_or_else(|_| "./rag_storage".to_string()))?;
        let upload_dir =
            absolute(env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()))?;
        let catalog_db_path = absolute(
            env::var("CATALOG_DB_PATH").unwrap_or_else(|_| "./data/index_status.db".to_string()),
        )?;

        Ok(Self {
            working_dir,
            upload_dir,
            catalog_db_path,
        })
    }
}

impl IndexingConfig {
    fn from_env() -> Result<Self> {
        let scan_interval_secs = env::var("INDEXING_SCAN_INTERVAL")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("INDEXING_SCAN_INTERVAL must be an integer number of seconds")?;

        let max_files_per_batch = env::var("INDEXING_MAX_FILES_PER_BATCH")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<usize>()
            .context("INDEXING_MAX_FILES_PER_BATCH must be a positive integer")?;

        Ok(Self {
            enabled: env::var("AUTO_INDEXING_ENABLED")
                .map(|v| v.to_lowercase() != "false")
                .unwrap_or(true),
            scan_interval: Duration::from_secs(scan_interval_secs),
            max_files_per_batch,
        })
    }
}

impl ObservabilityConfig {
    fn from_env() -> Self {
        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "pretty".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "mica".to_string()),
            log_format,
        }
    }
}

fn absolute(path: String) -> Result<PathBuf> {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = env::current_dir().context("resolving current directory")?;
    Ok(cwd.join(path))
}
