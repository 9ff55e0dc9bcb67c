//! Trawler: a distributed web-crawling agent
//!
//! Multiple independent agent processes cooperatively drain a shared,
//! durable work queue of URLs, fetch and deduplicate content, expand the
//! frontier with discovered links, and hand content to a plugin pipeline,
//! while honoring per-domain and per-pattern cooldowns. Each running agent
//! exposes a control plane for live reconfiguration and introspection.

pub mod agent;
pub mod config;
pub mod context;
pub mod control;
pub mod frontier;
pub mod plugins;
pub mod runfiles;
pub mod store;

use thiserror::Error;

/// Main error type for trawler operations
#[derive(Debug, Error)]
pub enum TrawlerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Another agent is already running for id {id} (pid {pid})")]
    AlreadyRunning { id: String, pid: u32 },

    #[error("Stale pid file for id {id}: no process {pid} found")]
    StaleLock { id: String, pid: u32 },

    #[error("TLS validation failed for {url}; pass verify=false to retry without verification")]
    TlsVerification { url: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Plugin error: {0}")]
    Plugin(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid header line: {0}")]
    InvalidHeader(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for trawler operations
pub type Result<T> = std::result::Result<T, TrawlerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{AgentConfig, SharedConfig};
pub use context::Context;
pub use store::Store;
