//! Settings files.
//!
//! A settings file is a JSON document with a `connection` and a `pool`
//! section; every field is optional and falls back to its default:
//!
//! ```json
//! {
//!   "connection": { "host": "db.internal", "port": 5432, "database": "orders" },
//!   "pool": { "min_connections": 2, "max_connections": 16 }
//! }
//! ```

use crate::config::PoolConfig;
use serde::Deserialize;
use sqlscope_core::{ConfigError, ConnectionConfig, Error, Result};
use std::path::Path;

/// Everything needed to build a pool: where to connect and how many connections to keep.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Connection target handed to the connection factory
    pub connection: ConnectionConfig,
    /// Pool sizing and lifecycle
    pub pool: PoolConfig,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&raw).map_err(|e| match e {
            Error::Config(cfg) => Error::Config(ConfigError {
                message: format!("{}: {}", path.display(), cfg.message),
                source: cfg.source,
            }),
            other => other,
        })?;
        tracing::debug!(
            path = %path.display(),
            target = %settings.connection.target(),
            max_connections = settings.pool.max_connections,
            "loaded settings"
        );
        Ok(settings)
    }

    /// Parse settings from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(raw).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid settings: {e}"),
                source: Some(Box::new(e)),
            })
        })?;
        settings.pool.validate()?;
        Ok(settings)
    }
}
