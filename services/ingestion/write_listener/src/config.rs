//! Write listener configuration
//!
//! Loaded from an optional TOML file, then overridden by `WRITE_LISTENER_*`
//! environment variables (nested keys use `__`), e.g.
//! `WRITE_LISTENER_MAX_UNDELIVERED_METRICS=10000`.

use crate::error::{ListenerError, Result};
use anyhow::Context;
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "WRITE_LISTENER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteListenerConfig {
    /// Address to listen on, e.g. `0.0.0.0:8086`
    pub service_address: String,

    /// PEM certificate chain; enables TLS together with `tls_key`
    pub tls_cert: Option<PathBuf>,

    /// PEM private key
    pub tls_key: Option<PathBuf>,

    /// CA files used to verify client certificates; non-empty requires client auth
    pub tls_allowed_cacerts: Vec<PathBuf>,

    /// Maximum wait for each chunk of a request body
    pub read_timeout_secs: u64,

    /// Maximum wait for the downstream hand-off of one record
    pub write_timeout_secs: u64,

    /// Maximum request body size in bytes, measured before decompression
    pub max_body_size: u64,

    /// Tag set from the `bucket` query parameter; empty disables it
    pub bucket_tag: String,

    /// When set, requests must carry `Authorization: Token <token>`
    pub token: Option<String>,

    /// Ceiling on records handed downstream but not yet acknowledged; 0 is unbounded
    pub max_undelivered_metrics: usize,

    /// How long `stop()` waits for in-flight connections
    pub shutdown_timeout_secs: u64,
}

impl Default for WriteListenerConfig {
    fn default() -> Self {
        Self {
            service_address: "0.0.0.0:8086".to_string(),
            tls_cert: None,
            tls_key: None,
            tls_allowed_cacerts: Vec::new(),
            read_timeout_secs: 10,
            write_timeout_secs: 10,
            max_body_size: 32 * 1024 * 1024,
            bucket_tag: String::new(),
            token: None,
            max_undelivered_metrics: 0,
            shutdown_timeout_secs: 1,
        }
    }
}

impl WriteListenerConfig {
    /// Load from an optional TOML file with environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading write listener config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("tls_allowed_cacerts")
                .try_parsing(true),
        );

        let config: WriteListenerConfig = builder
            .build()
            .context("Failed to build write listener configuration")?
            .try_deserialize()
            .context("Failed to deserialize write listener configuration")?;

        config.validate()?;
        debug!(?config, "write listener configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_address.is_empty() {
            return Err(configuration("service_address must not be empty"));
        }
        if self.max_body_size == 0 {
            return Err(configuration("max_body_size must be greater than zero"));
        }
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 {
            return Err(configuration("read and write timeouts must be greater than zero"));
        }
        match (&self.tls_cert, &self.tls_key) {
            (Some(_), None) => return Err(configuration("tls_cert is set without tls_key")),
            (None, Some(_)) => return Err(configuration("tls_key is set without tls_cert")),
            _ => {}
        }
        if !self.tls_allowed_cacerts.is_empty() && !self.tls_enabled() {
            return Err(configuration(
                "tls_allowed_cacerts requires tls_cert and tls_key",
            ));
        }
        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Configured token, treating an empty string as no token
    pub fn auth_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }
}

fn configuration(message: &str) -> ListenerError {
    ListenerError::Configuration {
        message: message.to_string(),
    }
}
