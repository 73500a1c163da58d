//! Probe configuration.
//!
//! Config file lives at `~/.config/urlbind/probe.toml`. It lists the
//! resources the `mem:` handler serves and the simulated I/O latency.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Path served when no config file exists.
pub const DEFAULT_PATH: &str = "/hello";
/// Latency between simulated network steps.
pub const DEFAULT_LATENCY_MS: u64 = 5;

/// One resource served by the `mem:` handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Path part of the URL, e.g. `/hello` for `mem:/hello`.
    pub path: String,
    pub body: String,
    /// Defaults to `text/plain`.
    pub mime: Option<String>,
}

impl ResourceConfig {
    pub fn mime(&self) -> &str {
        self.mime.as_deref().unwrap_or("text/plain")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProbeConfig {
    /// Delay between simulated network steps, in milliseconds.
    pub latency_ms: Option<u64>,
    /// Bytes handed out per `read` call.
    pub read_chunk: Option<usize>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("urlbind")
}

pub fn config_path() -> PathBuf {
    config_dir().join("probe.toml")
}

impl ProbeConfig {
    /// Load the default config file, falling back to the built-in resource
    /// when it is missing or unreadable.
    pub fn load() -> Self {
        let path = config_path();
        if path.exists() {
            match Self::load_from(&path) {
                Ok(config) => return config.with_fallback_resource(),
                Err(e) => tracing::warn!("ignoring config {}: {e:#}", path.display()),
            }
        }
        Self::default().with_fallback_resource()
    }

    /// Load an explicitly named config file. Errors are fatal here.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("can't read {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("bad config file {}", path.display()))?;
        Ok(config)
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms.unwrap_or(DEFAULT_LATENCY_MS)
    }

    pub fn read_chunk(&self) -> usize {
        self.read_chunk.filter(|n| *n > 0).unwrap_or(4096)
    }

    fn with_fallback_resource(mut self) -> Self {
        if self.resources.is_empty() {
            self.resources.push(ResourceConfig {
                path: DEFAULT_PATH.to_string(),
                body: "hello from urlbind\n".to_string(),
                mime: None,
            });
        }
        self
    }
}
