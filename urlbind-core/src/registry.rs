//! Scheme → handler table used to resolve URLs to protocol factories.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{BindError, Result};
use crate::protocol::{HandlerResolver, ProtocolFactory, ResolvedHandler};

/// Concurrent registry of protocol handlers keyed by lower-cased scheme.
#[derive(Default)]
pub struct SchemeRegistry {
    handlers: DashMap<String, ResolvedHandler>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `scheme`, replacing any previous handler.
    pub fn register(
        &self,
        scheme: &str,
        clsid: Uuid,
        builtin: bool,
        factory: Arc<dyn ProtocolFactory>,
    ) {
        let key = scheme.to_ascii_lowercase();
        tracing::debug!(scheme = %key, %clsid, builtin, "registering protocol handler");
        self.handlers.insert(
            key,
            ResolvedHandler {
                factory,
                clsid,
                builtin,
            },
        );
    }

    /// Returns true if a handler was removed.
    pub fn unregister(&self, scheme: &str) -> bool {
        self.handlers
            .remove(&scheme.to_ascii_lowercase())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Extract the scheme of `url`: the leading run of scheme characters before
/// the first `:`.
pub fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    chars
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        .then_some(scheme)
}

impl HandlerResolver for SchemeRegistry {
    fn resolve(&self, url: &str) -> Result<ResolvedHandler> {
        let scheme = url_scheme(url).ok_or_else(|| BindError::InvalidUrl(url.to_string()))?;
        self.handlers
            .get(&scheme.to_ascii_lowercase())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BindError::HandlerNotFound(scheme.to_string()))
    }
}
