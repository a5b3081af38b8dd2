//! Resource fetching (meshes, material libraries, xacro includes)

use std::collections::HashMap;

use parking_lot::RwLock;

/// Source of resource bytes addressed by URL
pub trait ResourceFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch and decode as UTF-8 text
    fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url)?;
        String::from_utf8(bytes).map_err(|e| FetchError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Fetches resources with HTTP GET from the host's file server
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl ResourceFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        tracing::debug!("GET {}", url);
        let mut response = ureq::get(url).call().map_err(|e| FetchError::Http {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        response
            .body_mut()
            .read_to_vec()
            .map_err(|e| FetchError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// In-memory resources keyed by URL
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    resources: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, replacing any previous content for the URL
    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.resources.write().insert(url.into(), data.into());
    }

    pub fn with(self, url: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(url, data);
        self
    }
}

impl ResourceFetcher for MemoryFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.resources
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(url.to_string()))
    }
}

/// Fetch-related errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Request for '{url}' failed: {reason}")]
    Http { url: String, reason: String },
    #[error("Resource '{url}' is not valid UTF-8: {reason}")]
    Decode { url: String, reason: String },
}
