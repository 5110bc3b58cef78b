//! ROM name to external metadata resolution.
//!
//! [`MetadataResolver`] answers from the persistent [`MetadataCache`] when it
//! can and falls back to a single search request otherwise. Successful lookups
//! are written through to disk before they are returned; failed ones leave the
//! cache untouched.

use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::{MetadataCache, ResolvedMetadata};
use crate::config::MetadataConfig;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("no metadata API key configured")]
    MissingApiKey,
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed metadata response: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("no metadata results for {0:?}")]
    NoResults(String),
    #[error("failed to persist metadata cache: {0}")]
    Cache(#[from] std::io::Error),
}

/// A remote source of game metadata.
pub trait MetadataLookup {
    /// Returns the best match for `rom_name`.
    fn search(&self, rom_name: &str) -> Result<ResolvedMetadata, MetadataError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: ExternalId,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExternalId {
    Number(u64),
    Text(String),
}

impl From<ExternalId> for String {
    fn from(id: ExternalId) -> Self {
        match id {
            ExternalId::Number(n) => n.to_string(),
            ExternalId::Text(s) => s,
        }
    }
}

/// Extracts the first result of a search response body.
pub fn parse_search_response(rom_name: &str, body: &str) -> Result<ResolvedMetadata, MetadataError> {
    let response: SearchResponse = serde_json::from_str(body)?;
    let first = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| MetadataError::NoResults(rom_name.to_string()))?;
    Ok(ResolvedMetadata {
        id: first.id.into(),
        name: first.name,
    })
}

/// Giant Bomb search API client.
///
/// Blocking: lookups run on a worker thread alongside the catalog scan, never
/// on the async event loop. The HTTP client is built on first use for the
/// same reason.
pub struct GiantBombClient {
    http: OnceLock<reqwest::blocking::Client>,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GiantBombClient {
    pub fn new(config: &MetadataConfig) -> Self {
        Self {
            http: OnceLock::new(),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            timeout: config.effective_timeout(),
        }
    }

    fn http(&self) -> Result<&reqwest::blocking::Client, MetadataError> {
        if let Some(http) = self.http.get() {
            return Ok(http);
        }
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("romtrack/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .build()?;
        Ok(self.http.get_or_init(|| http))
    }
}

impl GiantBombClient {
    /// The search request for `rom_name`: one game result, id and name only.
    fn search_request(&self, rom_name: &str) -> Result<reqwest::blocking::Request, MetadataError> {
        let api_key = self.api_key.as_deref().ok_or(MetadataError::MissingApiKey)?;
        let request = self
            .http()?
            .get(&self.base_url)
            .query(&[
                ("api_key", api_key),
                ("field_list", "id,name"),
                ("format", "json"),
                ("limit", "1"),
                ("query", rom_name),
                ("resources", "game"),
            ])
            .build()?;
        Ok(request)
    }
}

impl MetadataLookup for GiantBombClient {
    fn search(&self, rom_name: &str) -> Result<ResolvedMetadata, MetadataError> {
        let request = self.search_request(rom_name)?;
        let body = self.http()?.execute(request)?.error_for_status()?.text()?;
        parse_search_response(rom_name, &body)
    }
}

/// Resolves ROM names through the cache first, then the lookup.
pub struct MetadataResolver<L> {
    lookup: L,
    cache: MetadataCache,
}

impl<L: MetadataLookup> MetadataResolver<L> {
    pub fn new(lookup: L, cache: MetadataCache) -> Self {
        Self { lookup, cache }
    }

    /// Swaps the remote lookup, e.g. after the API key changed. Cached entries are kept.
    pub fn replace_lookup(&mut self, lookup: L) {
        self.lookup = lookup;
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn resolve(&mut self, rom_name: &str) -> Result<ResolvedMetadata, MetadataError> {
        if let Some(hit) = self.cache.get(rom_name) {
            debug!(rom = rom_name, id = %hit.id, "Metadata cache hit");
            return Ok(hit.clone());
        }

        let resolved = self.lookup.search(rom_name)?;
        self.cache.insert(rom_name.to_string(), resolved.clone());
        if let Err(e) = self.cache.flush() {
            // Only durable entries may be served from the cache.
            self.cache.remove(rom_name);
            return Err(e.into());
        }
        info!(rom = rom_name, id = %resolved.id, name = %resolved.name, "Resolved metadata");
        Ok(resolved)
    }
}
