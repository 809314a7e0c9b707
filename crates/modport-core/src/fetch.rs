//! Robust fetching with a cache-first/cache-fallback policy.
//!
//! The discipline is fixed: at most one network attempt per request, and at
//! most one consult of the persistent response cache afterwards. On any of
//! the three failure classes (network, abort, HTTP status) the cache is tried
//! once before the typed error surfaces, so previously seen resources keep
//! loading when the network degrades.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// A response, whether satisfied over the network or from the cache store.
#[derive(Debug, Clone)]
pub struct RemoteResponse {
    /// Final URL after redirects; classification runs against this.
    pub url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    /// Whether the persistent cache store satisfied this request.
    pub from_cache: bool,
}

/// Closed failure taxonomy for one fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: Url, message: String },

    #[error("fetch aborted for {url}: {message}")]
    Abort { url: Url, message: String },

    #[error("{status} {status_text} for {url}")]
    Http {
        url: Url,
        status: u16,
        status_text: String,
    },
}

/// A cacheable response body plus the header resolution depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// The persistent response-cache store, keyed by request URL.
///
/// The storage medium is the caller's concern; the core only requires these
/// two operations.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn find(&self, url: &Url) -> Option<CachedResponse>;
    async fn save(&self, url: &Url, response: &CachedResponse);
}

/// A robust fetch implementation: one network attempt, one cache fallback.
#[async_trait]
pub trait RobustFetch: Send + Sync {
    /// Fetch `url`. With `cache_first`, the cache store is consulted before
    /// the network; either way it is consulted once more before any failure
    /// is surfaced.
    async fn fetch(&self, url: &Url, cache_first: bool) -> Result<RemoteResponse, FetchError>;
}

/// In-memory cache store, for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryResponseCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl MemoryResponseCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seed an entry, bypassing the async trait.
    pub fn insert(&self, url: &Url, response: CachedResponse) {
        self.entries
            .lock()
            .unwrap()
            .insert(url.as_str().to_string(), response);
    }
}

#[async_trait]
impl ResponseCache for MemoryResponseCache {
    async fn find(&self, url: &Url) -> Option<CachedResponse> {
        self.entries.lock().unwrap().get(url.as_str()).cloned()
    }

    async fn save(&self, url: &Url, response: &CachedResponse) {
        self.insert(url, response.clone());
    }
}

/// Sidecar metadata stored next to each cached body.
#[derive(Debug, Serialize, Deserialize)]
struct DiskEntryMeta {
    url: String,
    content_type: Option<String>,
}

/// Disk-backed cache store. Bodies live in `<hash>.bin` with a `<hash>.json`
/// sidecar, where the hash is blake3 over the request URL.
#[derive(Debug, Clone)]
pub struct DiskResponseCache {
    root: PathBuf,
}

impl DiskResponseCache {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn entry_paths(&self, url: &Url) -> (PathBuf, PathBuf) {
        let key = blake3::hash(url.as_str().as_bytes()).to_hex();
        (
            self.root.join(format!("{key}.bin")),
            self.root.join(format!("{key}.json")),
        )
    }
}

#[async_trait]
impl ResponseCache for DiskResponseCache {
    async fn find(&self, url: &Url) -> Option<CachedResponse> {
        let (body_path, meta_path) = self.entry_paths(url);
        let body = tokio::fs::read(&body_path).await.ok()?;
        let meta = tokio::fs::read(&meta_path).await.ok()?;
        let meta: DiskEntryMeta = serde_json::from_slice(&meta).ok()?;
        Some(CachedResponse {
            content_type: meta.content_type,
            body: Bytes::from(body),
        })
    }

    async fn save(&self, url: &Url, response: &CachedResponse) {
        // A failed cache write only costs a refetch later; it never fails the load.
        let (body_path, meta_path) = self.entry_paths(url);
        if tokio::fs::create_dir_all(&self.root).await.is_err() {
            return;
        }
        let meta = DiskEntryMeta {
            url: url.as_str().to_string(),
            content_type: response.content_type.clone(),
        };
        let Ok(meta_json) = serde_json::to_vec(&meta) else {
            return;
        };
        let _ = tokio::fs::write(&body_path, &response.body).await;
        let _ = tokio::fs::write(&meta_path, meta_json).await;
    }
}

/// Hostnames that are always fetched directly and whose responses are never
/// written back to the cache store. Patterns are exact hostnames or
/// `*.suffix` forms.
#[derive(Debug, Clone, Default)]
pub struct DirectHosts {
    exact: Vec<String>,
    suffixes: Vec<String>,
}

impl DirectHosts {
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hosts = Self::default();
        for pattern in patterns {
            hosts.add(pattern.as_ref());
        }
        hosts
    }

    pub fn add(&mut self, pattern: &str) {
        if let Some(suffix) = pattern.strip_prefix("*.") {
            self.suffixes.push(format!(".{suffix}"));
        } else {
            self.exact.push(pattern.to_string());
        }
    }

    #[must_use]
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.exact.iter().any(|h| h == host)
            || self.suffixes.iter().any(|s| host.ends_with(s.as_str()))
    }
}

/// The reference [`RobustFetch`] over HTTP, with an optional persistent
/// cache store attached.
pub struct HttpFetcher {
    http: reqwest::Client,
    cache: Option<Arc<dyn ResponseCache>>,
    direct_hosts: DirectHosts,
}

impl HttpFetcher {
    /// Build a fetcher with the standard timeouts and user agent.
    pub fn new(
        cache: Option<Arc<dyn ResponseCache>>,
        direct_hosts: DirectHosts,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("modport/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            cache,
            direct_hosts,
        })
    }

    async fn find_cached(&self, url: &Url) -> Option<RemoteResponse> {
        let cache = self.cache.as_ref()?;
        let hit = cache.find(url).await?;
        Some(RemoteResponse {
            url: url.clone(),
            status: 200,
            content_type: hit.content_type,
            body: hit.body,
            from_cache: true,
        })
    }
}

#[async_trait]
impl RobustFetch for HttpFetcher {
    async fn fetch(&self, url: &Url, cache_first: bool) -> Result<RemoteResponse, FetchError> {
        // data: URLs are self-contained; the cache never sees them
        if url.scheme() == "data" {
            return decode_data_url(url);
        }

        if cache_first {
            if let Some(hit) = self.find_cached(url).await {
                return Ok(hit);
            }
        }

        let response = match self.http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                if let Some(hit) = self.find_cached(url).await {
                    return Ok(hit);
                }
                return Err(classify_transport_error(url, &e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            if let Some(hit) = self.find_cached(url).await {
                return Ok(hit);
            }
            return Err(FetchError::Http {
                url: url.clone(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                if let Some(hit) = self.find_cached(url).await {
                    return Ok(hit);
                }
                return Err(classify_transport_error(url, &e));
            }
        };

        // Allow-listed hosts are always reachable directly; only the rest
        // are persisted for offline fallback.
        if !self.direct_hosts.matches(url) {
            if let Some(cache) = &self.cache {
                let entry = CachedResponse {
                    content_type: content_type.clone(),
                    body: body.clone(),
                };
                cache.save(url, &entry).await;
            }
        }

        Ok(RemoteResponse {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body,
            from_cache: false,
        })
    }
}

/// Timeouts are cancelled attempts; everything else thrown by the transport
/// is a connectivity failure.
fn classify_transport_error(url: &Url, error: &reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Abort {
            url: url.clone(),
            message: error.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.clone(),
            message: error.to_string(),
        }
    }
}

/// Decode a `data:` URL into a synthetic response.
pub fn decode_data_url(url: &Url) -> Result<RemoteResponse, FetchError> {
    let mut payload = url.path().to_string();
    if let Some(query) = url.query() {
        // '?' in the payload parses as a query; put it back
        payload.push('?');
        payload.push_str(query);
    }

    let Some((meta, data)) = payload.split_once(',') else {
        return Err(FetchError::Network {
            url: url.clone(),
            message: "malformed data URL: missing comma".to_string(),
        });
    };

    let (content_type, body) = if let Some(mime) = meta.strip_suffix(";base64") {
        let body = BASE64.decode(data).map_err(|e| FetchError::Network {
            url: url.clone(),
            message: format!("malformed data URL: {e}"),
        })?;
        (mime.to_string(), Bytes::from(body))
    } else {
        (meta.to_string(), Bytes::from(percent_decode(data)))
    };

    let content_type = if content_type.is_empty() {
        "text/plain".to_string()
    } else {
        content_type
    };

    Ok(RemoteResponse {
        url: url.clone(),
        status: 200,
        content_type: Some(content_type),
        body,
        from_cache: false,
    })
}

fn percent_decode(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hi = (bytes[i + 1] as char).to_digit(16);
            let lo = (bytes[i + 2] as char).to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}
