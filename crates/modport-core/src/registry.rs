//! Typed metadata clients for the npm and JSR registries.

use crate::fetch::{FetchError, RobustFetch};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

pub const NPM_REGISTRY_ENDPOINT: &str = "https://registry.npmjs.org";
pub const JSR_REGISTRY_ENDPOINT: &str = "https://jsr.io";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("invalid metadata from {url}: {source}")]
    Json {
        url: Url,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot build registry URL for package {name}")]
    BadName { name: String },
}

/// npm packument, reduced to the fields resolution reads.
#[derive(Debug, Clone, Deserialize)]
pub struct NpmPackageMeta {
    pub name: String,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, NpmVersionMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NpmVersionMeta {
    #[serde(default)]
    pub exports: Option<serde_json::Value>,
}

/// JSR package metadata (`meta.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsrPackageMeta {
    pub scope: String,
    pub name: String,
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, JsrVersionInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsrVersionInfo {
    #[serde(default)]
    pub yanked: bool,
}

/// JSR per-version metadata (`{version}_meta.json`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsrVersionMeta {
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

/// Fetches and deserializes registry documents over a [`RobustFetch`].
pub struct MetadataClient {
    fetcher: Arc<dyn RobustFetch>,
    npm_endpoint: String,
    jsr_endpoint: String,
    cache_first: bool,
}

impl MetadataClient {
    /// Endpoints come from `MODPORT_NPM_REGISTRY` / `MODPORT_JSR_REGISTRY`
    /// when set, which is how tests point at local fixtures.
    pub fn new(fetcher: Arc<dyn RobustFetch>) -> Self {
        let npm_endpoint = std::env::var("MODPORT_NPM_REGISTRY")
            .unwrap_or_else(|_| NPM_REGISTRY_ENDPOINT.to_string());
        let jsr_endpoint = std::env::var("MODPORT_JSR_REGISTRY")
            .unwrap_or_else(|_| JSR_REGISTRY_ENDPOINT.to_string());
        Self::with_endpoints(fetcher, npm_endpoint, jsr_endpoint)
    }

    pub fn with_endpoints(
        fetcher: Arc<dyn RobustFetch>,
        npm_endpoint: impl Into<String>,
        jsr_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            npm_endpoint: trim_trailing_slash(npm_endpoint.into()),
            jsr_endpoint: trim_trailing_slash(jsr_endpoint.into()),
            cache_first: true,
        }
    }

    /// Whether metadata requests consult the cache before the network.
    /// Cache-first by default; turn it off to always see new releases.
    #[must_use]
    pub fn cache_first(mut self, cache_first: bool) -> Self {
        self.cache_first = cache_first;
        self
    }

    #[must_use]
    pub fn jsr_endpoint(&self) -> &str {
        &self.jsr_endpoint
    }

    pub async fn npm_package(&self, name: &str) -> Result<NpmPackageMeta, RegistryError> {
        let url = self.registry_url(&self.npm_endpoint, &format!("/{name}"), name)?;
        self.fetch_json(&url).await
    }

    pub async fn jsr_package(&self, name: &str) -> Result<JsrPackageMeta, RegistryError> {
        let url = self.registry_url(&self.jsr_endpoint, &format!("/{name}/meta.json"), name)?;
        self.fetch_json(&url).await
    }

    pub async fn jsr_version(
        &self,
        name: &str,
        version: &semver::Version,
    ) -> Result<JsrVersionMeta, RegistryError> {
        let url = self.registry_url(
            &self.jsr_endpoint,
            &format!("/{name}/{version}_meta.json"),
            name,
        )?;
        self.fetch_json(&url).await
    }

    fn registry_url(&self, endpoint: &str, path: &str, name: &str) -> Result<Url, RegistryError> {
        Url::parse(&format!("{endpoint}{path}")).map_err(|_| RegistryError::BadName {
            name: name.to_string(),
        })
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &Url,
    ) -> Result<T, RegistryError> {
        let response = self.fetcher.fetch(url, self.cache_first).await?;
        serde_json::from_slice(&response.body).map_err(|source| RegistryError::Json {
            url: url.clone(),
            source,
        })
    }
}

fn trim_trailing_slash(mut s: String) -> String {
    while s.ends_with('/') {
        s.pop();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::RemoteResponse;
    use async_trait::async_trait;
    use bytes::Bytes;

    struct OneDoc(&'static str);

    #[async_trait]
    impl RobustFetch for OneDoc {
        async fn fetch(&self, url: &Url, _cache_first: bool) -> Result<RemoteResponse, FetchError> {
            Ok(RemoteResponse {
                url: url.clone(),
                status: 200,
                content_type: Some("application/json".to_string()),
                body: Bytes::from_static(self.0.as_bytes()),
                from_cache: false,
            })
        }
    }

    fn client(doc: &'static str) -> MetadataClient {
        MetadataClient::with_endpoints(
            Arc::new(OneDoc(doc)),
            "https://registry.example/",
            "https://jsr.example",
        )
    }

    #[tokio::test]
    async fn test_npm_packument_parses() {
        let doc = r#"{
            "name": "left-pad",
            "dist-tags": {"latest": "1.3.0"},
            "versions": {"1.3.0": {}, "1.2.0": {"exports": {".": "./index.js"}}}
        }"#;
        let meta = client(doc).npm_package("left-pad").await.unwrap();
        assert_eq!(meta.name, "left-pad");
        assert_eq!(meta.dist_tags.get("latest").map(String::as_str), Some("1.3.0"));
        assert_eq!(meta.versions.len(), 2);
        assert!(meta.versions["1.2.0"].exports.is_some());
    }

    #[tokio::test]
    async fn test_jsr_meta_parses_with_yanked() {
        let doc = r#"{
            "scope": "std",
            "name": "path",
            "latest": "1.0.8",
            "versions": {"1.0.8": {}, "1.0.7": {"yanked": true}}
        }"#;
        let meta = client(doc).jsr_package("@std/path").await.unwrap();
        assert_eq!(meta.scope, "std");
        assert!(meta.versions["1.0.7"].yanked);
        assert!(!meta.versions["1.0.8"].yanked);
    }

    #[tokio::test]
    async fn test_jsr_version_meta_exports() {
        let doc = r#"{"exports": {".": "./mod.ts", "./posix": "./posix/mod.ts"}}"#;
        let meta = client(doc)
            .jsr_version("@std/path", &semver::Version::new(1, 0, 8))
            .await
            .unwrap();
        assert_eq!(meta.exports.get(".").map(String::as_str), Some("./mod.ts"));
    }

    #[tokio::test]
    async fn test_bad_json_is_typed() {
        let err = client("not json").npm_package("x").await.unwrap_err();
        assert!(matches!(err, RegistryError::Json { .. }));
    }

    struct RecordedFetch {
        doc: &'static str,
        cache_first: std::sync::Mutex<Option<bool>>,
    }

    #[async_trait]
    impl RobustFetch for RecordedFetch {
        async fn fetch(&self, url: &Url, cache_first: bool) -> Result<RemoteResponse, FetchError> {
            *self.cache_first.lock().unwrap() = Some(cache_first);
            Ok(RemoteResponse {
                url: url.clone(),
                status: 200,
                content_type: Some("application/json".to_string()),
                body: Bytes::from_static(self.doc.as_bytes()),
                from_cache: false,
            })
        }
    }

    #[tokio::test]
    async fn test_cache_first_reaches_the_fetcher() {
        let fetch = Arc::new(RecordedFetch {
            doc: r#"{"name": "x", "versions": {}}"#,
            cache_first: std::sync::Mutex::new(None),
        });
        let client = MetadataClient::with_endpoints(
            Arc::clone(&fetch) as Arc<dyn RobustFetch>,
            "https://registry.example",
            "https://jsr.example",
        );
        client.npm_package("x").await.unwrap();
        assert_eq!(*fetch.cache_first.lock().unwrap(), Some(true));

        let client = client.cache_first(false);
        client.npm_package("x").await.unwrap();
        assert_eq!(*fetch.cache_first.lock().unwrap(), Some(false));
    }
}
