//! The remote loader: bundler hooks that resolve `npm:`/`jsr:` specifiers,
//! fetch module sources, and inline source maps.

use crate::fetch::{decode_data_url, FetchError, RobustFetch};
use crate::import_map::{ImportMap, ResolvedImportMap};
use crate::resolve::{ResolveError, VersionResolver};
use crate::sourcemap::{extract_source_map_url, replace_source_map_url, to_data_url};
use crate::specifier::{parse_jsr_specifier, parse_npm_specifier, SpecifierError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use url::Url;

/// What a loaded module body is, for downstream transform selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    JavaScript,
    TypeScript,
    Jsx,
    Tsx,
    Json,
    Css,
    Text,
}

impl ContentKind {
    /// Kinds whose bodies are scanned for source-map comments.
    #[must_use]
    pub fn carries_source_map(self) -> bool {
        matches!(
            self,
            Self::JavaScript | Self::TypeScript | Self::Jsx | Self::Tsx | Self::Css
        )
    }
}

/// Classify by the final path segment's extension; an unrecognized
/// extension falls back to the MIME subtype, and anything else is text.
#[must_use]
pub fn classify_content_kind(content_type: Option<&str>, url: &Url) -> ContentKind {
    let segment = url.path().rsplit('/').next().unwrap_or("");
    let ext = segment.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match ext.to_ascii_lowercase().as_str() {
        "js" | "mjs" | "cjs" => return ContentKind::JavaScript,
        "ts" | "mts" | "cts" => return ContentKind::TypeScript,
        "jsx" => return ContentKind::Jsx,
        "tsx" => return ContentKind::Tsx,
        "json" => return ContentKind::Json,
        "css" => return ContentKind::Css,
        _ => {}
    }

    let subtype = content_type
        .and_then(|ct| ct.split(';').next())
        .and_then(|mime| mime.trim().split_once('/'))
        .map(|(_, subtype)| subtype.to_ascii_lowercase())
        .unwrap_or_default();
    match subtype.as_str() {
        "javascript" | "x-javascript" | "ecmascript" => ContentKind::JavaScript,
        "typescript" => ContentKind::TypeScript,
        "jsx" => ContentKind::Jsx,
        "tsx" => ContentKind::Tsx,
        "css" => ContentKind::Css,
        s if s == "json" || s.ends_with("+json") => ContentKind::Json,
        _ => ContentKind::Text,
    }
}

/// A URL split into the bundler's namespace/path form. The namespace is the
/// URL scheme; the path is everything after the colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlResolution {
    pub namespace: String,
    pub path: String,
}

impl UrlResolution {
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        let href = url.as_str();
        Self {
            namespace: url.scheme().to_string(),
            path: href[url.scheme().len() + 1..].to_string(),
        }
    }

    pub fn to_url(&self) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}:{}", self.namespace, self.path))
    }
}

/// Why an import is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    EntryPoint,
    ImportStatement,
    DynamicImport,
    UrlToken,
}

#[derive(Debug, Clone)]
pub struct OnResolveArgs {
    pub path: String,
    pub importer: Option<Url>,
    /// Namespace of the importing module, empty for entry points.
    pub namespace: String,
    /// Directory for resolving relative paths with no URL importer.
    pub resolve_dir: Option<PathBuf>,
    pub kind: ImportKind,
}

impl OnResolveArgs {
    /// Args for a build entry point.
    #[must_use]
    pub fn entry(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            importer: None,
            namespace: String::new(),
            resolve_dir: None,
            kind: ImportKind::EntryPoint,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnResolveResult {
    pub resolution: UrlResolution,
    pub external: bool,
}

#[derive(Debug, Clone)]
pub struct OnLoadArgs {
    pub resolution: UrlResolution,
}

/// A non-fatal problem attached to a loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarningMessage {
    pub text: String,
    pub url: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct OnLoadResult {
    pub contents: Bytes,
    pub kind: ContentKind,
    pub warnings: Vec<WarningMessage>,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error(transparent)]
    Specifier(#[from] SpecifierError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("unsupported scheme in {url}")]
    UnsupportedScheme { url: Url },

    #[error("namespace {namespace} is not supported yet")]
    UnsupportedNamespace { namespace: String },

    #[error("invalid module path {path}")]
    InvalidPath { path: String },

    #[error("cannot load import map from {url}: {message}")]
    ImportMap { url: Url, message: String },
}

/// Progress notifications for loads in flight.
#[derive(Debug, Clone)]
pub enum LoadEvent {
    Start {
        url: Url,
    },
    Done {
        url: Url,
        size: usize,
        kind: ContentKind,
        from_cache: bool,
    },
}

pub type ProgressCallback = Arc<dyn Fn(LoadEvent) + Send + Sync>;

/// Pre-supplied module sources, consulted before any network access. Each
/// entry carries its declared content kind alongside the bytes.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    entries: HashMap<String, (Bytes, ContentKind)>,
}

impl InMemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: &Url, contents: impl Into<Bytes>, kind: ContentKind) {
        self.entries
            .insert(url.as_str().to_string(), (contents.into(), kind));
    }

    #[must_use]
    pub fn get(&self, url: &Url) -> Option<&(Bytes, ContentKind)> {
        self.entries.get(url.as_str())
    }
}

/// Specifiers excluded from the bundle. A trailing `*` makes the pattern a
/// prefix match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPattern(String);

impl ExternalPattern {
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    #[must_use]
    pub fn matches(&self, specifier: &str) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => specifier.starts_with(prefix),
            None => specifier == self.0,
        }
    }
}

/// Which hosts bypass the cache-first policy and hit the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ReloadPolicy {
    /// Serve from cache when present.
    #[default]
    Never,
    /// Refetch everything.
    All,
    /// Refetch only modules on these hostnames.
    Hosts(Vec<String>),
}

impl ReloadPolicy {
    #[must_use]
    pub fn wants_reload(&self, url: &Url) -> bool {
        match self {
            Self::Never => false,
            Self::All => true,
            Self::Hosts(hosts) => url
                .host_str()
                .is_some_and(|host| hosts.iter().any(|h| h == host)),
        }
    }
}

#[derive(Clone)]
pub struct RemoteLoaderOptions {
    /// A pre-resolved import map to apply from the start.
    pub import_map: Option<ResolvedImportMap>,
    /// An import map to fetch and parse during `on_start`.
    pub import_map_url: Option<Url>,
    pub sources: InMemorySource,
    pub externals: Vec<ExternalPattern>,
    pub reload: ReloadPolicy,
    pub inline_source_maps: bool,
    pub progress: Option<ProgressCallback>,
}

impl Default for RemoteLoaderOptions {
    fn default() -> Self {
        Self {
            import_map: None,
            import_map_url: None,
            sources: InMemorySource::default(),
            externals: Vec::new(),
            reload: ReloadPolicy::default(),
            inline_source_maps: true,
            progress: None,
        }
    }
}

/// The hook surface a bundler drives.
#[async_trait]
pub trait BundlerHooks: Send + Sync {
    /// Called once before a build begins.
    async fn on_start(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Map an import path to a resolution, or pass with `None`.
    async fn on_resolve(
        &self,
        args: &OnResolveArgs,
    ) -> Result<Option<OnResolveResult>, HookError>;

    /// Produce module contents for a resolution, or pass with `None`.
    async fn on_load(&self, args: &OnLoadArgs) -> Result<Option<OnLoadResult>, HookError>;
}

/// Loads remote modules for a bundler build.
pub struct RemoteLoader {
    fetcher: Arc<dyn RobustFetch>,
    resolver: VersionResolver,
    options: RemoteLoaderOptions,
    import_map: RwLock<Option<ResolvedImportMap>>,
}

impl RemoteLoader {
    pub fn new(
        fetcher: Arc<dyn RobustFetch>,
        resolver: VersionResolver,
        options: RemoteLoaderOptions,
    ) -> Self {
        let import_map = RwLock::new(options.import_map.clone());
        Self {
            fetcher,
            resolver,
            options,
            import_map,
        }
    }

    fn emit(&self, event: LoadEvent) {
        if let Some(progress) = &self.options.progress {
            progress(event);
        }
    }

    async fn resolve_url(&self, url: Url) -> Result<Url, HookError> {
        match url.scheme() {
            "npm" => {
                let spec = parse_npm_specifier(&url)?;
                Ok(self.resolver.resolve_npm(&spec).await?.url)
            }
            "jsr" => {
                let spec = parse_jsr_specifier(&url)?;
                Ok(self.resolver.resolve_jsr(&spec).await?.url)
            }
            "http" | "https" | "file" | "data" => Ok(url),
            _ => Err(HookError::UnsupportedScheme { url }),
        }
    }

    async fn load_remote(&self, url: &Url) -> Result<OnLoadResult, HookError> {
        if let Some((contents, kind)) = self.options.sources.get(url) {
            return Ok(OnLoadResult {
                contents: contents.clone(),
                kind: *kind,
                warnings: Vec::new(),
            });
        }

        self.emit(LoadEvent::Start { url: url.clone() });
        let cache_first = !self.options.reload.wants_reload(url);
        let response = self.fetcher.fetch(url, cache_first).await?;
        let from_cache = response.from_cache;

        let kind = classify_content_kind(response.content_type.as_deref(), &response.url);
        let mut warnings = Vec::new();
        let contents = if self.options.inline_source_maps && kind.carries_source_map() {
            match std::str::from_utf8(&response.body) {
                Ok(text) => {
                    let (text, mut map_warnings) =
                        self.inline_source_map(text, &response.url).await;
                    warnings.append(&mut map_warnings);
                    Bytes::from(text)
                }
                Err(_) => response.body,
            }
        } else {
            response.body
        };
        self.emit(LoadEvent::Done {
            url: url.clone(),
            size: contents.len(),
            kind,
            from_cache,
        });

        Ok(OnLoadResult {
            contents,
            kind,
            warnings,
        })
    }

    /// Inline the module's source map as a `data:` URL. Failures downgrade
    /// to warnings; the module still loads with its original comment.
    async fn inline_source_map(
        &self,
        source: &str,
        module_url: &Url,
    ) -> (String, Vec<WarningMessage>) {
        let Some(map_ref) = extract_source_map_url(source) else {
            return (source.to_string(), Vec::new());
        };
        if map_ref.url.starts_with("data:") {
            return (source.to_string(), Vec::new());
        }

        let map_url = match module_url.join(&map_ref.url) {
            Ok(map_url) => map_url,
            Err(e) => {
                return (
                    source.to_string(),
                    vec![WarningMessage {
                        text: format!("cannot resolve source map {}: {e}", map_ref.url),
                        url: Some(module_url.clone()),
                    }],
                );
            }
        };

        match self.fetcher.fetch(&map_url, true).await {
            Ok(map) => {
                let data_url = to_data_url("application/json", &map.body);
                (replace_source_map_url(source, &map_ref, &data_url), Vec::new())
            }
            Err(e) => (
                source.to_string(),
                vec![WarningMessage {
                    text: format!("failed to fetch source map: {e}"),
                    url: Some(map_url),
                }],
            ),
        }
    }
}

#[async_trait]
impl BundlerHooks for RemoteLoader {
    /// Load the configured import map, if any. That one fetch goes through
    /// the plain fetch path with no import map in effect.
    async fn on_start(&self) -> Result<(), HookError> {
        let Some(map_url) = &self.options.import_map_url else {
            return Ok(());
        };
        let response = self.fetcher.fetch(map_url, true).await?;
        let map = std::str::from_utf8(&response.body)
            .map_err(|e| HookError::ImportMap {
                url: map_url.clone(),
                message: e.to_string(),
            })
            .and_then(|text| {
                ImportMap::parse(text).map_err(|e| HookError::ImportMap {
                    url: map_url.clone(),
                    message: e.to_string(),
                })
            })?;
        *self.import_map.write().unwrap() = Some(map.resolve(map_url));
        Ok(())
    }

    async fn on_resolve(
        &self,
        args: &OnResolveArgs,
    ) -> Result<Option<OnResolveResult>, HookError> {
        // absolutize first, then let the import map rewrite the result
        let url = match Url::parse(&args.path) {
            Ok(url) => Some(url),
            Err(_) => {
                let invalid = || HookError::InvalidPath {
                    path: args.path.clone(),
                };
                match &args.importer {
                    // relative imports resolve against a remote or
                    // file importer
                    Some(importer)
                        if is_path_like(&args.path)
                            && matches!(importer.scheme(), "http" | "https" | "file") =>
                    {
                        Some(importer.join(&args.path).map_err(|_| invalid())?)
                    }
                    // entry points may carry a directory instead
                    None if args.resolve_dir.is_some() && is_path_like(&args.path) => {
                        let dir = args.resolve_dir.as_ref().ok_or_else(invalid)?;
                        Some(
                            Url::from_file_path(dir.join(&args.path))
                                .map_err(|()| invalid())?,
                        )
                    }
                    // a relative path with nothing to resolve against
                    _ if is_path_like(&args.path) => return Err(invalid()),
                    // bare specifiers stay bare and go through the map as-is
                    _ => None,
                }
            }
        };

        let mapped = {
            let guard = self.import_map.read().unwrap();
            guard.as_ref().and_then(|map| {
                let key = url.as_ref().map_or(args.path.as_str(), Url::as_str);
                map.lookup(key, args.importer.as_ref())
            })
        };
        let url = mapped.or(url);

        // external patterns apply after mapping, so they can name either
        // the written specifier or the URL it resolves to
        let is_external = self.options.externals.iter().any(|p| {
            p.matches(&args.path) || url.as_ref().is_some_and(|u| p.matches(u.as_str()))
        });
        if is_external {
            return Ok(Some(OnResolveResult {
                resolution: UrlResolution {
                    namespace: "external".to_string(),
                    path: args.path.clone(),
                },
                external: true,
            }));
        }

        // a bare name the map did not claim is someone else's module;
        // mark it external so it stays out of the bundle
        let Some(url) = url else {
            return Ok(Some(OnResolveResult {
                resolution: UrlResolution {
                    namespace: "external".to_string(),
                    path: args.path.clone(),
                },
                external: true,
            }));
        };
        let resolved = self.resolve_url(url).await?;
        Ok(Some(OnResolveResult {
            resolution: UrlResolution::from_url(&resolved),
            external: false,
        }))
    }

    async fn on_load(&self, args: &OnLoadArgs) -> Result<Option<OnLoadResult>, HookError> {
        let invalid = || HookError::InvalidPath {
            path: args.resolution.path.clone(),
        };
        match args.resolution.namespace.as_str() {
            "data" => {
                let url = args.resolution.to_url().map_err(|_| invalid())?;
                let response = decode_data_url(&url)?;
                Ok(Some(OnLoadResult {
                    kind: classify_content_kind(response.content_type.as_deref(), &url),
                    contents: response.body,
                    warnings: Vec::new(),
                }))
            }
            "http" | "https" => {
                let url = args.resolution.to_url().map_err(|_| invalid())?;
                Ok(Some(self.load_remote(&url).await?))
            }
            "file" => {
                let url = args.resolution.to_url().map_err(|_| invalid())?;
                if let Some((contents, kind)) = self.options.sources.get(&url) {
                    return Ok(Some(OnLoadResult {
                        contents: contents.clone(),
                        kind: *kind,
                        warnings: Vec::new(),
                    }));
                }
                let path = url.to_file_path().map_err(|()| invalid())?;
                let contents = tokio::fs::read(&path).await.map_err(|e| {
                    HookError::Fetch(FetchError::Network {
                        url: url.clone(),
                        message: e.to_string(),
                    })
                })?;
                Ok(Some(OnLoadResult {
                    contents: Bytes::from(contents),
                    kind: classify_content_kind(None, &url),
                    warnings: Vec::new(),
                }))
            }
            namespace => Err(HookError::UnsupportedNamespace {
                namespace: namespace.to_string(),
            }),
        }
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_classify_prefers_the_extension() {
        assert_eq!(
            classify_content_kind(None, &url("https://x.example/mod.tsx")),
            ContentKind::Tsx
        );
        // extension beats a contradicting content type
        assert_eq!(
            classify_content_kind(Some("text/plain"), &url("https://x.example/mod.ts")),
            ContentKind::TypeScript
        );
        // only the final segment's extension counts
        assert_eq!(
            classify_content_kind(None, &url("https://x.example/v1.2/mod")),
            ContentKind::Text
        );
    }

    #[test]
    fn test_classify_falls_back_to_mime_subtype() {
        let u = url("https://esm.sh/left-pad@1.3.0/");
        assert_eq!(
            classify_content_kind(Some("text/javascript; charset=utf-8"), &u),
            ContentKind::JavaScript
        );
        assert_eq!(
            classify_content_kind(Some("application/json"), &u),
            ContentKind::Json
        );
        assert_eq!(
            classify_content_kind(Some("application/importmap+json"), &u),
            ContentKind::Json
        );
        assert_eq!(
            classify_content_kind(Some("image/png"), &u),
            ContentKind::Text
        );
        assert_eq!(classify_content_kind(None, &u), ContentKind::Text);
    }

    #[test]
    fn test_url_resolution_round_trip() {
        let u = url("https://esm.sh/left-pad@1.3.0/");
        let res = UrlResolution::from_url(&u);
        assert_eq!(res.namespace, "https");
        assert_eq!(res.path, "//esm.sh/left-pad@1.3.0/");
        assert_eq!(res.to_url().unwrap(), u);
    }

    #[test]
    fn test_external_patterns() {
        assert!(ExternalPattern::new("react").matches("react"));
        assert!(!ExternalPattern::new("react").matches("react-dom"));
        assert!(ExternalPattern::new("node:*").matches("node:fs"));
    }

    struct NoFetch;

    #[async_trait]
    impl RobustFetch for NoFetch {
        async fn fetch(
            &self,
            url: &Url,
            _cache_first: bool,
        ) -> Result<crate::fetch::RemoteResponse, FetchError> {
            Err(FetchError::Network {
                url: url.clone(),
                message: "no transport".to_string(),
            })
        }
    }

    fn offline_loader() -> RemoteLoader {
        let fetcher = Arc::new(NoFetch);
        let metadata = crate::registry::MetadataClient::with_endpoints(
            Arc::clone(&fetcher) as Arc<dyn RobustFetch>,
            "https://registry.invalid",
            "https://jsr.invalid",
        );
        RemoteLoader::new(
            fetcher,
            VersionResolver::new(metadata),
            RemoteLoaderOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_url_externals_match_the_resolved_url() {
        let fetcher = Arc::new(NoFetch);
        let metadata = crate::registry::MetadataClient::with_endpoints(
            Arc::clone(&fetcher) as Arc<dyn RobustFetch>,
            "https://registry.invalid",
            "https://jsr.invalid",
        );
        let loader = RemoteLoader::new(
            fetcher,
            VersionResolver::new(metadata),
            RemoteLoaderOptions {
                externals: vec![ExternalPattern::new("https://cdn.example/*")],
                ..RemoteLoaderOptions::default()
            },
        );

        let args = OnResolveArgs {
            importer: Some(url("https://cdn.example/a.js")),
            namespace: "https".to_string(),
            kind: ImportKind::ImportStatement,
            ..OnResolveArgs::entry("./b.js")
        };
        let resolved = loader.on_resolve(&args).await.unwrap().unwrap();
        assert!(resolved.external);
        assert_eq!(resolved.resolution.path, "./b.js");
    }

    #[tokio::test]
    async fn test_unmapped_bare_specifiers_are_external() {
        let loader = offline_loader();
        let resolved = loader
            .on_resolve(&OnResolveArgs::entry("lodash"))
            .await
            .unwrap()
            .unwrap();
        assert!(resolved.external);
        assert_eq!(resolved.resolution.path, "lodash");

        // an importer does not turn a bare name into a relative path
        let args = OnResolveArgs {
            importer: Some(url("https://esm.sh/dep@1.0.0/index.js")),
            namespace: "https".to_string(),
            kind: ImportKind::ImportStatement,
            ..OnResolveArgs::entry("lodash")
        };
        let resolved = loader.on_resolve(&args).await.unwrap().unwrap();
        assert!(resolved.external);
    }

    #[tokio::test]
    async fn test_unknown_namespace_is_rejected() {
        let loader = offline_loader();
        let args = OnLoadArgs {
            resolution: UrlResolution {
                namespace: "wasm".to_string(),
                path: "//x.example/mod.wasm".to_string(),
            },
        };
        let err = loader.on_load(&args).await.unwrap_err();
        assert!(matches!(err, HookError::UnsupportedNamespace { .. }));
    }

    #[tokio::test]
    async fn test_file_namespace_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.ts");
        std::fs::write(&path, "export const n = 1;").unwrap();

        let loader = offline_loader();
        let url = Url::from_file_path(&path).unwrap();
        let loaded = loader
            .on_load(&OnLoadArgs {
                resolution: UrlResolution::from_url(&url),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.kind, ContentKind::TypeScript);
        assert_eq!(&loaded.contents[..], b"export const n = 1;");
    }

    #[test]
    fn test_reload_policy() {
        let u = url("https://esm.sh/x");
        assert!(!ReloadPolicy::Never.wants_reload(&u));
        assert!(ReloadPolicy::All.wants_reload(&u));
        assert!(ReloadPolicy::Hosts(vec!["esm.sh".to_string()]).wants_reload(&u));
        assert!(!ReloadPolicy::Hosts(vec!["jsr.io".to_string()]).wants_reload(&u));
    }
}
