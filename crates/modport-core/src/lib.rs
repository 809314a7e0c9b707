#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

pub mod fetch;
pub mod import_map;
pub mod loader;
pub mod range;
pub mod registry;
pub mod resolve;
pub mod sourcemap;
pub mod specifier;

pub use fetch::{
    CachedResponse, DirectHosts, DiskResponseCache, FetchError, HttpFetcher,
    MemoryResponseCache, RemoteResponse, ResponseCache, RobustFetch,
};
pub use import_map::{ImportMap, ResolvedImportMap};
pub use loader::{
    BundlerHooks, ContentKind, ExternalPattern, HookError, ImportKind, InMemorySource,
    LoadEvent, OnLoadArgs, OnLoadResult, OnResolveArgs, OnResolveResult, ProgressCallback,
    ReloadPolicy, RemoteLoader, RemoteLoaderOptions, UrlResolution, WarningMessage,
};
pub use range::VersionRange;
pub use registry::{MetadataClient, RegistryError, JSR_REGISTRY_ENDPOINT, NPM_REGISTRY_ENDPOINT};
pub use resolve::{ResolveError, ResolvedModule, VersionResolver, NPM_CDN_ENDPOINT};
pub use specifier::{
    parse_jsr_specifier, parse_npm_specifier, EntryPoint, PackageSpecifier, SpecifierError,
};
