use super::CacheLocation;
use miette::{miette, IntoDiagnostic, Result};
use modport_core::loader::OnResolveArgs;
use modport_core::{BundlerHooks, RemoteLoader, RemoteLoaderOptions};
use std::sync::Arc;

/// Resolve a specifier through the loader hooks and print the result.
pub fn run(
    specifier: &str,
    importer: Option<&str>,
    import_map: Option<&str>,
    store: &CacheLocation,
    json: bool,
) -> Result<()> {
    let fetcher = super::fetcher(store)?;
    let resolver = super::resolver(Arc::clone(&fetcher), true);

    let options = RemoteLoaderOptions {
        import_map_url: import_map
            .map(super::parse_specifier_url)
            .transpose()?,
        ..RemoteLoaderOptions::default()
    };
    let loader = RemoteLoader::new(fetcher, resolver, options);

    let runtime = super::runtime()?;
    let resolved = runtime.block_on(async {
        loader.on_start().await.into_diagnostic()?;

        let args = OnResolveArgs {
            importer: importer.map(super::parse_specifier_url).transpose()?,
            ..OnResolveArgs::entry(specifier)
        };
        loader
            .on_resolve(&args)
            .await
            .into_diagnostic()?
            .ok_or_else(|| miette!("cannot resolve {specifier}"))
    })?;

    if json {
        let out = serde_json::json!({
            "path": resolved.resolution.path,
            "namespace": resolved.resolution.namespace,
            "external": resolved.external,
        });
        println!("{out}");
    } else if resolved.external {
        println!("external: {}", resolved.resolution.path);
    } else {
        let url = resolved.resolution.to_url().into_diagnostic()?;
        println!("{url}");
    }
    Ok(())
}
