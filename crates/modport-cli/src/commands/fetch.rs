use super::CacheLocation;
use miette::{miette, IntoDiagnostic, Result};
use modport_core::loader::{OnLoadArgs, OnResolveArgs};
use modport_core::{
    BundlerHooks, ContentKind, LoadEvent, ReloadPolicy, RemoteLoader, RemoteLoaderOptions,
};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Fetch a module and write its contents to stdout or a file.
pub fn run(
    specifier: &str,
    outfile: Option<&Path>,
    store: &CacheLocation,
    reload: bool,
    no_sourcemap: bool,
    json: bool,
) -> Result<()> {
    let fetcher = super::fetcher(store)?;
    let resolver = super::resolver(Arc::clone(&fetcher), !reload);

    let options = RemoteLoaderOptions {
        reload: if reload {
            ReloadPolicy::All
        } else {
            ReloadPolicy::Never
        },
        inline_source_maps: !no_sourcemap,
        progress: Some(Arc::new(|event| match event {
            LoadEvent::Start { url } => tracing::debug!(%url, "fetching"),
            LoadEvent::Done {
                url,
                size,
                kind,
                from_cache,
            } => {
                tracing::debug!(%url, size, ?kind, from_cache, "loaded");
            }
        })),
        ..RemoteLoaderOptions::default()
    };
    let loader = RemoteLoader::new(fetcher, resolver, options);

    let runtime = super::runtime()?;
    let (resolution, loaded) = runtime.block_on(async {
        loader.on_start().await.into_diagnostic()?;

        let args = OnResolveArgs::entry(specifier);
        let resolved = loader
            .on_resolve(&args)
            .await
            .into_diagnostic()?
            .ok_or_else(|| miette!("cannot resolve {specifier}"))?;
        if resolved.external {
            return Err(miette!("{specifier} is marked external"));
        }

        let loaded = loader
            .on_load(&OnLoadArgs {
                resolution: resolved.resolution.clone(),
            })
            .await
            .into_diagnostic()?
            .ok_or_else(|| miette!("no loader for {specifier}"))?;
        Ok((resolved.resolution, loaded))
    })?;

    for warning in &loaded.warnings {
        tracing::warn!(url = ?warning.url, "{}", warning.text);
    }

    if let Some(outfile) = outfile {
        std::fs::write(outfile, &loaded.contents).into_diagnostic()?;
    }

    if json {
        let out = serde_json::json!({
            "url": resolution.to_url().into_diagnostic()?.as_str(),
            "kind": kind_name(loaded.kind),
            "bytes": loaded.contents.len(),
            "warnings": loaded.warnings.iter().map(|w| w.text.clone()).collect::<Vec<_>>(),
        });
        println!("{out}");
    } else if outfile.is_none() {
        std::io::stdout()
            .write_all(&loaded.contents)
            .into_diagnostic()?;
    }
    Ok(())
}

fn kind_name(kind: ContentKind) -> &'static str {
    match kind {
        ContentKind::JavaScript => "js",
        ContentKind::TypeScript => "ts",
        ContentKind::Jsx => "jsx",
        ContentKind::Tsx => "tsx",
        ContentKind::Json => "json",
        ContentKind::Css => "css",
        ContentKind::Text => "text",
    }
}
