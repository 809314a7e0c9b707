#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modport")]
#[command(author, version, about = "Resolve and fetch remote npm/jsr modules", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the response cache directory
    #[arg(long, global = true, value_name = "PATH")]
    cache_dir: Option<PathBuf>,

    /// Disable the response cache entirely
    #[arg(long, global = true)]
    no_cache: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve a package specifier to a pinned module URL
    Resolve {
        /// The specifier to resolve (e.g., "npm:left-pad@^1.0.0", "jsr:@std/path")
        specifier: String,

        /// URL of the importing module, for relative specifiers
        #[arg(long, value_name = "URL")]
        importer: Option<String>,

        /// URL of an import map to apply
        #[arg(long, value_name = "URL")]
        import_map: Option<String>,
    },

    /// Fetch a module, inlining its source map
    Fetch {
        /// A specifier or URL (e.g., "npm:left-pad", "https://esm.sh/react")
        specifier: String,

        /// Write contents to a file instead of stdout
        #[arg(long, short = 'o')]
        outfile: Option<PathBuf>,

        /// Bypass cached responses and refetch
        #[arg(long)]
        reload: bool,

        /// Skip source-map inlining
        #[arg(long)]
        no_sourcemap: bool,
    },
}

fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.json);

    let store = commands::CacheLocation {
        dir: cli.cache_dir,
        disabled: cli.no_cache,
    };

    match cli.command {
        Commands::Resolve {
            specifier,
            importer,
            import_map,
        } => commands::resolve::run(
            &specifier,
            importer.as_deref(),
            import_map.as_deref(),
            &store,
            cli.json,
        ),
        Commands::Fetch {
            specifier,
            outfile,
            reload,
            no_sourcemap,
        } => commands::fetch::run(
            &specifier,
            outfile.as_deref(),
            &store,
            reload,
            no_sourcemap,
            cli.json,
        ),
    }
}
