use std::path::PathBuf;

use clap::{ArgEnum, Parser, Subcommand};

/// Manifest file looked up when `--config` is not given.
pub const DEFAULT_MANIFEST: &str = "YMake.toml";

/// Name of the cache directory created next to the manifest.
pub const CACHE_DIR_NAME: &str = "YMakeCache";

/// The main cli of the app
#[derive(Parser)]
#[clap(author,
       version,
       about = "A declarative build driver for C/C++ projects",
       long_about = None)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Builds the projects declared in the manifest (all of them, or the
    /// named subset)
    #[clap(visible_alias = "b")]
    Build {
        /// The optimization mode of compilation
        #[clap(arg_enum, short, long, default_value_t = BuildMode::Debug)]
        mode: BuildMode,

        /// Path to the manifest file
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Ignore every cache and recompile from scratch
        #[clap(long)]
        clean: bool,

        /// Names of the projects to build; builds every project when empty
        projects: Vec<String>,
    },

    /// Prints a description of every project in the manifest
    #[clap(visible_alias = "i")]
    Info {
        /// Path to the manifest file
        #[clap(short, long)]
        config: Option<PathBuf>,
    },

    /// Removes all cached state (metadata, serialized projects, objects)
    #[clap(visible_alias = "c")]
    Clean,
}

/// Needed by the engine to know which defines/flags/optimization to emit
#[derive(ArgEnum, parse_display::Display, Clone, Copy, PartialEq, Eq, Debug, educe::Educe)]
#[educe(Default)]
pub enum BuildMode {
    /// Symbols and no optimizations; trusts the per-file cache
    #[display("debug")]
    #[educe(Default)]
    Debug,

    /// Optimizations on; never trusts the per-file cache
    #[display("release")]
    Release,
}
