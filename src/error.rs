use std::path::PathBuf;

/// Error type used in the program
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The current dir is invalid (not enough perms or just it does not exist)
    #[error("current directory {0:?} is invalid: {1}")]
    CurrentDirInvalid(PathBuf, #[source] std::io::Error),

    /// Impossible to create a directory or a file (also used in case is
    /// impossible to create and then write)
    #[error("couldn't create {0:?}: {1}")]
    CannotCreate(PathBuf, #[source] std::io::Error),

    /// Cannot read a certain file
    #[error("couldn't read {0:?}: {1}")]
    CannotRead(PathBuf, #[source] std::io::Error),

    /// Cannot write a cache or output file
    #[error("couldn't write {0:?}: {1}")]
    CannotWrite(PathBuf, #[source] std::io::Error),

    /// Cannot remove a file or a directory tree
    #[error("couldn't remove {0:?}: {1}")]
    CannotRemove(PathBuf, #[source] std::io::Error),

    /// Cannot query size/mtime metadata of a path
    #[error("couldn't stat {0:?}: {1}")]
    CannotStat(PathBuf, #[source] std::io::Error),

    /// A directory expected to hold sources does not exist
    #[error("directory {0:?} does not exist")]
    DirNotExist(PathBuf),

    /// While recursive listing files in a source tree some unexpected io
    /// error happened
    #[error("error while listing files: {0}")]
    FileListing(#[source] walkdir::Error),

    /// The manifest is not valid TOML
    #[error("couldn't parse the manifest: {0}")]
    ManifestParse(#[source] toml::de::Error),

    /// The manifest parsed but is semantically invalid for one project
    #[error("invalid configuration for project '{project}': {rule}")]
    Config { project: String, rule: String },

    /// An expected cache file is absent; always recovered by falling back to
    /// a clean build
    #[error("cache file {0:?} does not exist")]
    CacheMiss(PathBuf),

    /// A cache file is present but unparseable; treated as a miss after
    /// logging
    #[error("cache file {path:?} is corrupt: {detail}")]
    CacheCorrupt { path: PathBuf, detail: String },

    /// No usable archiver / def-generator / import-lib tool was found
    #[error("no usable tool found: {0}")]
    ToolMissing(String),

    /// Error when a shell command cannot be spawned
    #[error("couldn't spawn '{0}': {1}")]
    ProcessCreation(String, #[source] std::io::Error),

    /// Non-zero exit from a compile invocation
    #[error("failed to compile {file:?} (exit code {code})")]
    Compile { file: PathBuf, code: i32 },

    /// Non-zero exit from a link/archive invocation
    #[error("failed to link '{target}' (exit code {code})")]
    Link { target: String, code: i32 },

    /// Composite raised by the engine to summarize a failed phase
    #[error("build failed: {failures} file(s) did not compile; first error: {first}")]
    Build { failures: usize, first: Box<Error> },

    /// A worker task panicked; always a bug in ymake itself
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
