//! Filesystem helpers shared by the cache and the build engine.
//!
//! Every path that leaves this module is absolute and lexically normalized so
//! that cache keys and linker inputs are stable across runs.

use std::{
    fs,
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};

use crate::error::*;

/// Extensions considered C/C++ translation units during source discovery.
pub const SOURCE_EXTS: &[&str] = &["c", "cpp", "cc", "cxx", "c++", "cp", "tpp"];

/// Create a directory and all its parents. Idempotent.
pub fn create_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    fs::create_dir_all(path.as_ref())
        .map_err(|e| Error::CannotCreate(path.as_ref().to_path_buf(), e))
}

pub fn dir_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_dir()
}

pub fn file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_file()
}

/// Remove a directory tree (or do nothing if it is already gone).
pub fn remove_tree<P: AsRef<Path>>(path: P) -> Result<()> {
    if !path.as_ref().exists() {
        return Ok(());
    }
    fs::remove_dir_all(path.as_ref())
        .map_err(|e| Error::CannotRemove(path.as_ref().to_path_buf(), e))
}

// Fold `.` and `..` components without touching the filesystem, so paths to
// not-yet-created files normalize the same way as existing ones.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Turn `path` into an absolute, lexically normalized path (relative paths are
/// resolved against the current working directory; symlinks are left alone).
pub fn absolute_normalized<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::CurrentDirInvalid(PathBuf::from("."), e))?;
        cwd.join(path)
    };
    Ok(normalize(&abs))
}

/// Resolve `rel` against `base` and normalize. If `base` is a file its parent
/// directory is used instead.
pub fn concatenate_path<B: AsRef<Path>, R: AsRef<Path>>(base: B, rel: R) -> Result<PathBuf> {
    let mut base = absolute_normalized(base)?;
    if base.is_file() {
        base.pop();
    }
    Ok(normalize(&base.join(rel)))
}

/// File size in bytes.
pub fn get_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    fs::metadata(path.as_ref())
        .map(|m| m.len())
        .map_err(|e| Error::CannotStat(path.as_ref().to_path_buf(), e))
}

/// Last modification time as whole seconds since the Unix epoch.
pub fn get_last_write<P: AsRef<Path>>(path: P) -> Result<u64> {
    let modified = fs::metadata(path.as_ref())
        .and_then(|m| m.modified())
        .map_err(|e| Error::CannotStat(path.as_ref().to_path_buf(), e))?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0))
}

fn has_extension(path: &Path, wanted: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let ext = e.to_lowercase();
            wanted.iter().any(|w| *w == ext)
        })
        .unwrap_or(false)
}

fn walk_files(dir: &Path, wanted: &[&str]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::DirNotExist(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .follow_links(true)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
    {
        let path = entry.map_err(Error::FileListing)?.into_path();
        if path.is_file() && has_extension(&path, wanted) {
            files.push(absolute_normalized(&path)?);
        }
    }

    log::debug!("found {} file(s) under {:?}", files.len(), dir);
    Ok(files)
}

/// Yield the absolute paths of every C/C++ translation unit under `dir`,
/// recursively, in a stable name-sorted order.
pub fn get_src_files_recursive<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    walk_files(dir.as_ref(), SOURCE_EXTS)
}

/// Yield the absolute paths of every file under `dir` with extension `ext`
/// (no leading dot).
pub fn get_files_with_ext<P: AsRef<Path>>(dir: P, ext: &str) -> Result<Vec<PathBuf>> {
    walk_files(dir.as_ref(), &[ext])
}
