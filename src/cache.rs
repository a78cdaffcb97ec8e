//! On-disk caches: per-file (size, mtime) metadata driving recompile
//! decisions, and the whole-manifest validity cache that lets a run skip
//! parsing entirely.
//!
//! Layout under the cache root:
//!
//! ```text
//! <cacheRoot>/
//!   timestamp.cache                 # "YYYY-MM-DD:HH-MM-SS" of last write
//!   config.cache                    # "<abs-manifest-path> <mtime-iso> <size>"
//!   projects.cache                  # one project name per line
//!   <projectName>.cache             # serialized Project record
//!   <projectName>/
//!     metadata.cache                # "<abs-src-path> <mtime-sec> <size>"
//!     preprocessed_metadata.cache   # "<abs-ipp-path> <size>"
//!     src/                          # project object files
//!     <libName>/                    # per-library object files
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::error::*;
use crate::fsutil;
use crate::project::Project;

pub const METADATA_CACHE_FILENAME: &str = "metadata.cache";
pub const PREPROCESS_CACHE_FILENAME: &str = "preprocessed_metadata.cache";
pub const CONFIG_CACHE_FILENAME: &str = "config.cache";
pub const TIMESTAMP_CACHE_FILENAME: &str = "timestamp.cache";
pub const PROJECTS_CACHE_FILENAME: &str = "projects.cache";

/// A whole-manifest cache older than this is stale regardless of content.
pub const TIMESTAMP_THRESHOLD_SECS: i64 = 86_400;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d:%H-%M-%S";

/// Everything an operation needs to know about where persisted state lives.
/// Passed explicitly; there is no process-wide mutable state.
#[derive(Clone, Debug)]
pub struct BuildContext {
    pub cache_root: PathBuf,
}

impl BuildContext {
    pub fn new<P: AsRef<Path>>(cache_root: P) -> Result<BuildContext> {
        Ok(BuildContext {
            cache_root: fsutil::absolute_normalized(cache_root)?,
        })
    }

    /// `<cacheRoot>/<projectName>`
    pub fn project_cache_dir(&self, project: &str) -> PathBuf {
        self.cache_root.join(project)
    }

    /// `<cacheRoot>/<projectName>/src`, where project object files live.
    pub fn project_src_dir(&self, project: &str) -> PathBuf {
        self.project_cache_dir(project).join("src")
    }

    /// `<cacheRoot>/<projectName>/<libName>`, where a library's objects live.
    pub fn library_cache_dir(&self, project: &str, lib: &str) -> PathBuf {
        self.project_cache_dir(project).join(lib)
    }
}

/// Size and mtime of a source file as last seen by a successful compile.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    pub last_write_time: u64,
    pub file_size: u64,
}

fn now_iso() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

fn epoch_secs_to_iso(secs: u64) -> String {
    Local
        .timestamp_opt(secs as i64, 0)
        .single()
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT).ok()
}

fn corrupt(path: &Path, detail: String) -> Error {
    Error::CacheCorrupt {
        path: path.to_path_buf(),
        detail,
    }
}

// ______________________________ file metadata ______________________________

fn stat_metadata(file: &Path) -> Result<FileMetadata> {
    Ok(FileMetadata {
        last_write_time: fsutil::get_last_write(file)?,
        file_size: fsutil::get_size(file)?,
    })
}

fn save_metadata_cache(path: &Path, cache: &BTreeMap<PathBuf, FileMetadata>) -> Result<()> {
    let mut out = String::new();
    for (file, meta) in cache {
        out.push_str(&format!(
            "{} {} {}\n",
            file.display(),
            meta.last_write_time,
            meta.file_size
        ));
    }
    fs::write(path, out).map_err(|e| Error::CannotWrite(path.to_path_buf(), e))
}

/// Full rewrite of `metadata.cache` from the current state of `files`.
pub fn create_metadata_cache(files: &[PathBuf], proj_cache_dir: &Path) -> Result<()> {
    fsutil::create_dir(proj_cache_dir)?;

    let mut cache = BTreeMap::new();
    for file in files {
        let file = fsutil::absolute_normalized(file)?;
        let meta = stat_metadata(&file)?;
        cache.insert(file, meta);
    }

    let path = proj_cache_dir.join(METADATA_CACHE_FILENAME);
    save_metadata_cache(&path, &cache)?;
    log::debug!("wrote metadata cache with {} entries to {:?}", cache.len(), path);
    Ok(())
}

fn parse_metadata_line(path: &Path, line: &str) -> Result<(PathBuf, FileMetadata)> {
    let mut fields = line.rsplitn(3, ' ');
    let size = fields.next();
    let mtime = fields.next();
    let file = fields.next();
    match (file, mtime, size) {
        (Some(file), Some(mtime), Some(size)) if !file.is_empty() => {
            let last_write_time = mtime
                .parse::<u64>()
                .map_err(|_| corrupt(path, format!("bad mtime in line '{}'", line)))?;
            let file_size = size
                .parse::<u64>()
                .map_err(|_| corrupt(path, format!("bad size in line '{}'", line)))?;
            Ok((PathBuf::from(file), FileMetadata { last_write_time, file_size }))
        }
        _ => Err(corrupt(path, format!("malformed line '{}'", line))),
    }
}

/// Load `metadata.cache`. A missing file is a recoverable `CacheMiss`; a
/// malformed line is `CacheCorrupt`.
pub fn load_metadata_cache(proj_cache_dir: &Path) -> Result<HashMap<PathBuf, FileMetadata>> {
    let path = proj_cache_dir.join(METADATA_CACHE_FILENAME);
    if !fsutil::file_exists(&path) {
        return Err(Error::CacheMiss(path));
    }

    let text = fs::read_to_string(&path).map_err(|e| Error::CannotRead(path.clone(), e))?;
    let mut cache = HashMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (file, meta) = parse_metadata_line(&path, line)?;
        cache.insert(file, meta);
    }
    Ok(cache)
}

/// Read-modify-write of one file's entry; untouched entries are preserved.
pub fn update_metadata_cache(file: &Path, proj_cache_dir: &Path) -> Result<()> {
    let mut cache: BTreeMap<PathBuf, FileMetadata> = match load_metadata_cache(proj_cache_dir) {
        Ok(map) => map.into_iter().collect(),
        Err(Error::CacheMiss(_)) => BTreeMap::new(),
        Err(e) => return Err(e),
    };

    let file = fsutil::absolute_normalized(file)?;
    let meta = stat_metadata(&file)?;
    cache.insert(file, meta);

    fsutil::create_dir(proj_cache_dir)?;
    save_metadata_cache(&proj_cache_dir.join(METADATA_CACHE_FILENAME), &cache)
}

/// A file needs recompiling iff it is absent from the cache, or its current
/// size or mtime differ from the recorded ones. Stat failures count as dirty;
/// the compile step will surface the real error.
pub fn needs_recompile(file: &Path, cache: &HashMap<PathBuf, FileMetadata>) -> bool {
    let recorded = match cache.get(file) {
        Some(meta) => *meta,
        None => return true,
    };
    match stat_metadata(file) {
        Ok(current) => current != recorded,
        Err(_) => true,
    }
}

// ______________________________ preprocessed records ______________________________

fn save_preprocessed_cache(path: &Path, cache: &BTreeMap<PathBuf, u64>) -> Result<()> {
    let mut out = String::new();
    for (file, size) in cache {
        out.push_str(&format!("{} {}\n", file.display(), size));
    }
    fs::write(path, out).map_err(|e| Error::CannotWrite(path.to_path_buf(), e))
}

/// Full rewrite of `preprocessed_metadata.cache` from a list of `.i` files.
pub fn create_preprocessed_cache(files: &[PathBuf], proj_cache_dir: &Path) -> Result<()> {
    fsutil::create_dir(proj_cache_dir)?;

    let mut cache = BTreeMap::new();
    for file in files {
        cache.insert(file.clone(), fsutil::get_size(file)?);
    }
    save_preprocessed_cache(&proj_cache_dir.join(PREPROCESS_CACHE_FILENAME), &cache)
}

/// Insert or overwrite one preprocessed file's size record.
pub fn update_preprocessed_cache(file: &Path, proj_cache_dir: &Path) -> Result<()> {
    let mut cache = match load_preprocessed_cache(proj_cache_dir) {
        Ok(map) => map,
        Err(Error::CacheMiss(_)) => BTreeMap::new(),
        Err(e) => return Err(e),
    };
    cache.insert(file.to_path_buf(), fsutil::get_size(file)?);

    fsutil::create_dir(proj_cache_dir)?;
    save_preprocessed_cache(&proj_cache_dir.join(PREPROCESS_CACHE_FILENAME), &cache)
}

pub fn load_preprocessed_cache(proj_cache_dir: &Path) -> Result<BTreeMap<PathBuf, u64>> {
    let path = proj_cache_dir.join(PREPROCESS_CACHE_FILENAME);
    if !fsutil::file_exists(&path) {
        return Err(Error::CacheMiss(path));
    }

    let text = fs::read_to_string(&path).map_err(|e| Error::CannotRead(path.clone(), e))?;
    let mut cache = BTreeMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.rsplitn(2, ' ');
        let size = fields.next();
        let file = fields.next();
        match (file, size) {
            (Some(file), Some(size)) if !file.is_empty() => {
                let size = size
                    .parse::<u64>()
                    .map_err(|_| corrupt(&path, format!("bad size in line '{}'", line)))?;
                cache.insert(PathBuf::from(file), size);
            }
            _ => return Err(corrupt(&path, format!("malformed line '{}'", line))),
        }
    }
    Ok(cache)
}

/// Drop the per-project metadata so every file is treated as dirty. Object
/// files are left in place; they get overwritten by the recompile.
pub fn remove_project_metadata(proj_cache_dir: &Path) -> Result<()> {
    for name in &[METADATA_CACHE_FILENAME, PREPROCESS_CACHE_FILENAME] {
        let path = proj_cache_dir.join(name);
        if fsutil::file_exists(&path) {
            fs::remove_file(&path).map_err(|e| Error::CannotRemove(path.clone(), e))?;
        }
    }
    Ok(())
}

// ______________________________ manifest validity ______________________________

/// The whole-manifest validity predicate: the recorded manifest identity
/// (path, ISO mtime, size) must match, and the cache must be younger than the
/// freshness threshold.
pub fn is_manifest_cache_valid(ctx: &BuildContext, manifest: &Path) -> bool {
    let config_cache = ctx.cache_root.join(CONFIG_CACHE_FILENAME);
    let line = match fs::read_to_string(&config_cache) {
        Ok(text) => text.lines().next().unwrap_or("").to_string(),
        Err(_) => {
            log::debug!("no config.cache; manifest cache is invalid");
            return false;
        }
    };

    let mut fields = line.rsplitn(3, ' ');
    let recorded_size = fields.next().unwrap_or("");
    let recorded_mtime = fields.next().unwrap_or("");
    let recorded_path = fields.next().unwrap_or("");

    let manifest = match fsutil::absolute_normalized(manifest) {
        Ok(p) => p,
        Err(_) => return false,
    };
    if recorded_path != manifest.display().to_string() {
        log::debug!("manifest location changed; cache is invalid");
        return false;
    }

    let (size, mtime) = match (fsutil::get_size(&manifest), fsutil::get_last_write(&manifest)) {
        (Ok(s), Ok(m)) => (s, m),
        _ => return false,
    };
    if recorded_size != size.to_string() || recorded_mtime != epoch_secs_to_iso(mtime) {
        log::debug!("manifest was edited; cache is invalid");
        return false;
    }

    let stamp_path = ctx.cache_root.join(TIMESTAMP_CACHE_FILENAME);
    let written = match fs::read_to_string(&stamp_path).ok().as_deref().and_then(parse_iso) {
        Some(ts) => ts,
        None => {
            log::debug!("no readable timestamp.cache; cache is invalid");
            return false;
        }
    };
    let age = Local::now().naive_local().signed_duration_since(written);
    if age.num_seconds() > TIMESTAMP_THRESHOLD_SECS {
        log::debug!("manifest cache is {}s old; invalid", age.num_seconds());
        return false;
    }

    true
}

/// Overwrite the whole validity cache: serialized projects, the project name
/// index, the manifest identity, and finally the freshness timestamp.
pub fn create_projects_cache(
    ctx: &BuildContext,
    projects: &[Project],
    manifest: &Path,
) -> Result<()> {
    fsutil::create_dir(&ctx.cache_root)?;

    for proj in projects {
        let path = ctx.cache_root.join(format!("{}.cache", proj.name));
        fs::write(&path, proj.serialize()).map_err(|e| Error::CannotWrite(path.clone(), e))?;
    }

    let names: String = projects.iter().map(|p| format!("{}\n", p.name)).collect();
    let names_path = ctx.cache_root.join(PROJECTS_CACHE_FILENAME);
    fs::write(&names_path, names).map_err(|e| Error::CannotWrite(names_path.clone(), e))?;

    let manifest = fsutil::absolute_normalized(manifest)?;
    let line = format!(
        "{} {} {}\n",
        manifest.display(),
        epoch_secs_to_iso(fsutil::get_last_write(&manifest)?),
        fsutil::get_size(&manifest)?
    );
    let config_path = ctx.cache_root.join(CONFIG_CACHE_FILENAME);
    fs::write(&config_path, line).map_err(|e| Error::CannotWrite(config_path.clone(), e))?;

    let stamp_path = ctx.cache_root.join(TIMESTAMP_CACHE_FILENAME);
    fs::write(&stamp_path, now_iso()).map_err(|e| Error::CannotWrite(stamp_path.clone(), e))?;

    log::debug!("wrote validity cache for {} project(s)", projects.len());
    Ok(())
}

/// Load every serialized project named by `projects.cache`, without checking
/// validity first.
pub fn load_projects_cache(ctx: &BuildContext) -> Result<Vec<Project>> {
    let names_path = ctx.cache_root.join(PROJECTS_CACHE_FILENAME);
    if !fsutil::file_exists(&names_path) {
        return Err(Error::CacheMiss(names_path));
    }
    let names =
        fs::read_to_string(&names_path).map_err(|e| Error::CannotRead(names_path.clone(), e))?;

    let mut projects = Vec::new();
    for name in names.lines().filter(|n| !n.is_empty()) {
        let path = ctx.cache_root.join(format!("{}.cache", name));
        if !fsutil::file_exists(&path) {
            return Err(Error::CacheMiss(path));
        }
        let text = fs::read_to_string(&path).map_err(|e| Error::CannotRead(path.clone(), e))?;
        let proj = Project::deserialize(&text).map_err(|detail| corrupt(&path, detail))?;
        projects.push(proj);
    }
    Ok(projects)
}

/// The boundary entry point for the CLI: reuse the serialized project index
/// when the validity predicate holds, otherwise re-parse the manifest and
/// rewrite the cache.
pub fn load_or_build_project_index(ctx: &BuildContext, manifest: &Path) -> Result<Vec<Project>> {
    if is_manifest_cache_valid(ctx, manifest) {
        match load_projects_cache(ctx) {
            Ok(projects) => {
                log::info!("loaded {} project(s) from cache", projects.len());
                return Ok(projects);
            }
            Err(e) => {
                log::warn!("manifest cache unusable ({}); re-parsing", e);
            }
        }
    }

    let manifest = fsutil::absolute_normalized(manifest)?;
    let text = fs::read_to_string(&manifest).map_err(|e| Error::CannotRead(manifest.clone(), e))?;
    let raw = crate::project::parse_manifest(&text)?;

    let mut projects = Vec::new();
    for (name, raw_proj) in raw {
        projects.push(Project::from_raw(&name, raw_proj)?);
    }

    create_projects_cache(ctx, &projects, &manifest)?;
    Ok(projects)
}

/// Remove the whole cache tree. Returns true on success (including when there
/// was nothing to remove).
pub fn remove_all_cache(ctx: &BuildContext) -> bool {
    match fsutil::remove_tree(&ctx.cache_root) {
        Ok(()) => true,
        Err(e) => {
            log::error!("failed to remove cache: {}", e);
            false
        }
    }
}
