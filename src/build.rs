//! The build engine: library phase, incremental partition, parallel compile,
//! and final link. The engine itself is single-threaded; only compile tasks
//! run in parallel, and each task is one synchronous compiler invocation.

use std::{
    collections::hash_map::DefaultHasher,
    fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

use indicatif::{ProgressBar, ProgressStyle};

use crate::cache::{self, BuildContext};
use crate::config::BuildMode;
use crate::error::*;
use crate::fsutil;
use crate::pool::ThreadPool;
use crate::project::{lang_of_file, BuildType, Lang, Library, Project};
use crate::tool::{self, Tool, ToolFamily};

/// What a successful `build_project` reports back to the CLI.
#[derive(Debug)]
pub struct BuildSummary {
    pub artifact: PathBuf,
    pub compiled: usize,
    pub reused: usize,
    pub elapsed: Duration,
}

// ______________________________ compiler selection ______________________________

fn compiler_for_file(proj: &Project, file: &Path) -> Result<Tool> {
    let lang = lang_of_file(file).ok_or_else(|| Error::Config {
        project: proj.name.clone(),
        rule: format!("{:?} is not a C/C++ translation unit", file),
    })?;

    let name = match lang {
        Lang::C => &proj.c_compiler,
        Lang::Cpp => &proj.cpp_compiler,
    };
    let tool = Tool::from_name(name);
    match tool.family {
        ToolFamily::None => Err(Error::Config {
            project: proj.name.clone(),
            rule: format!(
                "no {} compiler specified",
                if lang == Lang::C { "C" } else { "C++" }
            ),
        }),
        ToolFamily::Unknown => Err(Error::Config {
            project: proj.name.clone(),
            rule: format!("unknown compiler '{}'", name),
        }),
        _ => Ok(tool),
    }
}

// The compiler that drives link steps: the C++ one when C++ is in play,
// otherwise the C one.
fn linking_compiler(proj: &Project) -> Result<Tool> {
    if proj.langs.contains(&Lang::Cpp) {
        let tool = Tool::from_name(&proj.cpp_compiler);
        if tool.family != ToolFamily::None && tool.family != ToolFamily::Unknown {
            return Ok(tool);
        }
    }
    let tool = Tool::from_name(&proj.c_compiler);
    if tool.family != ToolFamily::None && tool.family != ToolFamily::Unknown {
        return Ok(tool);
    }
    Err(Error::Config {
        project: proj.name.clone(),
        rule: "no supported compiler to link with".to_string(),
    })
}

// ______________________________ artifact paths ______________________________

/// `path/to/file.cpp -> file_<hash>`, stable across runs so cache hits land
/// on the exact path the linker expects.
pub fn hashed_object_stem(file: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    file.display().to_string().hash(&mut hasher);
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}", stem, hasher.finish())
}

fn object_ext(family: ToolFamily) -> &'static str {
    if family.is_msvc() {
        "obj"
    } else {
        "o"
    }
}

/// The object file a given source compiles to, derived without touching the
/// filesystem.
pub fn derive_object_path(family: ToolFamily, file: &Path, dest_dir: &Path) -> PathBuf {
    dest_dir
        .join(hashed_object_stem(file))
        .with_extension(object_ext(family))
}

/// Final artifact extension per build type and platform.
pub fn output_extension(build_type: BuildType) -> &'static str {
    if cfg!(windows) {
        match build_type {
            BuildType::Executable => ".exe",
            BuildType::StaticLib => ".lib",
            BuildType::SharedLib => ".dll",
        }
    } else if cfg!(target_os = "macos") {
        match build_type {
            BuildType::Executable => "",
            BuildType::StaticLib => ".a",
            BuildType::SharedLib => ".dylib",
        }
    } else {
        match build_type {
            BuildType::Executable => "",
            BuildType::StaticLib => ".a",
            BuildType::SharedLib => ".so",
        }
    }
}

fn artifact_path(dir: &Path, name: &str, build_type: BuildType) -> PathBuf {
    dir.join(format!("{}{}", name, output_extension(build_type)))
}

// ______________________________ command synthesis ______________________________

fn join_tokens(tokens: Vec<String>) -> String {
    tokens
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

// Composition order: compiler, PIC, -c, source, standard, includes, defines,
// extra flags, optimization, output.
fn compile_command(
    proj: &Project,
    file: &Path,
    dest_dir: &Path,
    mode: BuildMode,
    artifact: BuildType,
) -> Result<(String, PathBuf)> {
    let tool = compiler_for_file(proj, file)?;
    let family = tool.family;
    let out = derive_object_path(family, file, dest_dir);

    let mut cmd = vec![tool.exe.clone()];

    // PIC is only meaningful for shared objects; clang emits it by default
    // and MSVC has no notion of it.
    if artifact == BuildType::SharedLib
        && family != ToolFamily::Clang
        && family != ToolFamily::Msvc
    {
        cmd.push(family.position_independent_code().to_string());
    }

    cmd.push(family.compile_only().to_string());
    cmd.push(file.display().to_string());

    match lang_of_file(file) {
        Some(Lang::C) => cmd.push(family.c_standard(proj.c_std)),
        _ => cmd.push(family.cpp_standard(proj.cpp_std)),
    }

    for dir in &proj.include_dirs {
        cmd.push(family.include_dir(dir));
    }

    let (defines, flags, optimization) = match mode {
        BuildMode::Debug => (
            &proj.defines_debug,
            &proj.flags_debug,
            proj.optimization_debug,
        ),
        BuildMode::Release => (
            &proj.defines_release,
            &proj.flags_release,
            proj.optimization_release,
        ),
    };
    for define in defines {
        cmd.push(family.define(define));
    }
    for flag in flags {
        cmd.push(flag.clone());
    }
    cmd.push(family.optimization(optimization).to_string());

    cmd.push(family.output_file(&out));

    Ok((join_tokens(cmd), out))
}

/// Compile one translation unit into `dest_dir` and return the object path.
/// Compiler output is not suppressed, so diagnostics reach the user.
fn compile_file(
    proj: &Project,
    file: &Path,
    dest_dir: &Path,
    mode: BuildMode,
    artifact: BuildType,
) -> Result<PathBuf> {
    let (command, out) = compile_command(proj, file, dest_dir, mode, artifact)?;
    log::info!("compiling {:?}", file);

    let code = tool::run_shell(&command)?;
    if code != 0 {
        return Err(Error::Compile {
            file: file.to_path_buf(),
            code,
        });
    }
    Ok(out)
}

/// Generate the preprocessed `.i` rendition of a source under the project's
/// `src` cache dir. Output is suppressed; the record is bookkeeping only.
fn preprocess_unit(proj: &Project, file: &Path, src_cache_dir: &Path) -> Result<PathBuf> {
    let tool = compiler_for_file(proj, file)?;
    let family = tool.family;
    let out = src_cache_dir
        .join(hashed_object_stem(file))
        .with_extension("i");

    let mut cmd = vec![
        tool.exe.clone(),
        family.preprocess_only().to_string(),
        file.display().to_string(),
        family.output_file(&out),
    ];
    for dir in &proj.include_dirs {
        cmd.push(family.include_dir(dir));
    }
    cmd.push(family.suppress_output().to_string());

    let code = tool::run_shell(&join_tokens(cmd))?;
    if code != 0 {
        return Err(Error::Compile {
            file: file.to_path_buf(),
            code,
        });
    }
    Ok(out)
}

// ______________________________ packaging ______________________________

// Probe order: ar, then lib (MSVC toolchains only), then llvm-ar (Clang
// toolchains only). First hit wins.
fn pick_archiver(family: ToolFamily) -> Result<&'static str> {
    if tool::tool_available("ar") {
        return Ok("ar");
    }
    if family.is_msvc() && tool::tool_available("lib") {
        return Ok("lib");
    }
    if family == ToolFamily::Clang && tool::tool_available("llvm-ar") {
        return Ok("llvm-ar");
    }
    Err(Error::ToolMissing(
        "an archiver: ar, lib (MSVC) or llvm-ar (Clang)".to_string(),
    ))
}

fn link_static_library(
    family: ToolFamily,
    name: &str,
    objects: &[PathBuf],
    out_dir: &Path,
) -> Result<PathBuf> {
    let out = artifact_path(out_dir, name, BuildType::StaticLib);
    let archiver = pick_archiver(family)?;
    log::debug!("packaging '{}' with {}", name, archiver);

    let mut cmd = vec![archiver.to_string()];
    if archiver == "lib" {
        cmd.push(format!("/OUT:{}", out.display()));
    } else {
        cmd.push("rcs".to_string());
        cmd.push(out.display().to_string());
    }
    for obj in objects {
        cmd.push(obj.display().to_string());
    }
    cmd.push(if archiver == "lib" {
        ToolFamily::Msvc.suppress_output().to_string()
    } else {
        tool::SHELL_SUPPRESS.to_string()
    });

    let code = tool::run_shell(&join_tokens(cmd))?;
    if code != 0 {
        // no partial archive left behind
        let _ = fs::remove_file(&out);
        return Err(Error::Link {
            target: name.to_string(),
            code,
        });
    }
    Ok(out)
}

fn link_shared_library(
    proj: &Project,
    name: &str,
    objects: &[PathBuf],
    out_dir: &Path,
) -> Result<PathBuf> {
    let tool = linking_compiler(proj)?;
    let family = tool.family;
    let out = artifact_path(out_dir, name, BuildType::SharedLib);

    let mut cmd = vec![tool.exe.clone(), family.build_shared().to_string()];
    for obj in objects {
        cmd.push(obj.display().to_string());
    }
    // libraries always link with the release flag set
    for flag in &proj.flags_release {
        cmd.push(flag.clone());
    }
    for dir in &proj.include_dirs {
        cmd.push(family.include_dir(dir));
    }
    for sys in &proj.sys_libs {
        cmd.push(family.link_library(sys));
    }
    for prebuilt in &proj.pre_built_libs {
        cmd.push(prebuilt.display().to_string());
    }
    cmd.push(family.output_file(&out));

    let code = tool::run_shell(&join_tokens(cmd))?;
    if code != 0 {
        return Err(Error::Link {
            target: name.to_string(),
            code,
        });
    }

    if cfg!(windows) && family != ToolFamily::Gcc {
        produce_import_library(&out, name, out_dir)?;
    }
    Ok(out)
}

/// Windows only: derive a `.def` from the freshly linked DLL, then turn it
/// into a `.lib` import library. Probe order is fixed; the chosen tool pair
/// is logged so failures are diagnosable.
fn produce_import_library(dll: &Path, name: &str, out_dir: &Path) -> Result<PathBuf> {
    let def = out_dir.join(format!("{}.def", name));
    let lib = out_dir.join(format!("{}.lib", name));

    let (def_tool, def_cmd) = if tool::tool_available("gendef") {
        ("gendef", format!("gendef - {} > {}", dll.display(), def.display()))
    } else if tool::tool_available("dumpbin") {
        (
            "dumpbin",
            format!("dumpbin /exports {} > {}", dll.display(), def.display()),
        )
    } else if tool::tool_available("pexports") {
        (
            "pexports",
            format!("pexports {} > {}", dll.display(), def.display()),
        )
    } else {
        return Err(Error::ToolMissing(format!(
            "a .def generator for '{}': gendef, dumpbin or pexports",
            name
        )));
    };

    let code = tool::run_shell(&def_cmd)?;
    if code != 0 {
        return Err(Error::Link {
            target: format!("{}.def", name),
            code,
        });
    }

    let mut scratch_dll = None;
    let (lib_tool, lib_cmd) = if tool::tool_available("dlltool") {
        (
            "dlltool",
            format!(
                "dlltool -d {} -D {} -l {}",
                def.display(),
                dll.display(),
                lib.display()
            ),
        )
    } else if tool::tool_available("lib") {
        (
            "lib",
            format!(
                "lib /DEF:{} /OUT:{} {}",
                def.display(),
                lib.display(),
                ToolFamily::Msvc.suppress_output()
            ),
        )
    } else if tool::tool_available("gcc") {
        // MinGW can emit the import library while relinking the .def into a
        // throwaway stub; the stub is removed below.
        let stub = out_dir.join(format!("{}_implib.dll", name));
        let cmd = format!(
            "gcc -shared {} -Wl,--out-implib={} -o {} {}",
            def.display(),
            lib.display(),
            stub.display(),
            tool::SHELL_SUPPRESS
        );
        scratch_dll = Some(stub);
        ("gcc", cmd)
    } else {
        return Err(Error::ToolMissing(format!(
            "an import-library tool for '{}': dlltool, lib or gcc",
            name
        )));
    };

    log::info!(
        "import library for '{}': def via {}, lib via {}",
        name,
        def_tool,
        lib_tool
    );

    let code = tool::run_shell(&lib_cmd)?;
    if code != 0 {
        return Err(Error::Link {
            target: format!("{}.lib", name),
            code,
        });
    }

    if let Some(stub) = scratch_dll {
        let _ = fs::remove_file(stub);
    }
    if def_tool == "gendef" {
        let _ = fs::remove_file(&def);
    }
    Ok(lib)
}

fn link_everything(
    proj: &Project,
    objects: &[PathBuf],
    compiled_libs: &[Library],
    mode: BuildMode,
) -> Result<PathBuf> {
    log::info!("linking project '{}'", proj.name);

    let tool = linking_compiler(proj)?;
    let family = tool.family;

    if proj.build_type == BuildType::StaticLib {
        return link_static_library(family, &proj.name, objects, &proj.build_dir);
    }

    let out = artifact_path(&proj.build_dir, &proj.name, proj.build_type);
    if objects.is_empty()
        && compiled_libs.is_empty()
        && proj.pre_built_libs.is_empty()
        && proj.sys_libs.is_empty()
    {
        log::warn!("project '{}' has nothing to link", proj.name);
        return Ok(out);
    }

    let mut cmd = vec![tool.exe.clone()];
    if proj.build_type == BuildType::SharedLib {
        cmd.push(family.build_shared().to_string());
    }
    for obj in objects {
        cmd.push(obj.display().to_string());
    }

    let flags = match mode {
        BuildMode::Debug => &proj.flags_debug,
        BuildMode::Release => &proj.flags_release,
    };
    for flag in flags {
        cmd.push(flag.clone());
    }
    for dir in &proj.include_dirs {
        cmd.push(family.include_dir(dir));
    }
    if !compiled_libs.is_empty() {
        // search path for transitively loaded shared objects
        cmd.push(family.library_dir(&proj.build_dir));
    }
    for lib in compiled_libs {
        cmd.push(lib.path.display().to_string());
    }
    for sys in &proj.sys_libs {
        cmd.push(family.link_library(sys));
    }
    for prebuilt in &proj.pre_built_libs {
        cmd.push(prebuilt.display().to_string());
    }
    cmd.push(family.output_file(&out));

    let code = tool::run_shell(&join_tokens(cmd))?;
    if code != 0 {
        return Err(Error::Link {
            target: proj.name.clone(),
            code,
        });
    }

    if proj.build_type == BuildType::SharedLib && cfg!(windows) && family != ToolFamily::Gcc {
        produce_import_library(&out, &proj.name, &proj.build_dir)?;
    }
    Ok(out)
}

// ______________________________ phases ______________________________

fn progress_bar(len: usize, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("=> "),
    );
    pb.set_message(msg.to_string());
    pb
}

// Dispatch one compile task per file, join, and split the outcomes into
// successes and failures. The queue is always drained; errors abort the
// caller only after every sibling has finished.
fn compile_in_parallel(
    proj: &Arc<Project>,
    files: &[PathBuf],
    dest_dir: &Path,
    mode: BuildMode,
    artifact: BuildType,
    msg: &str,
) -> (Vec<(PathBuf, PathBuf)>, Vec<Error>) {
    let mut pool = ThreadPool::new();
    let (tx, rx) = mpsc::channel::<std::result::Result<(PathBuf, PathBuf), Error>>();
    let pb = progress_bar(files.len(), msg);

    for file in files {
        let proj = Arc::clone(proj);
        let file = file.clone();
        let dest = dest_dir.to_path_buf();
        let tx = tx.clone();
        let pb = pb.clone();
        pool.add_task(move || {
            let outcome =
                compile_file(&proj, &file, &dest, mode, artifact).map(|obj| (file.clone(), obj));
            if outcome.is_ok() {
                pb.println(format!("   built {}", file.display()));
            }
            pb.inc(1);
            let _ = tx.send(outcome);
        });
    }
    drop(tx);
    pool.join_all();
    pb.finish_and_clear();

    let mut compiled = Vec::new();
    let mut errors = Vec::new();
    for outcome in rx {
        match outcome {
            Ok(pair) => compiled.push(pair),
            Err(e) => {
                log::error!("{}", e);
                errors.push(e);
            }
        }
    }
    if let Some(panic) = pool.take_panic() {
        errors.push(Error::Internal(panic));
    }
    (compiled, errors)
}

fn phase_error(mut errors: Vec<Error>) -> Error {
    let failures = errors.len();
    Error::Build {
        failures,
        first: Box::new(errors.remove(0)),
    }
}

fn build_library(ctx: &BuildContext, proj: &Arc<Project>, lib: &Library) -> Result<Library> {
    log::info!("building library '{}'", lib.name);

    let files = fsutil::get_src_files_recursive(&lib.path)?;
    let cache_dir = ctx.library_cache_dir(&proj.name, &lib.name);
    fsutil::create_dir(&cache_dir)?;

    // library translation units are always compiled in release mode
    let (compiled, errors) = compile_in_parallel(
        proj,
        &files,
        &cache_dir,
        BuildMode::Release,
        lib.kind,
        &lib.name,
    );
    if !errors.is_empty() {
        return Err(phase_error(errors));
    }

    let objects: Vec<PathBuf> = compiled.into_iter().map(|(_, obj)| obj).collect();
    let family = linking_compiler(proj)?.family;
    let artifact = match lib.kind {
        BuildType::StaticLib => {
            link_static_library(family, &lib.name, &objects, &proj.build_dir)?
        }
        BuildType::SharedLib => link_shared_library(proj, &lib.name, &objects, &proj.build_dir)?,
        BuildType::Executable => {
            return Err(Error::Config {
                project: proj.name.clone(),
                rule: format!("library '{}' cannot be built as an executable", lib.name),
            })
        }
    };

    log::info!("built library '{}' at {:?}", lib.name, artifact);
    Ok(Library {
        name: lib.name.clone(),
        path: artifact,
        include: lib.include.clone(),
        kind: lib.kind,
    })
}

// Every discovered extension must be covered by the declared language set.
fn check_lang_coverage(proj: &Project, files: &[PathBuf]) -> Result<()> {
    for file in files {
        match lang_of_file(file) {
            Some(lang) if proj.langs.contains(&lang) => {}
            Some(Lang::Cpp) => {
                return Err(Error::Config {
                    project: proj.name.clone(),
                    rule: format!("{:?} is C++ but the project does not declare C++", file),
                })
            }
            Some(Lang::C) => {
                return Err(Error::Config {
                    project: proj.name.clone(),
                    rule: format!("{:?} is C but the project does not declare C", file),
                })
            }
            _ => {}
        }
    }
    Ok(())
}

// Refresh metadata and the preprocessed record for sources that just
// compiled. Runs on the engine thread, between the compile and link phases.
fn refresh_file_records(proj: &Project, sources: &[PathBuf], ctx: &BuildContext) {
    let proj_cache_dir = ctx.project_cache_dir(&proj.name);
    let src_cache_dir = ctx.project_src_dir(&proj.name);

    for file in sources {
        if let Err(e) = cache::update_metadata_cache(file, &proj_cache_dir) {
            log::warn!("couldn't update metadata for {:?}: {}", file, e);
            continue;
        }
        match preprocess_unit(proj, file, &src_cache_dir) {
            Ok(ipp) => {
                if let Err(e) = cache::update_preprocessed_cache(&ipp, &proj_cache_dir) {
                    log::warn!("couldn't update preprocessed record for {:?}: {}", file, e);
                }
            }
            Err(e) => log::warn!("couldn't preprocess {:?}: {}", file, e),
        }
    }
}

/// Build one project end to end: libraries first, then the incremental
/// partition of its own sources, the parallel compile, and the final link.
pub fn build_project(
    ctx: &BuildContext,
    proj: &Project,
    mode: BuildMode,
    clean_build: bool,
) -> Result<BuildSummary> {
    log::info!("building project '{}' [{}]", proj.name, mode);
    let started = Instant::now();

    fsutil::create_dir(&proj.build_dir)?;
    let proj_cache_dir = ctx.project_cache_dir(&proj.name);

    // release builds never trust the per-file cache
    let full_rebuild =
        clean_build || mode == BuildMode::Release || !fsutil::dir_exists(&proj_cache_dir);
    if full_rebuild {
        cache::remove_project_metadata(&proj_cache_dir)?;
    }

    let proj = Arc::new(proj.clone());

    //_____________________ libraries _____________________
    let mut compiled_libs = Vec::new();
    for lib in &proj.libs {
        compiled_libs.push(build_library(ctx, &proj, lib)?);
    }

    //_____________________ project sources _____________________
    let files = fsutil::get_src_files_recursive(&proj.src)?;
    check_lang_coverage(&proj, &files)?;

    let src_cache_dir = ctx.project_src_dir(&proj.name);
    fsutil::create_dir(&src_cache_dir)?;

    let metadata = if full_rebuild {
        Default::default()
    } else {
        match cache::load_metadata_cache(&proj_cache_dir) {
            Ok(map) => map,
            Err(Error::CacheMiss(path)) => {
                log::debug!("no metadata cache at {:?}; compiling everything", path);
                Default::default()
            }
            Err(e) => {
                log::warn!("{}; compiling everything", e);
                Default::default()
            }
        }
    };

    let mut needs_recompile = Vec::new();
    let mut reuse_objects = Vec::new();
    for file in &files {
        if full_rebuild || cache::needs_recompile(file, &metadata) {
            needs_recompile.push(file.clone());
        } else {
            // no filesystem check: the path is derived, not discovered
            let family = compiler_for_file(&proj, file)?.family;
            reuse_objects.push(derive_object_path(family, file, &src_cache_dir));
        }
    }
    log::info!(
        "{} file(s) to compile, {} reused",
        needs_recompile.len(),
        reuse_objects.len()
    );

    //_____________________ parallel compile _____________________
    let (compiled, errors) = compile_in_parallel(
        &proj,
        &needs_recompile,
        &src_cache_dir,
        mode,
        proj.build_type,
        &proj.name,
    );

    let succeeded: Vec<PathBuf> = compiled.iter().map(|(src, _)| src.clone()).collect();
    if full_rebuild && errors.is_empty() {
        if let Err(e) = cache::create_metadata_cache(&files, &proj_cache_dir) {
            log::warn!("couldn't rewrite metadata cache: {}", e);
        }
        let mut records = Vec::new();
        for file in &files {
            match preprocess_unit(&proj, file, &src_cache_dir) {
                Ok(ipp) => records.push(ipp),
                Err(e) => log::warn!("couldn't preprocess {:?}: {}", file, e),
            }
        }
        if let Err(e) = cache::create_preprocessed_cache(&records, &proj_cache_dir) {
            log::warn!("couldn't rewrite preprocessed cache: {}", e);
        }
    } else {
        refresh_file_records(&proj, &succeeded, ctx);
    }

    if !errors.is_empty() {
        return Err(phase_error(errors));
    }

    //_____________________ final link _____________________
    let mut objects: Vec<PathBuf> = compiled.into_iter().map(|(_, obj)| obj).collect();
    let compiled_count = objects.len();
    objects.extend(reuse_objects.iter().cloned());

    let artifact = link_everything(&proj, &objects, &compiled_libs, mode)?;

    let elapsed = started.elapsed();
    log::info!(
        "built project '{}' in {}s {}ms",
        proj.name,
        elapsed.as_secs(),
        elapsed.subsec_millis()
    );

    Ok(BuildSummary {
        artifact,
        compiled: compiled_count,
        reused: reuse_objects.len(),
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn touch(path: &Path, content: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn test_project(root: &Path) -> Project {
        Project {
            name: "hello".to_string(),
            version: "0.0.1".to_string(),
            langs: vec![Lang::C, Lang::Cpp],
            c_std: 11,
            cpp_std: 14,
            c_compiler: "gcc".to_string(),
            cpp_compiler: "g++".to_string(),
            build_type: BuildType::Executable,
            build_dir: root.join("build"),
            src: root.join("s"),
            env: PathBuf::new(),
            include_dirs: vec![root.join("s")],
            libs: Vec::new(),
            pre_built_libs: Vec::new(),
            sys_libs: Vec::new(),
            defines_debug: vec!["DEBUG".to_string()],
            defines_release: vec!["NDEBUG".to_string()],
            optimization_debug: 0,
            optimization_release: 2,
            flags_debug: Vec::new(),
            flags_release: Vec::new(),
        }
    }

    #[test]
    fn object_paths_are_deterministic() {
        let file = Path::new("/proj/s/a.cpp");
        let dest = Path::new("/cache/src");
        let first = derive_object_path(ToolFamily::Gcc, file, dest);
        let second = derive_object_path(ToolFamily::Gcc, file, dest);
        assert_eq!(first, second);
        assert!(first.to_string_lossy().contains("a_"));
        assert_eq!(first.extension().unwrap(), "o");

        let msvc = derive_object_path(ToolFamily::Msvc, file, dest);
        assert_eq!(msvc.extension().unwrap(), "obj");

        let other = derive_object_path(ToolFamily::Gcc, Path::new("/proj/s/b.cpp"), dest);
        assert_ne!(first, other);
    }

    #[test]
    fn same_basename_in_different_dirs_does_not_collide() {
        let dest = Path::new("/cache/src");
        let a = derive_object_path(ToolFamily::Gcc, Path::new("/p/one/util.c"), dest);
        let b = derive_object_path(ToolFamily::Gcc, Path::new("/p/two/util.c"), dest);
        assert_ne!(a, b);
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    #[test]
    fn linux_output_extensions() {
        assert_eq!(output_extension(BuildType::Executable), "");
        assert_eq!(output_extension(BuildType::StaticLib), ".a");
        assert_eq!(output_extension(BuildType::SharedLib), ".so");
    }

    #[test]
    fn compile_command_posix_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let proj = test_project(tmp.path());
        let file = proj.src.join("a.cpp");
        let dest = tmp.path().join("cache");

        let (cmd, out) =
            compile_command(&proj, &file, &dest, BuildMode::Debug, BuildType::Executable).unwrap();
        assert!(cmd.starts_with("g++ -c "));
        assert!(cmd.contains("-std=c++14"));
        assert!(cmd.contains(&format!("-I{}", proj.src.display())));
        assert!(cmd.contains("-DDEBUG"));
        assert!(!cmd.contains("-DNDEBUG"));
        assert!(cmd.contains("-O0"));
        assert!(cmd.ends_with(&format!("-o {}", out.display())));
        assert!(!cmd.contains("-fPIC"));

        let (release, _) =
            compile_command(&proj, &file, &dest, BuildMode::Release, BuildType::Executable)
                .unwrap();
        assert!(release.contains("-DNDEBUG"));
        assert!(release.contains("-O2"));
    }

    #[test]
    fn pic_rules_per_family() {
        let tmp = tempfile::tempdir().unwrap();
        let mut proj = test_project(tmp.path());
        let file = proj.src.join("a.c");
        let dest = tmp.path().join("cache");

        let (gcc_shared, _) =
            compile_command(&proj, &file, &dest, BuildMode::Release, BuildType::SharedLib).unwrap();
        assert!(gcc_shared.contains("-fPIC"));

        proj.c_compiler = "clang".to_string();
        let (clang_shared, _) =
            compile_command(&proj, &file, &dest, BuildMode::Release, BuildType::SharedLib).unwrap();
        assert!(!clang_shared.contains("-fPIC"));
    }

    #[test]
    fn msvc_compile_command_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let mut proj = test_project(tmp.path());
        proj.c_compiler = "cl".to_string();
        proj.cpp_compiler = "cl".to_string();
        let dest = tmp.path().join("cache");

        let (cpp_cmd, out) = compile_command(
            &proj,
            &proj.src.join("a.cpp"),
            &dest,
            BuildMode::Debug,
            BuildType::Executable,
        )
        .unwrap();
        assert!(cpp_cmd.starts_with("cl /c "));
        assert!(cpp_cmd.contains("/std:c++14"));
        assert!(cpp_cmd.contains("/DDEBUG"));
        assert!(cpp_cmd.contains("/Od"));
        assert!(cpp_cmd.contains(&format!("/Fo{}", out.display())));
        assert_eq!(out.extension().unwrap(), "obj");

        // MSVC has no C-standard switch
        let (c_cmd, _) = compile_command(
            &proj,
            &proj.src.join("b.c"),
            &dest,
            BuildMode::Debug,
            BuildType::Executable,
        )
        .unwrap();
        assert!(!c_cmd.contains("/std:c"));
    }

    #[test]
    fn unknown_compiler_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut proj = test_project(tmp.path());
        proj.c_compiler = "some-exotic-cc".to_string();
        let err = compile_command(
            &proj,
            &proj.src.join("a.c"),
            tmp.path(),
            BuildMode::Debug,
            BuildType::Executable,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn lang_coverage_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let mut proj = test_project(tmp.path());
        proj.langs = vec![Lang::C];
        let files = vec![tmp.path().join("a.cpp")];
        assert!(matches!(
            check_lang_coverage(&proj, &files),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn empty_src_builds_without_crashing() {
        let tmp = tempfile::tempdir().unwrap();
        fsutil::create_dir(tmp.path().join("s")).unwrap();
        let proj = test_project(tmp.path());
        let ctx = BuildContext::new(tmp.path().join("YMakeCache")).unwrap();

        let summary = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap();
        assert_eq!(summary.compiled, 0);
        assert_eq!(summary.reused, 0);
    }

    #[test]
    fn empty_static_archive_builds_when_ar_exists() {
        if !tool::tool_available("ar") {
            return;
        }
        let tmp = tempfile::tempdir().unwrap();
        let out = link_static_library(ToolFamily::Gcc, "empty", &[], tmp.path()).unwrap();
        assert!(out.is_file());
    }

    // End-to-end scenarios, driven through a real gcc when one is present.
    #[test]
    fn incremental_build_scenarios() {
        if !tool::tool_available("gcc") {
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("s");
        fsutil::create_dir(&src).unwrap();
        touch(&src.join("a.c"), "int answer(void) { return 42; }\n");
        touch(
            &src.join("b.c"),
            "int answer(void);\nint main(void) { return answer() - 42; }\n",
        );

        let mut proj = test_project(tmp.path());
        proj.langs = vec![Lang::C];
        proj.cpp_compiler = String::new();
        let ctx = BuildContext::new(tmp.path().join("YMakeCache")).unwrap();

        // cold build: everything compiles, artifact exists at the derived path
        let cold = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap();
        assert_eq!(cold.compiled, 2);
        assert_eq!(cold.reused, 0);
        assert!(cold.artifact.is_file());
        let src_cache = ctx.project_src_dir("hello");
        for file in fsutil::get_src_files_recursive(&src).unwrap() {
            assert!(derive_object_path(ToolFamily::Gcc, &file, &src_cache).is_file());
        }

        // warm build: nothing recompiles, metadata is byte-identical
        let meta_path = ctx.project_cache_dir("hello").join("metadata.cache");
        let before = std::fs::read(&meta_path).unwrap();
        let warm = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap();
        assert_eq!(warm.compiled, 0);
        assert_eq!(warm.reused, 2);
        assert_eq!(std::fs::read(&meta_path).unwrap(), before);

        // one edit (size change): exactly that file recompiles
        touch(
            &src.join("a.c"),
            "int answer(void) { return 42; } /* edited */\n",
        );
        let edited = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap();
        assert_eq!(edited.compiled, 1);
        assert_eq!(edited.reused, 1);

        // release never trusts the cache
        let release = build_project(&ctx, &proj, BuildMode::Release, false).unwrap();
        assert_eq!(release.compiled, 2);
        assert_eq!(release.reused, 0);

        // after removing all cache the next build is cold again
        assert!(cache::remove_all_cache(&ctx));
        let again = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap();
        assert_eq!(again.compiled, 2);
    }

    #[test]
    fn compile_failure_aborts_before_linking() {
        if !tool::tool_available("gcc") {
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("s");
        fsutil::create_dir(&src).unwrap();
        touch(&src.join("ok.c"), "int fine(void) { return 0; }\n");
        touch(&src.join("bad.c"), "this is not C\n");

        let mut proj = test_project(tmp.path());
        proj.langs = vec![Lang::C];
        proj.cpp_compiler = String::new();
        let ctx = BuildContext::new(tmp.path().join("YMakeCache")).unwrap();

        let err = build_project(&ctx, &proj, BuildMode::Debug, false).unwrap_err();
        match err {
            Error::Build { failures, first } => {
                assert_eq!(failures, 1);
                assert!(matches!(*first, Error::Compile { .. }));
            }
            other => panic!("expected a build error, got {}", other),
        }
        // the artifact must not have been linked
        assert!(!artifact_path(&proj.build_dir, "hello", BuildType::Executable).is_file());
    }
}
