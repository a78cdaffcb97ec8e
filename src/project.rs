//! The project model: raw manifest records, the validated [`Project`] with
//! defaults and macro expansion applied, and the line-oriented serialization
//! used by the manifest-validity cache.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::*;
use crate::fsutil;

/// Languages a project may declare.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Lang {
    C,
    Cpp,
}

impl Lang {
    fn ordinal(self) -> u32 {
        match self {
            Lang::C => 0,
            Lang::Cpp => 1,
        }
    }

    fn from_ordinal(ord: u32) -> Option<Lang> {
        match ord {
            0 => Some(Lang::C),
            1 => Some(Lang::Cpp),
            _ => None,
        }
    }
}

/// Classify a source file by extension (case-insensitive). Returns `None` for
/// anything that is not a C/C++ translation unit.
pub fn lang_of_file(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "c" => Some(Lang::C),
        "cpp" | "cc" | "cxx" | "c++" | "cp" | "tpp" => Some(Lang::Cpp),
        _ => None,
    }
}

/// What a buildable unit links into.
#[derive(parse_display::Display, Copy, Clone, Debug, PartialEq, Eq, educe::Educe)]
#[educe(Default)]
pub enum BuildType {
    #[display("executable")]
    #[educe(Default)]
    Executable,

    #[display("static library")]
    StaticLib,

    #[display("shared library")]
    SharedLib,
}

impl BuildType {
    fn ordinal(self) -> u32 {
        match self {
            BuildType::Executable => 0,
            BuildType::StaticLib => 1,
            BuildType::SharedLib => 2,
        }
    }

    fn from_ordinal(ord: u32) -> Option<BuildType> {
        match ord {
            0 => Some(BuildType::Executable),
            1 => Some(BuildType::StaticLib),
            2 => Some(BuildType::SharedLib),
            _ => None,
        }
    }
}

/// A library compiled from source as part of its parent project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    pub path: PathBuf,
    /// Header dir exported to the parent project; empty when the library has
    /// none.
    pub include: PathBuf,
    pub kind: BuildType,
}

/// One buildable unit, frozen after validation and macro expansion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub version: String,
    pub langs: Vec<Lang>,
    pub c_std: u32,
    pub cpp_std: u32,
    pub c_compiler: String,
    pub cpp_compiler: String,
    pub build_type: BuildType,
    pub build_dir: PathBuf,
    pub src: PathBuf,
    /// Path of the environment file, empty when none was declared.
    pub env: PathBuf,
    pub include_dirs: Vec<PathBuf>,
    pub libs: Vec<Library>,
    pub pre_built_libs: Vec<PathBuf>,
    pub sys_libs: Vec<String>,
    pub defines_debug: Vec<String>,
    pub defines_release: Vec<String>,
    pub optimization_debug: u32,
    pub optimization_release: u32,
    pub flags_debug: Vec<String>,
    pub flags_release: Vec<String>,
}

// ______________________________ raw manifest ______________________________

/// The configurations extracted from one project table of the manifest,
/// before validation.
#[derive(Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RawProject {
    pub version: Option<String>,
    pub lang: Option<OneOrMany>,
    pub c: Option<LangTable>,
    pub cpp: Option<LangTable>,
    pub build: Option<BuildTable>,
    pub src: Option<String>,
    pub env: Option<String>,
    pub includes: Option<Vec<String>>,
    pub libs: Option<Vec<RawLibrary>>,
    pub built: Option<Vec<String>>,
    pub sys: Option<Vec<String>>,
    pub compiler: Option<CompilerTable>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Deserialize, Default)]
pub struct LangTable {
    pub std: Option<u32>,
    pub compiler: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct BuildTable {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub dir: Option<String>,
}

#[derive(Deserialize)]
pub struct RawLibrary {
    pub name: String,
    pub path: String,
    pub include: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct CompilerTable {
    pub defines: Option<ModeLists>,
    pub optimization: Option<ModeInts>,
    pub flags: Option<ModeLists>,
}

#[derive(Deserialize, Default)]
pub struct ModeLists {
    pub debug: Option<Vec<String>>,
    pub release: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
pub struct ModeInts {
    pub debug: Option<u32>,
    pub release: Option<u32>,
}

/// Parse the manifest text: one top-level table per project.
pub fn parse_manifest(text: &str) -> Result<BTreeMap<String, RawProject>> {
    toml::from_str(text).map_err(Error::ManifestParse)
}

// ______________________________ validation ______________________________

fn config_err(project: &str, rule: &str) -> Error {
    Error::Config {
        project: project.to_string(),
        rule: rule.to_string(),
    }
}

impl Project {
    /// Validate a raw manifest record: apply defaults, enforce the model
    /// invariants, expand `$(NAME)` macros, and normalize every path. The
    /// returned value is treated as read-only by the rest of the crate.
    pub fn from_raw(name: &str, raw: RawProject) -> Result<Project> {
        let mut langs = Vec::new();
        for lang in raw.lang.map(OneOrMany::into_vec).unwrap_or_default() {
            match lang.as_str() {
                "C" => langs.push(Lang::C),
                "C++" | "CPP" | "CXX" => langs.push(Lang::Cpp),
                other => {
                    return Err(config_err(name, &format!("unknown language '{}'", other)))
                }
            }
        }
        if langs.is_empty() {
            return Err(config_err(name, "no language declared (lang = [\"C\", \"C++\"])"));
        }

        let c = raw.c.unwrap_or_default();
        let cpp = raw.cpp.unwrap_or_default();

        let c_compiler = if langs.contains(&Lang::C) {
            c.compiler
                .ok_or_else(|| config_err(name, "no C compiler specified (c.compiler)"))?
        } else {
            String::new()
        };
        let cpp_compiler = if langs.contains(&Lang::Cpp) {
            cpp.compiler
                .ok_or_else(|| config_err(name, "no C++ compiler specified (cpp.compiler)"))?
        } else {
            String::new()
        };

        let c_std = c.std.unwrap_or(11);
        let cpp_std = cpp.std.unwrap_or(14);

        let build = raw.build.unwrap_or_default();
        let build_type = match build.kind.as_deref() {
            None | Some("executable") => BuildType::Executable,
            Some("static") => BuildType::StaticLib,
            Some("shared") => BuildType::SharedLib,
            Some(other) => {
                return Err(config_err(
                    name,
                    &format!("unsupported build type '{}' (executable, static, shared)", other),
                ))
            }
        };
        let build_dir = build.dir.unwrap_or_else(|| "./build".to_string());

        let src = raw
            .src
            .ok_or_else(|| config_err(name, "no source directory specified (src)"))?;

        // Includes default to the source tree itself, like most hand-written
        // makefiles assume.
        let mut include_dirs = match raw.includes {
            Some(dirs) if !dirs.is_empty() => dirs,
            _ => {
                log::warn!("project '{}' declares no include dirs; using src", name);
                vec![src.clone()]
            }
        };

        let mut libs = Vec::new();
        for raw_lib in raw.libs.unwrap_or_default() {
            let kind = match raw_lib.kind.as_deref() {
                Some("static") => BuildType::StaticLib,
                Some("shared") => BuildType::SharedLib,
                Some("executable") => {
                    return Err(config_err(
                        name,
                        &format!("library '{}' cannot be built as an executable", raw_lib.name),
                    ))
                }
                Some(other) => {
                    return Err(config_err(
                        name,
                        &format!(
                            "unsupported type '{}' for library '{}' (static, shared)",
                            other, raw_lib.name
                        ),
                    ))
                }
                None => {
                    return Err(config_err(
                        name,
                        &format!("no type specified for library '{}' (static, shared)", raw_lib.name),
                    ))
                }
            };

            let include = raw_lib.include.unwrap_or_default();
            if !include.is_empty() && !include_dirs.contains(&include) {
                include_dirs.push(include.clone());
            }

            libs.push(Library {
                name: raw_lib.name,
                path: PathBuf::from(raw_lib.path),
                include: PathBuf::from(include),
                kind,
            });
        }

        let compiler = raw.compiler.unwrap_or_default();
        let defines = compiler.defines.unwrap_or_default();
        let optimization = compiler.optimization.unwrap_or_default();
        let flags = compiler.flags.unwrap_or_default();

        let mut proj = Project {
            name: name.to_string(),
            version: raw.version.unwrap_or_else(|| "0.0.1".to_string()),
            langs,
            c_std,
            cpp_std,
            c_compiler,
            cpp_compiler,
            build_type,
            build_dir: PathBuf::from(build_dir),
            src: PathBuf::from(src),
            env: PathBuf::from(raw.env.unwrap_or_default()),
            include_dirs: include_dirs.into_iter().map(PathBuf::from).collect(),
            libs,
            pre_built_libs: raw
                .built
                .unwrap_or_default()
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            sys_libs: raw.sys.unwrap_or_default(),
            defines_debug: defines.debug.unwrap_or_default(),
            defines_release: defines.release.unwrap_or_default(),
            optimization_debug: optimization.debug.unwrap_or(0),
            optimization_release: optimization.release.unwrap_or(2),
            flags_debug: flags.debug.unwrap_or_default(),
            flags_release: flags.release.unwrap_or_default(),
        };

        proj.expand_macros()?;
        proj.normalize_paths()?;
        Ok(proj)
    }

    // The one mutation a project goes through before it is frozen: replace
    // every `$(NAME)` with its value from the environment file, with the
    // `YM_*` built-ins overriding user entries.
    fn expand_macros(&mut self) -> Result<()> {
        let mut env = HashMap::new();

        if !self.env.as_os_str().is_empty() {
            let env_path = fsutil::absolute_normalized(&self.env)?;
            let text = fs::read_to_string(&env_path)
                .map_err(|e| Error::CannotRead(env_path.clone(), e))?;
            env = parse_env_file(&text);
        }

        let cwd = std::env::current_dir()
            .map_err(|e| Error::CurrentDirInvalid(PathBuf::from("."), e))?;
        env.insert("YM_PROJECT_NAME".to_string(), self.name.clone());
        env.insert("YM_CURRENT_DIR".to_string(), cwd.display().to_string());
        env.insert("YM_SRC_DIR".to_string(), self.src.display().to_string());
        env.insert("YM_BUILD_DIR".to_string(), self.build_dir.display().to_string());

        let ex = |s: &str| macro_expand(s, &env);
        let ex_path = |p: &Path| PathBuf::from(macro_expand(&p.display().to_string(), &env));

        self.name = ex(&self.name);
        self.version = ex(&self.version);
        self.c_compiler = ex(&self.c_compiler);
        self.cpp_compiler = ex(&self.cpp_compiler);
        self.build_dir = ex_path(&self.build_dir);
        self.src = ex_path(&self.src);
        self.include_dirs = self.include_dirs.iter().map(|p| ex_path(p)).collect();
        for lib in &mut self.libs {
            lib.name = macro_expand(&lib.name, &env);
            lib.path = PathBuf::from(macro_expand(&lib.path.display().to_string(), &env));
            lib.include = PathBuf::from(macro_expand(&lib.include.display().to_string(), &env));
        }
        self.pre_built_libs = self.pre_built_libs.iter().map(|p| ex_path(p)).collect();
        self.sys_libs = self.sys_libs.iter().map(|s| ex(s)).collect();
        self.defines_debug = self.defines_debug.iter().map(|s| ex(s)).collect();
        self.defines_release = self.defines_release.iter().map(|s| ex(s)).collect();
        self.flags_debug = self.flags_debug.iter().map(|s| ex(s)).collect();
        self.flags_release = self.flags_release.iter().map(|s| ex(s)).collect();

        Ok(())
    }

    fn normalize_paths(&mut self) -> Result<()> {
        self.src = fsutil::absolute_normalized(&self.src)?;
        self.build_dir = fsutil::absolute_normalized(&self.build_dir)?;
        if !self.env.as_os_str().is_empty() {
            self.env = fsutil::absolute_normalized(&self.env)?;
        }

        let mut dirs = Vec::new();
        for dir in &self.include_dirs {
            let dir = fsutil::absolute_normalized(dir)?;
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        self.include_dirs = dirs;

        for lib in &mut self.libs {
            lib.path = fsutil::absolute_normalized(&lib.path)?;
            if !lib.include.as_os_str().is_empty() {
                lib.include = fsutil::absolute_normalized(&lib.include)?;
            }
        }
        for lib in &mut self.pre_built_libs {
            *lib = fsutil::absolute_normalized(&*lib)?;
        }
        Ok(())
    }

    /// Human-readable rendition of the project, for the `info` command.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Project: {} (v{})\n", self.name, self.version));

        out.push_str("  Languages:\n");
        for lang in &self.langs {
            match lang {
                Lang::Cpp => out.push_str(&format!(
                    "    C++\tstd: c++{}\tcompiler: {}\n",
                    self.cpp_std, self.cpp_compiler
                )),
                Lang::C => out.push_str(&format!(
                    "    C\tstd: c{}\tcompiler: {}\n",
                    self.c_std, self.c_compiler
                )),
            }
        }

        out.push_str(&format!("  Build Type: {}\n", self.build_type));
        out.push_str(&format!("  Source Directory: {}\n", self.src.display()));
        out.push_str(&format!("  Build Directory: {}\n", self.build_dir.display()));
        if !self.env.as_os_str().is_empty() {
            out.push_str(&format!("  Env File: {}\n", self.env.display()));
        }

        if !self.include_dirs.is_empty() {
            out.push_str("  Include Directories:\n");
            for dir in &self.include_dirs {
                out.push_str(&format!("    {}\n", dir.display()));
            }
        }

        if !self.libs.is_empty() {
            out.push_str("  Libraries:\n");
            for lib in &self.libs {
                out.push_str(&format!(
                    "    {} ({})\t{}\n",
                    lib.name,
                    lib.kind,
                    lib.path.display()
                ));
            }
        }
        if !self.pre_built_libs.is_empty() {
            out.push_str("  Pre-built Libraries:\n");
            for lib in &self.pre_built_libs {
                out.push_str(&format!("    {}\n", lib.display()));
            }
        }
        if !self.sys_libs.is_empty() {
            out.push_str(&format!("  System Libraries: {}\n", self.sys_libs.join(" ")));
        }

        if !self.defines_debug.is_empty() {
            out.push_str(&format!("  Debug Defines: {}\n", self.defines_debug.join(" ")));
        }
        if !self.defines_release.is_empty() {
            out.push_str(&format!(
                "  Release Defines: {}\n",
                self.defines_release.join(" ")
            ));
        }
        if !self.flags_debug.is_empty() {
            out.push_str(&format!("  Debug Flags: {}\n", self.flags_debug.join(" ")));
        }
        if !self.flags_release.is_empty() {
            out.push_str(&format!("  Release Flags: {}\n", self.flags_release.join(" ")));
        }
        out.push_str(&format!(
            "  Optimization: debug -O{}, release -O{}\n",
            self.optimization_debug, self.optimization_release
        ));

        out
    }
}

/// Replace every `$(NAME)` in `s` with `env[NAME]`; unknown names expand to
/// the empty string. Single-pass, so it is idempotent as long as the
/// environment values contain no `$()` sequences themselves.
pub fn macro_expand(s: &str, env: &HashMap<String, String>) -> String {
    let re = regex::Regex::new(r"\$\(([A-Za-z0-9_]+)\)").unwrap();
    re.replace_all(s, |caps: &regex::Captures| {
        env.get(&caps[1]).cloned().unwrap_or_default()
    })
    .into_owned()
}

/// Parse `KEY=VALUE` lines. Values may be double-quoted (outer quotes are
/// stripped, no escapes); lines without `=` are skipped.
pub fn parse_env_file(text: &str) -> HashMap<String, String> {
    let mut env = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        let eq = match line.find('=') {
            Some(i) => i,
            None => continue,
        };
        let key = line[..eq].trim().to_string();
        let mut value = line[eq + 1..].trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            env.insert(key, value.to_string());
        }
    }
    env
}

// ______________________________ serialization ______________________________

fn push_vec(out: &mut String, items: &[String]) {
    out.push_str(&format!("{}\n", items.len()));
    for item in items {
        out.push_str(item);
        out.push('\n');
    }
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> LineReader<'a> {
    fn next(&mut self) -> std::result::Result<&'a str, String> {
        self.lines.next().ok_or_else(|| "unexpected end of record".to_string())
    }

    fn next_u32(&mut self) -> std::result::Result<u32, String> {
        let line = self.next()?;
        line.parse::<u32>()
            .map_err(|_| format!("expected an integer, found '{}'", line))
    }

    fn next_vec(&mut self) -> std::result::Result<Vec<String>, String> {
        let count = self.next_u32()? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(self.next()?.to_string());
        }
        Ok(items)
    }
}

impl Project {
    /// Serialize into the newline-delimited record stored at
    /// `<cacheRoot>/<name>.cache`. Vectors are length-prefixed; enums are
    /// written as their integer ordinal. Field order is fixed.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.name);
        out.push('\n');
        out.push_str(&self.version);
        out.push('\n');

        out.push_str(&format!("{}\n", self.langs.len()));
        for lang in &self.langs {
            out.push_str(&format!("{}\n", lang.ordinal()));
        }

        out.push_str(&format!("{}\n", self.c_std));
        out.push_str(&format!("{}\n", self.cpp_std));
        out.push_str(&self.c_compiler);
        out.push('\n');
        out.push_str(&self.cpp_compiler);
        out.push('\n');
        out.push_str(&format!("{}\n", self.build_type.ordinal()));
        out.push_str(&format!("{}\n", self.build_dir.display()));
        out.push_str(&format!("{}\n", self.src.display()));
        out.push_str(&format!("{}\n", self.env.display()));

        push_vec(
            &mut out,
            &self
                .include_dirs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
        );

        out.push_str(&format!("{}\n", self.libs.len()));
        for lib in &self.libs {
            out.push_str(&lib.name);
            out.push('\n');
            out.push_str(&format!("{}\n", lib.path.display()));
            out.push_str(&format!("{}\n", lib.include.display()));
            out.push_str(&format!("{}\n", lib.kind.ordinal()));
        }

        push_vec(
            &mut out,
            &self
                .pre_built_libs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>(),
        );
        push_vec(&mut out, &self.sys_libs);
        push_vec(&mut out, &self.defines_debug);
        push_vec(&mut out, &self.defines_release);

        out.push_str(&format!("{}\n", self.optimization_debug));
        out.push_str(&format!("{}\n", self.optimization_release));

        push_vec(&mut out, &self.flags_debug);
        push_vec(&mut out, &self.flags_release);

        out
    }

    /// Strict inverse of [`Project::serialize`]. Returns a description of the
    /// first deviation on malformed input; the cache layer wraps it into a
    /// `CacheCorrupt` error.
    pub fn deserialize(text: &str) -> std::result::Result<Project, String> {
        let mut r = LineReader { lines: text.lines() };

        let name = r.next()?.to_string();
        let version = r.next()?.to_string();

        let lang_count = r.next_u32()? as usize;
        let mut langs = Vec::with_capacity(lang_count);
        for _ in 0..lang_count {
            let ord = r.next_u32()?;
            langs.push(Lang::from_ordinal(ord).ok_or_else(|| format!("bad language ordinal {}", ord))?);
        }

        let c_std = r.next_u32()?;
        let cpp_std = r.next_u32()?;
        let c_compiler = r.next()?.to_string();
        let cpp_compiler = r.next()?.to_string();
        let build_ord = r.next_u32()?;
        let build_type = BuildType::from_ordinal(build_ord)
            .ok_or_else(|| format!("bad build type ordinal {}", build_ord))?;
        let build_dir = PathBuf::from(r.next()?);
        let src = PathBuf::from(r.next()?);
        let env = PathBuf::from(r.next()?);

        let include_dirs = r.next_vec()?.into_iter().map(PathBuf::from).collect();

        let lib_count = r.next_u32()? as usize;
        let mut libs = Vec::with_capacity(lib_count);
        for _ in 0..lib_count {
            let name = r.next()?.to_string();
            let path = PathBuf::from(r.next()?);
            let include = PathBuf::from(r.next()?);
            let ord = r.next_u32()?;
            let kind = BuildType::from_ordinal(ord)
                .ok_or_else(|| format!("bad library type ordinal {}", ord))?;
            libs.push(Library { name, path, include, kind });
        }

        let pre_built_libs = r.next_vec()?.into_iter().map(PathBuf::from).collect();
        let sys_libs = r.next_vec()?;
        let defines_debug = r.next_vec()?;
        let defines_release = r.next_vec()?;
        let optimization_debug = r.next_u32()?;
        let optimization_release = r.next_u32()?;
        let flags_debug = r.next_vec()?;
        let flags_release = r.next_vec()?;

        if let Some(extra) = r.lines.next() {
            if !extra.is_empty() {
                return Err(format!("trailing data '{}'", extra));
            }
        }

        Ok(Project {
            name,
            version,
            langs,
            c_std,
            cpp_std,
            c_compiler,
            cpp_compiler,
            build_type,
            build_dir,
            src,
            env,
            include_dirs,
            libs,
            pre_built_libs,
            sys_libs,
            defines_debug,
            defines_release,
            optimization_debug,
            optimization_release,
            flags_debug,
            flags_release,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_from_toml(text: &str) -> (String, RawProject) {
        let mut manifest = parse_manifest(text).unwrap();
        let name = manifest.keys().next().unwrap().clone();
        let raw = manifest.remove(&name).unwrap();
        (name, raw)
    }

    fn sample_project() -> Project {
        let (name, raw) = raw_from_toml(
            r#"
            [hello]
            lang = ["C++", "C"]
            c.std = 17
            c.compiler = "gcc"
            cpp.compiler = "g++"
            build.type = "executable"
            build.dir = "./build"
            src = "./s"
            includes = ["./s", "./include"]
            sys = ["m", "pthread"]

            [hello.compiler]
            defines.debug = ["DEBUG"]
            defines.release = ["NDEBUG"]
            optimization.release = 3
            flags.debug = ["-g"]
            "#,
        );
        Project::from_raw(&name, raw).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let proj = sample_project();
        assert_eq!(proj.version, "0.0.1");
        assert_eq!(proj.cpp_std, 14);
        assert_eq!(proj.c_std, 17);
        assert_eq!(proj.build_type, BuildType::Executable);
        assert_eq!(proj.optimization_debug, 0);
        assert_eq!(proj.optimization_release, 3);
        assert!(proj.src.is_absolute());
        assert!(proj.build_dir.is_absolute());
        assert!(proj.include_dirs.iter().all(|d| d.is_absolute()));
    }

    #[test]
    fn missing_compiler_for_declared_language_is_fatal() {
        let (name, raw) = raw_from_toml(
            r#"
            [broken]
            lang = ["C++"]
            src = "./s"
            "#,
        );
        assert!(matches!(
            Project::from_raw(&name, raw),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn unknown_language_is_fatal() {
        let (name, raw) = raw_from_toml(
            r#"
            [broken]
            lang = ["Fortran"]
            src = "./s"
            "#,
        );
        assert!(matches!(
            Project::from_raw(&name, raw),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn unsupported_build_type_is_fatal() {
        let (name, raw) = raw_from_toml(
            r#"
            [broken]
            lang = ["C"]
            c.compiler = "gcc"
            build.type = "banana"
            src = "./s"
            "#,
        );
        assert!(matches!(
            Project::from_raw(&name, raw),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn executable_library_is_rejected() {
        let (name, raw) = raw_from_toml(
            r#"
            [broken]
            lang = ["C"]
            c.compiler = "gcc"
            src = "./s"
            libs = [{name = "engine", path = "./engine", include = "./engine/include", type = "executable"}]
            "#,
        );
        assert!(matches!(
            Project::from_raw(&name, raw),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn library_include_is_folded_into_project_includes() {
        let (name, raw) = raw_from_toml(
            r#"
            [app]
            lang = ["C"]
            c.compiler = "gcc"
            src = "./s"
            includes = ["./s"]
            libs = [{name = "engine", path = "./engine", include = "./engine/include", type = "static"}]
            "#,
        );
        let proj = Project::from_raw(&name, raw).unwrap();
        let folded = fsutil::absolute_normalized("./engine/include").unwrap();
        assert!(proj.include_dirs.contains(&folded));
        assert_eq!(proj.libs[0].kind, BuildType::StaticLib);
    }

    #[test]
    fn duplicate_include_dirs_are_elided() {
        let (name, raw) = raw_from_toml(
            r#"
            [app]
            lang = ["C"]
            c.compiler = "gcc"
            src = "./s"
            includes = ["./s", "./s", "./inc"]
            "#,
        );
        let proj = Project::from_raw(&name, raw).unwrap();
        assert_eq!(proj.include_dirs.len(), 2);
    }

    #[test]
    fn macro_expansion_basics() {
        let mut env = HashMap::new();
        env.insert("NAME".to_string(), "world".to_string());
        assert_eq!(macro_expand("hello $(NAME)", &env), "hello world");
        assert_eq!(macro_expand("$(MISSING)/dir", &env), "/dir");

        // idempotent when values carry no $() sequences
        let once = macro_expand("a $(NAME) b", &env);
        assert_eq!(macro_expand(&once, &env), once);
    }

    #[test]
    fn builtin_macros_override_user_env() {
        let tmp = tempfile::tempdir().unwrap();
        let env_file = tmp.path().join(".env");
        std::fs::write(&env_file, "YM_PROJECT_NAME=spoofed\nEXTRA=\"quoted value\"\n").unwrap();

        let (name, raw) = raw_from_toml(&format!(
            r#"
            [app]
            lang = ["C"]
            c.compiler = "gcc"
            src = "./s"
            env = "{}"

            [app.compiler]
            defines.debug = ["NAME=$(YM_PROJECT_NAME)", "EXTRA=$(EXTRA)"]
            "#,
            env_file.display()
        ));
        let proj = Project::from_raw(&name, raw).unwrap();
        assert_eq!(proj.defines_debug[0], "NAME=app");
        assert_eq!(proj.defines_debug[1], "EXTRA=quoted value");
    }

    #[test]
    fn env_file_parsing() {
        let env = parse_env_file("A=1\nnot a pair\nB = \"two words\"\n=skipme\nC=plain\n");
        assert_eq!(env.get("A").unwrap(), "1");
        assert_eq!(env.get("B").unwrap(), "two words");
        assert_eq!(env.get("C").unwrap(), "plain");
        assert_eq!(env.len(), 3);
    }

    #[test]
    fn serialization_round_trips() {
        let mut proj = sample_project();
        proj.libs.push(Library {
            name: "engine".to_string(),
            path: PathBuf::from("/deps/engine"),
            include: PathBuf::from("/deps/engine/include"),
            kind: BuildType::SharedLib,
        });
        proj.pre_built_libs.push(PathBuf::from("/deps/libz.a"));

        let text = proj.serialize();
        let back = Project::deserialize(&text).unwrap();
        assert_eq!(back, proj);
    }

    #[test]
    fn deserialization_rejects_malformed_input() {
        assert!(Project::deserialize("").is_err());
        assert!(Project::deserialize("name\n0.0.1\nnot-a-number\n").is_err());

        // truncated record
        let proj = sample_project();
        let text = proj.serialize();
        let truncated: String = text.lines().take(5).collect::<Vec<_>>().join("\n");
        assert!(Project::deserialize(&truncated).is_err());

        // trailing garbage
        let mut extra = text;
        extra.push_str("garbage\n");
        assert!(Project::deserialize(&extra).is_err());
    }

    #[test]
    fn file_language_classification() {
        assert_eq!(lang_of_file(Path::new("a.c")), Some(Lang::C));
        assert_eq!(lang_of_file(Path::new("a.cpp")), Some(Lang::Cpp));
        assert_eq!(lang_of_file(Path::new("a.CC")), Some(Lang::Cpp));
        assert_eq!(lang_of_file(Path::new("a.tpp")), Some(Lang::Cpp));
        assert_eq!(lang_of_file(Path::new("a.rs")), None);
        assert_eq!(lang_of_file(Path::new("noext")), None);
    }
}
