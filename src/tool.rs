use std::{
    path::Path,
    process::Command,
};

use crate::error::*;

/// Represents the family of tools a compiler executable belongs to.
///
/// Each family differs in how and what arguments it accepts, but only two flag
/// dialects exist in practice: the POSIX-ish one shared by gcc/clang/icc, and
/// the MSVC one.
///
/// Detection of a family is done on best-effort basis from the executable name
/// and may not accurately reflect the tool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ToolFamily {
    /// GNU Compiler Collection-like.
    Gcc,

    /// Clang-like. Accepts a superset of the GCC flags.
    Clang,

    /// The Intel C/C++ compiler. Flag-compatible with GCC for our purposes.
    Icc,

    /// The MSVC cl.exe.
    Msvc,

    /// No compiler was configured at all (empty executable name).
    None,

    /// An executable name we cannot map to a known family.
    Unknown,
}

impl ToolFamily {
    /// Classify a compiler executable name, case-insensitively.
    pub fn classify(name: &str) -> ToolFamily {
        let name = name.trim().to_lowercase();
        match name.as_str() {
            "clang" | "clang++" => ToolFamily::Clang,
            "icc" | "intel c++" => ToolFamily::Icc,
            "gcc" | "gnu" | "g++" | "gnu gcc" => ToolFamily::Gcc,
            "cl" | "msvc" | "cl++" => ToolFamily::Msvc,
            "" => ToolFamily::None,
            _ => ToolFamily::Unknown,
        }
    }

    pub fn is_msvc(self) -> bool {
        self == ToolFamily::Msvc
    }

    /// `-c` / `/c`
    pub fn compile_only(self) -> &'static str {
        if self.is_msvc() {
            "/c"
        } else {
            "-c"
        }
    }

    /// `-o <p>` / `/Fo<p>`
    pub fn output_file(self, path: &Path) -> String {
        if self.is_msvc() {
            format!("/Fo{}", path.display())
        } else {
            format!("-o {}", path.display())
        }
    }

    /// `-I<d>` / `/I<d>`
    pub fn include_dir(self, dir: &Path) -> String {
        if self.is_msvc() {
            format!("/I{}", dir.display())
        } else {
            format!("-I{}", dir.display())
        }
    }

    /// `-L<d>` / `/LIBPATH:<d>`
    pub fn library_dir(self, dir: &Path) -> String {
        if self.is_msvc() {
            format!("/LIBPATH:{}", dir.display())
        } else {
            format!("-L{}", dir.display())
        }
    }

    /// `-l<n>` / bare name
    pub fn link_library(self, name: &str) -> String {
        if self.is_msvc() {
            name.to_string()
        } else {
            format!("-l{}", name)
        }
    }

    /// `-E` / `/P`
    pub fn preprocess_only(self) -> &'static str {
        if self.is_msvc() {
            "/P"
        } else {
            "-E"
        }
    }

    /// `-D<m>` / `/D<m>`
    pub fn define(self, macro_def: &str) -> String {
        if self.is_msvc() {
            format!("/D{}", macro_def)
        } else {
            format!("-D{}", macro_def)
        }
    }

    /// `-O0..-O3` / `/Od,/O1,/O2,/Ox`. Levels above 3 saturate.
    pub fn optimization(self, level: u32) -> &'static str {
        if self.is_msvc() {
            match level {
                0 => "/Od",
                1 => "/O1",
                2 => "/O2",
                _ => "/Ox",
            }
        } else {
            match level {
                0 => "-O0",
                1 => "-O1",
                2 => "-O2",
                _ => "-O3",
            }
        }
    }

    /// `-fPIC`; MSVC has no equivalent and gets the empty string.
    pub fn position_independent_code(self) -> &'static str {
        if self.is_msvc() {
            ""
        } else {
            "-fPIC"
        }
    }

    /// `-shared` / `/DLL`
    pub fn build_shared(self) -> &'static str {
        if self.is_msvc() {
            "/DLL"
        } else {
            "-shared"
        }
    }

    /// `-std=c<N>`; MSVC has no C-standard switch and gets the empty string.
    pub fn c_standard(self, std: u32) -> String {
        if self.is_msvc() {
            String::new()
        } else {
            format!("-std=c{}", std)
        }
    }

    /// `-std=c++<N>` / `/std:c++<N>`
    pub fn cpp_standard(self, std: u32) -> String {
        if self.is_msvc() {
            format!("/std:c++{}", std)
        } else {
            format!("-std=c++{}", std)
        }
    }

    /// Shell suffix that silences a child completely.
    pub fn suppress_output(self) -> &'static str {
        if self.is_msvc() {
            "/nologo > NUL 2>&1"
        } else {
            SHELL_SUPPRESS
        }
    }
}

#[cfg(windows)]
pub const SHELL_SUPPRESS: &str = "> NUL 2>&1";
#[cfg(not(windows))]
pub const SHELL_SUPPRESS: &str = "> /dev/null 2>&1";

/// A compiler executable as named in the manifest, with its detected family.
#[derive(Clone, Debug)]
pub struct Tool {
    pub exe: String,
    pub family: ToolFamily,
}

impl Tool {
    pub fn from_name(name: &str) -> Tool {
        Tool {
            exe: name.to_string(),
            family: ToolFamily::classify(name),
        }
    }
}

/// Run `command` through the platform shell and return its exit code.
///
/// Compiler, archiver and import-library invocations all go through here so
/// that the redirection suffixes in the synthesized commands work.
pub fn run_shell(command: &str) -> Result<i32> {
    log::debug!("running: {}", command);

    #[cfg(windows)]
    let status = Command::new("cmd").arg("/C").arg(command).status();
    #[cfg(not(windows))]
    let status = Command::new("sh").arg("-c").arg(command).status();

    let status = status.map_err(|e| Error::ProcessCreation(command.to_string(), e))?;
    Ok(status.code().unwrap_or(-1))
}

/// Check whether `tool` exists on the PATH and answers `--version` with a zero
/// exit status. Output is suppressed; availability is probed once per build.
pub fn tool_available(tool: &str) -> bool {
    if which::which(tool).is_err() {
        return false;
    }

    match run_shell(&format!("{} --version {}", tool, SHELL_SUPPRESS)) {
        Ok(code) => code == 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(ToolFamily::classify("CLANG++"), ToolFamily::Clang);
        assert_eq!(ToolFamily::classify("clang++"), ToolFamily::Clang);
        assert_eq!(ToolFamily::classify("Clang++"), ToolFamily::Clang);
        assert_eq!(ToolFamily::classify("G++"), ToolFamily::Gcc);
        assert_eq!(ToolFamily::classify("gnu gcc"), ToolFamily::Gcc);
        assert_eq!(ToolFamily::classify("ICC"), ToolFamily::Icc);
        assert_eq!(ToolFamily::classify("cl"), ToolFamily::Msvc);
        assert_eq!(ToolFamily::classify("cl++"), ToolFamily::Msvc);
    }

    #[test]
    fn empty_and_unknown_names() {
        assert_eq!(ToolFamily::classify(""), ToolFamily::None);
        assert_eq!(ToolFamily::classify("  "), ToolFamily::None);
        assert_eq!(ToolFamily::classify("tcc"), ToolFamily::Unknown);
    }

    #[test]
    fn posix_flag_dialect() {
        let f = ToolFamily::Gcc;
        assert_eq!(f.compile_only(), "-c");
        assert_eq!(f.output_file(&PathBuf::from("a.o")), "-o a.o");
        assert_eq!(f.include_dir(&PathBuf::from("inc")), "-Iinc");
        assert_eq!(f.library_dir(&PathBuf::from("libdir")), "-Llibdir");
        assert_eq!(f.link_library("m"), "-lm");
        assert_eq!(f.define("NDEBUG"), "-DNDEBUG");
        assert_eq!(f.preprocess_only(), "-E");
        assert_eq!(f.build_shared(), "-shared");
        assert_eq!(f.c_standard(11), "-std=c11");
        assert_eq!(f.cpp_standard(17), "-std=c++17");
    }

    #[test]
    fn msvc_flag_dialect() {
        let f = ToolFamily::Msvc;
        assert_eq!(f.compile_only(), "/c");
        assert_eq!(f.output_file(&PathBuf::from("a.obj")), "/Foa.obj");
        assert_eq!(f.include_dir(&PathBuf::from("inc")), "/Iinc");
        assert_eq!(f.library_dir(&PathBuf::from("libdir")), "/LIBPATH:libdir");
        assert_eq!(f.link_library("user32.lib"), "user32.lib");
        assert_eq!(f.define("NDEBUG"), "/DNDEBUG");
        assert_eq!(f.preprocess_only(), "/P");
        assert_eq!(f.build_shared(), "/DLL");
        assert_eq!(f.c_standard(11), "");
        assert_eq!(f.cpp_standard(20), "/std:c++20");
    }

    #[test]
    fn pic_is_empty_on_msvc_only() {
        assert_eq!(ToolFamily::Msvc.position_independent_code(), "");
        assert_eq!(ToolFamily::Gcc.position_independent_code(), "-fPIC");
        assert_eq!(ToolFamily::Icc.position_independent_code(), "-fPIC");
    }

    #[test]
    fn optimization_levels_saturate() {
        assert_eq!(ToolFamily::Gcc.optimization(0), "-O0");
        assert_eq!(ToolFamily::Gcc.optimization(3), "-O3");
        assert_eq!(ToolFamily::Gcc.optimization(9), "-O3");
        assert_eq!(ToolFamily::Msvc.optimization(0), "/Od");
        assert_eq!(ToolFamily::Msvc.optimization(2), "/O2");
        assert_eq!(ToolFamily::Msvc.optimization(3), "/Ox");
    }

    #[test]
    fn missing_tool_is_unavailable() {
        assert!(!tool_available("definitely-not-a-real-tool-xyz"));
    }
}
