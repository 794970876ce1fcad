//! QEMU executable search
//!
//! Search precedence:
//! 1. `QEMU_DEV` environment variable, direct path to the executable
//! 2. `--qemu`, direct path to the executable
//! 3. `QEMU_DIR` environment variable, directory holding the executable
//! 4. `--qemu-dir` and the configured `qemu_dirs`
//! 5. Each script base and its ancestors, each also with a `qemu` subdirectory
//! 6. Search paths recorded in the runner bundle
//! 7. Directories in `PATH`
//!
//! When nothing matches the bare engine name is returned and the OS
//! resolves it at spawn time.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Inputs of the executable search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchContext {
    /// `QEMU_DEV`
    pub qemu_dev: Option<PathBuf>,
    /// `--qemu`
    pub explicit: Option<PathBuf>,
    /// `QEMU_DIR`
    pub qemu_dir_env: Option<PathBuf>,
    /// `--qemu-dir` followed by configured directories
    pub qemu_dirs: Vec<PathBuf>,
    /// Files whose directory and ancestors are searched
    pub script_bases: Vec<PathBuf>,
    /// Directories recorded in the runner bundle
    pub search_paths: Vec<PathBuf>,
    /// `PATH`
    pub path_dirs: Vec<PathBuf>,
    /// Executable suffixes to try
    pub extensions: Vec<String>,
}

impl SearchContext {
    /// Context populated from `QEMU_DEV`, `QEMU_DIR`, `PATH` and `PATHEXT`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty());

        Self {
            qemu_dev: var("QEMU_DEV").map(PathBuf::from),
            qemu_dir_env: var("QEMU_DIR").map(|dir| PathBuf::from(strip_trailing_separators(dir))),
            path_dirs: var("PATH")
                .map(|path| std::env::split_paths(&path).collect())
                .unwrap_or_default(),
            extensions: executable_extensions(var("PATHEXT")),
            ..Self::default()
        }
    }

    pub fn with_explicit(mut self, qemu: Option<PathBuf>) -> Self {
        self.explicit = qemu;
        self
    }

    pub fn with_qemu_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.qemu_dirs.extend(dirs);
        self
    }

    pub fn with_script_bases(mut self, bases: impl IntoIterator<Item = PathBuf>) -> Self {
        self.script_bases.extend(bases);
        self
    }

    pub fn with_search_paths(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_paths.extend(paths);
        self
    }

    /// Directories probed for the engine, in order
    pub fn candidate_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        dirs.extend(self.qemu_dir_env.iter().cloned());
        dirs.extend(self.qemu_dirs.iter().cloned());

        for base in &self.script_bases {
            let mut look_at = base.parent();
            while let Some(dir) = look_at {
                if !dir.as_os_str().is_empty() {
                    dirs.push(dir.to_path_buf());
                    dirs.push(dir.join("qemu"));
                }
                look_at = dir.parent();
            }
        }

        dirs.extend(self.search_paths.iter().cloned());
        dirs.extend(self.path_dirs.iter().filter(|p| !p.as_os_str().is_empty()).cloned());
        dirs
    }
}

fn strip_trailing_separators(dir: OsString) -> OsString {
    let text = dir.to_string_lossy();
    let stripped = text.trim_end_matches(|c: char| c == '/' || c == '\\');
    if stripped.is_empty() || stripped.len() == text.len() {
        return dir;
    }
    OsString::from(stripped)
}

/// Executable suffixes: `PATHEXT` entries on Windows, none elsewhere
pub fn executable_extensions(pathext: Option<OsString>) -> Vec<String> {
    if !cfg!(windows) {
        return vec![String::new()];
    }
    let extensions: Vec<String> = pathext
        .map(|v| {
            std::env::split_paths(&v)
                .map(|p| p.to_string_lossy().into_owned())
                .filter(|e| !e.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if extensions.is_empty() {
        vec![".exe".to_string()]
    } else {
        extensions
    }
}

fn find_executable(dir: &Path, engine: &str, extensions: &[String]) -> Option<PathBuf> {
    extensions
        .iter()
        .map(|ext| dir.join(format!("{}{}", engine, ext)))
        .find(|candidate| candidate.is_file())
}

/// Locate the executable for `engine`.
pub fn find_qemu(engine: &str, context: &SearchContext) -> PathBuf {
    if let Some(path) = &context.qemu_dev {
        tracing::debug!(path = %path.display(), "using QEMU_DEV");
        return path.clone();
    }

    if let Some(path) = &context.explicit {
        tracing::debug!(path = %path.display(), "using explicit QEMU path");
        return path.clone();
    }

    let default_extensions = [String::new()];
    let extensions = if context.extensions.is_empty() {
        &default_extensions[..]
    } else {
        &context.extensions[..]
    };

    for dir in context.candidate_dirs() {
        tracing::trace!(dir = %dir.display(), engine, "probing for QEMU");
        if let Some(found) = find_executable(&dir, engine, extensions) {
            tracing::debug!(path = %found.display(), "found QEMU");
            return found;
        }
    }

    tracing::info!(engine, "QEMU not found in search paths, leaving it to the OS");
    PathBuf::from(engine)
}
