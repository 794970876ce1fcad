//! Layer locator
//!
//! Resolves a layer name to its text. Sources are tried in order:
//! absolute path, current directory, configured directories, directories
//! from environment variables, layers embedded in the runner bundle, and
//! the layers built into this binary.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use qemu_layer::{parse_layer, Layer};

use crate::bundle::EmbeddedLayer;
use crate::config::RunnerConfig;

/// Layers compiled into the binary, by file name
pub const BUILTIN_LAYERS: &[(&str, &str)] =
    &[("virt-cortex-m.ini", include_str!("../layers/virt-cortex-m.ini"))];

/// Errors for locating and parsing layers
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    #[error("Failed to find layer {0}")]
    NotFound(String),

    #[error("Failed to read layer {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid layer {name}: {source}")]
    Invalid {
        name: String,
        #[source]
        source: qemu_layer::Error,
    },
}

/// Where a located layer came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerOrigin {
    File(PathBuf),
    Embedded(String),
    Builtin,
}

/// A layer found by [`load_layer`]
#[derive(Debug, Clone)]
pub struct LocatedLayer {
    pub name: String,
    pub origin: LayerOrigin,
    pub text: String,
}

impl LocatedLayer {
    /// Parse the layer text
    pub fn parse(&self) -> Result<Layer, LocateError> {
        parse_layer(&self.text).map_err(|source| LocateError::Invalid {
            name: self.name.clone(),
            source,
        })
    }
}

/// Places searched for layers, in precedence order
#[derive(Debug, Clone, Default)]
pub struct LayerSources {
    cwd: Option<PathBuf>,
    layer_dirs: Vec<PathBuf>,
    env_dirs: Vec<PathBuf>,
    embedded: Vec<EmbeddedLayer>,
}

impl LayerSources {
    /// Sources with only the current directory
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            ..Self::default()
        }
    }

    /// Sources for the current process: working directory plus the
    /// directories and environment variables named in `config`.
    pub fn from_config(config: &RunnerConfig) -> Self {
        let mut sources = Self {
            cwd: std::env::current_dir().ok(),
            ..Self::default()
        }
        .with_layer_dirs(config.layer_dirs.iter().cloned());

        for var in &config.layer_path_vars {
            sources = sources.with_path_list(std::env::var_os(var));
        }
        sources
    }

    /// Add configured layer directories
    pub fn with_layer_dirs(mut self, dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        self.layer_dirs.extend(dirs);
        self
    }

    /// Add the directories of a PATH-style list; empty entries are skipped
    pub fn with_path_list(mut self, list: Option<OsString>) -> Self {
        if let Some(list) = list {
            self.env_dirs
                .extend(std::env::split_paths(&list).filter(|p| !p.as_os_str().is_empty()));
        }
        self
    }

    /// Add layers embedded in a runner bundle
    pub fn with_embedded(mut self, layers: impl IntoIterator<Item = EmbeddedLayer>) -> Self {
        self.embedded.extend(layers);
        self
    }

    fn directories(&self) -> impl Iterator<Item = &PathBuf> {
        self.cwd.iter().chain(&self.layer_dirs).chain(&self.env_dirs)
    }

    fn find_embedded(&self, name: &str) -> Option<&EmbeddedLayer> {
        self.embedded.iter().find(|layer| {
            layer.name == name
                || Path::new(&layer.name).file_name().and_then(|f| f.to_str()) == Some(name)
        })
    }
}

fn read(path: &Path) -> Result<String, LocateError> {
    fs::read_to_string(path).map_err(|source| LocateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Find the layer called `name` and return its text.
pub fn load_layer(name: &str, sources: &LayerSources) -> Result<LocatedLayer, LocateError> {
    let located = |origin: LayerOrigin, text: String| LocatedLayer {
        name: name.to_string(),
        origin,
        text,
    };

    let path = Path::new(name);
    if path.is_absolute() {
        if !path.is_file() {
            return Err(LocateError::NotFound(name.to_string()));
        }
        return Ok(located(LayerOrigin::File(path.to_path_buf()), read(path)?));
    }

    for dir in sources.directories() {
        let candidate = dir.join(path);
        tracing::trace!(candidate = %candidate.display(), "probing layer");
        if candidate.is_file() {
            tracing::debug!(layer = name, path = %candidate.display(), "found layer file");
            let text = read(&candidate)?;
            return Ok(located(LayerOrigin::File(candidate), text));
        }
    }

    if let Some(embedded) = sources.find_embedded(name) {
        tracing::debug!(layer = name, path = %embedded.path, "found embedded layer");
        return Ok(located(LayerOrigin::Embedded(embedded.path.clone()), embedded.text.clone()));
    }

    if let Some((_, text)) = BUILTIN_LAYERS.iter().find(|(builtin, _)| *builtin == name) {
        tracing::debug!(layer = name, "using built-in layer");
        return Ok(located(LayerOrigin::Builtin, text.to_string()));
    }

    Err(LocateError::NotFound(name.to_string()))
}

/// Locate and parse a layer
pub fn read_layer(name: &str, sources: &LayerSources) -> Result<Layer, LocateError> {
    load_layer(name, sources)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn embedded(name: &str, text: &str) -> EmbeddedLayer {
        EmbeddedLayer {
            path: "layers/000.ini".to_string(),
            name: name.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn test_absolute_path() {
        let tmp = TempDir::new().unwrap();
        let path = write(tmp.path(), "abs.ini", "[general]\nengine = a\n");

        let found = load_layer(path.to_str().unwrap(), &LayerSources::default()).unwrap();
        assert_eq!(found.origin, LayerOrigin::File(path));
        assert_eq!(found.text, "[general]\nengine = a\n");
    }

    #[test]
    fn test_missing_absolute_path() {
        let result = load_layer("/nonexistent/layer.ini", &LayerSources::default());
        assert!(matches!(result, Err(LocateError::NotFound(_))));
    }

    #[test]
    fn test_cwd_wins_over_layer_dirs() {
        let cwd = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        write(cwd.path(), "l.ini", "cwd");
        write(dir.path(), "l.ini", "dir");

        let sources = LayerSources::new(cwd.path()).with_layer_dirs([dir.path().to_path_buf()]);
        assert_eq!(load_layer("l.ini", &sources).unwrap().text, "cwd");
    }

    #[test]
    fn test_layer_dirs_win_over_env_dirs() {
        let cwd = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let env_dir = TempDir::new().unwrap();
        write(dir.path(), "l.ini", "dir");
        write(env_dir.path(), "l.ini", "env");
        write(env_dir.path(), "only-env.ini", "env-only");

        let list = std::env::join_paths([env_dir.path()]).unwrap();
        let sources = LayerSources::new(cwd.path())
            .with_layer_dirs([dir.path().to_path_buf()])
            .with_path_list(Some(list));

        assert_eq!(load_layer("l.ini", &sources).unwrap().text, "dir");
        assert_eq!(load_layer("only-env.ini", &sources).unwrap().text, "env-only");
    }

    #[test]
    fn test_path_list_skips_empty_entries() {
        let env_dir = TempDir::new().unwrap();
        write(env_dir.path(), "e.ini", "env");

        let sep = if cfg!(windows) { ";" } else { ":" };
        let list = format!("{sep}{}{sep}", env_dir.path().display());
        let sources = LayerSources::default().with_path_list(Some(list.into()));

        assert_eq!(sources.env_dirs, vec![env_dir.path().to_path_buf()]);
        assert_eq!(load_layer("e.ini", &sources).unwrap().text, "env");
    }

    #[test]
    fn test_files_win_over_embedded() {
        let cwd = TempDir::new().unwrap();
        write(cwd.path(), "board.ini", "file");

        let sources = LayerSources::new(cwd.path()).with_embedded([embedded("board.ini", "embedded")]);
        assert_eq!(load_layer("board.ini", &sources).unwrap().text, "file");
    }

    #[test]
    fn test_embedded_by_name_or_file_name() {
        let sources = LayerSources::default().with_embedded([embedded("boards/board.ini", "embedded")]);

        let found = load_layer("boards/board.ini", &sources).unwrap();
        assert_eq!(found.origin, LayerOrigin::Embedded("layers/000.ini".to_string()));
        assert_eq!(load_layer("board.ini", &sources).unwrap().text, "embedded");
    }

    #[test]
    fn test_embedded_wins_over_builtin() {
        let sources = LayerSources::default().with_embedded([embedded("virt-cortex-m.ini", "mine")]);
        assert_eq!(load_layer("virt-cortex-m.ini", &sources).unwrap().text, "mine");
    }

    #[test]
    fn test_builtin_layer() {
        let found = load_layer("virt-cortex-m.ini", &LayerSources::default()).unwrap();
        assert_eq!(found.origin, LayerOrigin::Builtin);

        let layer = found.parse().unwrap();
        assert_eq!(layer.general().engine, "qemu-system-arm");
        assert_eq!(layer.arguments()[0].name(), "machine");
        assert_eq!(layer.arguments()[0].value(), Some("virt_cortex_m"));
    }

    #[test]
    fn test_not_found() {
        let cwd = TempDir::new().unwrap();
        let result = load_layer("missing.ini", &LayerSources::new(cwd.path()));
        assert!(matches!(result, Err(LocateError::NotFound(name)) if name == "missing.ini"));
    }

    #[test]
    fn test_read_layer_reports_parse_errors() {
        let cwd = TempDir::new().unwrap();
        write(cwd.path(), "bad.ini", "engine = x\n");

        let result = read_layer("bad.ini", &LayerSources::new(cwd.path()));
        assert!(matches!(result, Err(LocateError::Invalid { .. })));
    }
}
