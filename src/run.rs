//! Run flow
//!
//! Stacks bundle layers, `-l` layers and the request layer, builds the QEMU
//! command line, and either prints it or runs it.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use qemu_layer::{build_command_line, combine_layers, EngineResolver, Layer, RunRequest, VariableResolver};

use crate::bundle::{BundleError, RunnerBundle};
use crate::config::RunnerConfig;
use crate::engine::{find_qemu, SearchContext};
use crate::locator::{read_layer, LayerSources, LocateError};
use crate::shell::{self, ShellError};

/// Extra runner arguments, inserted in front of the `run` arguments
pub const RUNNER_FLAGS_VAR: &str = "QEMU_RUNNER_FLAGS";

/// Extra QEMU arguments, inserted right after the executable
pub const QEMU_FLAGS_VAR: &str = "QEMU_FLAGS";

/// Errors for the run flow
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("Failed to build command line: {0}")]
    Layer(#[from] qemu_layer::Error),

    #[error("Invalid {var}: {source}")]
    Flags {
        var: String,
        #[source]
        source: ShellError,
    },

    #[error("Failed to install Ctrl-C handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Empty command line")]
    EmptyCommandLine,
}

/// What to run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Runner bundle whose layers come first
    pub bundle: Option<PathBuf>,
    /// Layers applied after the bundle's
    pub layers: Vec<String>,
    /// `--qemu`
    pub qemu: Option<PathBuf>,
    /// `--qemu-dir`
    pub qemu_dir: Option<PathBuf>,
    /// Kernel, kernel arguments and debug switches
    pub request: RunRequest,
}

/// Split a flags variable's value; unset and blank mean no flags.
pub fn split_flags(var: &str, value: Option<&str>) -> Result<Vec<String>, RunError> {
    match value {
        Some(value) if !value.trim().is_empty() => shell::split(value).map_err(|source| RunError::Flags {
            var: var.to_string(),
            source,
        }),
        _ => Ok(Vec::new()),
    }
}

/// Read and split a flags variable from the environment
pub fn env_flags(var: &str) -> Result<Vec<String>, RunError> {
    split_flags(var, std::env::var(var).ok().as_deref())
}

/// Insert `flags` right after the executable token.
pub fn insert_qemu_flags(mut cmdline: Vec<String>, flags: &[String]) -> Vec<String> {
    if flags.is_empty() || cmdline.is_empty() {
        return cmdline;
    }
    let tail = cmdline.split_off(1);
    cmdline.extend(flags.iter().cloned());
    cmdline.extend(tail);
    cmdline
}

/// `path` relative to the current directory, if it is not absolute already
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Layers of a run in application order: bundle, named layers, request.
pub fn collect_layers(
    bundle: Option<&RunnerBundle>,
    names: &[String],
    sources: &LayerSources,
    request: &RunRequest,
) -> Result<Vec<Layer>, RunError> {
    let mut layers = match bundle {
        Some(bundle) => bundle.parse_layers()?,
        None => Vec::new(),
    };
    for name in names {
        layers.push(read_layer(name, sources)?);
    }
    layers.push(Layer::from_request(request));
    Ok(layers)
}

/// Merge `layers` and build the command line, resolving the engine through `search`.
pub fn build_qemu_command_line(
    layers: &[Layer],
    search: &SearchContext,
    qemu_flags: &[String],
) -> Result<Vec<String>, RunError> {
    let combined = combine_layers(layers)?;

    let find = |engine: &str| find_qemu(engine, search);
    let resolver: &dyn EngineResolver = &find;
    let cmdline = build_command_line(&combined, Some(resolver), VariableResolver::identity())?;

    Ok(insert_qemu_flags(cmdline, qemu_flags))
}

/// Full search context for a run
pub fn search_context(
    base: SearchContext,
    options: &RunOptions,
    config: &RunnerConfig,
    bundle: Option<&RunnerBundle>,
) -> SearchContext {
    let script_bases = match bundle {
        Some(bundle) => bundle.script_bases(),
        None => std::env::current_exe().into_iter().collect(),
    };

    base.with_explicit(options.qemu.clone())
        .with_qemu_dirs(options.qemu_dir.iter().cloned())
        .with_qemu_dirs(config.qemu_dirs.iter().cloned())
        .with_script_bases(script_bases)
        .with_search_paths(bundle.map(RunnerBundle::search_paths).unwrap_or_default())
}

/// Build the command line for `options`.
///
/// `base` carries the environment part of the QEMU search, normally
/// [`SearchContext::from_env`].
pub fn plan_command_line(
    options: &RunOptions,
    config: &RunnerConfig,
    base: SearchContext,
    qemu_flags: &[String],
) -> Result<Vec<String>, RunError> {
    let bundle = options.bundle.as_deref().map(RunnerBundle::load).transpose()?;

    let mut sources = LayerSources::from_config(config);
    if let Some(bundle) = &bundle {
        sources = sources.with_embedded(bundle.layers().to_vec());
    }

    let layers = collect_layers(bundle.as_ref(), &options.layers, &sources, &options.request)?;
    tracing::debug!(count = layers.len(), "collected layers");

    let search = search_context(base, options, config, bundle.as_ref());
    build_qemu_command_line(&layers, &search, qemu_flags)
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Run the command line and return the emulator's exit code.
///
/// Ctrl-C is left to the emulator, which shares the terminal's process group.
pub fn execute(cmdline: &[String]) -> Result<i32, RunError> {
    let (program, args) = cmdline.split_first().ok_or(RunError::EmptyCommandLine)?;

    ctrlc::set_handler(|| {})?;

    tracing::info!(program = %program, "starting QEMU");
    let status = Command::new(program)
        .args(args)
        .status()
        .map_err(|source| RunError::Spawn {
            program: program.clone(),
            source,
        })?;

    let code = exit_code(status);
    tracing::debug!(code, "QEMU exited");
    Ok(code)
}
