//! Command-line builder
//!
//! Turns a fully merged layer into the emulator argv. Token order is fixed:
//! executable, layer arguments, then `-cpu`, `-m`, `-S`, `-gdb`/`-s`,
//! `-kernel`, `-append`.

use std::path::PathBuf;

use crate::argument::{Argument, ID_KEY};
use crate::error::{Error, Result};
use crate::layer::{Layer, Mode};
use crate::resolver::{append_resolver, unresolved_placeholders, VariableResolver};

/// Maps an engine name (e.g. `qemu-system-arm`) to the executable to run.
pub trait EngineResolver {
    fn resolve_engine(&self, engine: &str) -> PathBuf;
}

impl<F> EngineResolver for F
where
    F: Fn(&str) -> PathBuf,
{
    fn resolve_engine(&self, engine: &str) -> PathBuf {
        self(engine)
    }
}

/// Tokens for one argument: `-name` and, when there is anything to show,
/// a comma-joined `value,id=...,key=value,flag` token.
///
/// Only attribute values pass through `resolver`; the positional value and
/// id are emitted as-is.
pub fn argument_tokens(argument: &Argument, resolver: &VariableResolver) -> Vec<String> {
    let mut tokens = vec![format!("-{}", argument.name())];
    let mut parts: Vec<String> = Vec::new();

    if let Some(value) = argument.value().filter(|v| !v.is_empty()) {
        parts.push(value.to_string());
    }

    if let Some(id) = argument.id_value() {
        parts.push(format!("{}={}", ID_KEY, id));
    }

    for (key, value) in argument.attributes().iter() {
        if key == ID_KEY {
            continue;
        }
        match value {
            None => parts.push(key.to_string()),
            Some(value) => {
                let resolved = resolver.resolve(value);
                let leftover = unresolved_placeholders(&resolved);
                if !leftover.is_empty() {
                    tracing::warn!(
                        argument = argument.name(),
                        attribute = key,
                        placeholders = ?leftover,
                        "attribute keeps unresolved placeholders"
                    );
                }
                parts.push(format!("{}={}", key, resolved));
            }
        }
    }

    if !parts.is_empty() {
        tokens.push(parts.join(","));
    }

    tokens
}

/// Build the full emulator argv for a merged layer.
///
/// `engine_resolver` is called exactly once, with the configured engine;
/// without one the engine name is emitted verbatim. `variable_resolver`
/// runs first, then the layer's own `KERNEL_DIR` binding.
pub fn build_command_line(
    layer: &Layer,
    engine_resolver: Option<&dyn EngineResolver>,
    variable_resolver: VariableResolver,
) -> Result<Vec<String>> {
    let general = layer.general();
    if general.engine.is_empty() {
        return Err(Error::MissingEngine);
    }

    let layer_resolver = match general.kernel_path() {
        Some(kernel) => VariableResolver::for_kernel(kernel),
        None => VariableResolver::identity(),
    };
    let resolver = append_resolver(variable_resolver, layer_resolver);

    let executable = match engine_resolver {
        Some(engine_resolver) => engine_resolver
            .resolve_engine(&general.engine)
            .to_string_lossy()
            .into_owned(),
        None => general.engine.clone(),
    };
    tracing::debug!(engine = %general.engine, executable = %executable, "resolved engine");

    let mut tokens = vec![executable];

    for argument in layer.arguments() {
        tokens.extend(argument_tokens(argument, &resolver));
    }

    if let Some(cpu) = &general.cpu {
        tokens.push("-cpu".to_string());
        tokens.push(cpu.clone());
    }

    if let Some(memory) = &general.memory {
        tokens.push("-m".to_string());
        tokens.push(memory.clone());
    }

    if general.halted == Some(true) {
        tokens.push("-S".to_string());
    }

    if general.gdb == Some(true) {
        match &general.gdb_dev {
            Some(dev) => {
                tokens.push("-gdb".to_string());
                tokens.push(dev.clone());
            }
            None => tokens.push("-s".to_string()),
        }
    }

    if let Some(kernel) = general.kernel_path() {
        if general.mode != Some(Mode::User) {
            tokens.push("-kernel".to_string());
        }
        tokens.push(kernel.to_string());
    }

    if let Some(cmdline) = general.kernel_cmdline.as_deref().filter(|c| !c.is_empty()) {
        tokens.push("-append".to_string());
        tokens.push(cmdline.to_string());
    }

    Ok(tokens)
}
