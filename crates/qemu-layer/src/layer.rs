//! Layers and the merge algorithm
//!
//! A layer is one partial emulator configuration: general settings plus an
//! ordered argument list. Layers are merged with [`Layer::apply`]:
//! - General settings: a present value in the addition wins, except the
//!   kernel command line, which is concatenated.
//! - Arguments: an addition argument with the same `(name, id)` as a base
//!   argument is folded into it in place. The rest are appended in order.

use serde::Serialize;

use crate::argument::Argument;
use crate::error::{Error, Result};

/// How the emulator is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Full system emulation (`-kernel <path>`).
    System,
    /// User-mode emulation (kernel path is a bare positional token).
    User,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::System => "system",
            Mode::User => "user",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Mode::System),
            "user" => Ok(Mode::User),
            _ => Err(Error::InvalidMode(s.to_string())),
        }
    }
}

/// Well-known settings from the `[general]` section.
///
/// `None` means "not specified by this layer". `Some(false)` is an explicit
/// request to disable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneralSettings {
    /// Emulator executable name; empty means unset.
    pub engine: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_cmdline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gdb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gdb_dev: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl GeneralSettings {
    /// Settings with only the engine set.
    pub fn with_engine(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Kernel path, if set to something non-empty.
    pub fn kernel_path(&self) -> Option<&str> {
        self.kernel.as_deref().filter(|k| !k.is_empty())
    }

    /// True when no field is present.
    pub fn is_empty(&self) -> bool {
        *self == GeneralSettings::default()
    }

    fn merge(&self, addition: &GeneralSettings) -> GeneralSettings {
        GeneralSettings {
            engine: if addition.engine.is_empty() {
                self.engine.clone()
            } else {
                addition.engine.clone()
            },
            mode: addition.mode.or(self.mode),
            kernel: match addition.kernel_path() {
                Some(kernel) => Some(kernel.to_string()),
                None => self.kernel.clone(),
            },
            kernel_cmdline: join_cmdline(
                self.kernel_cmdline.as_deref(),
                addition.kernel_cmdline.as_deref(),
            ),
            halted: addition.halted.or(self.halted),
            gdb: addition.gdb.or(self.gdb),
            gdb_dev: addition.gdb_dev.clone().or_else(|| self.gdb_dev.clone()),
            cpu: addition.cpu.clone().or_else(|| self.cpu.clone()),
            memory: addition.memory.clone().or_else(|| self.memory.clone()),
        }
    }
}

fn join_cmdline(base: Option<&str>, addition: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [base, addition]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// One partial emulator configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Layer {
    general: GeneralSettings,
    arguments: Vec<Argument>,
}

impl Layer {
    pub fn new(general: GeneralSettings, arguments: Vec<Argument>) -> Self {
        Self { general, arguments }
    }

    /// The neutral element of [`Layer::apply`].
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn general(&self) -> &GeneralSettings {
        &self.general
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn is_empty(&self) -> bool {
        self.general.is_empty() && self.arguments.is_empty()
    }

    /// Merge `addition` on top of this layer and return the result.
    ///
    /// Base arguments keep their order. Each one absorbs the addition
    /// argument with the same identity (attributes overlaid, positional value
    /// replaced when the addition has one). Unmatched addition arguments are
    /// appended in their original order.
    ///
    /// Each addition argument is consumed by at most one base argument. For
    /// id-less arguments the first unconsumed candidate wins; two addition
    /// arguments sharing a `(name, id)` with an assigned id is an error.
    pub fn apply(&self, addition: &Layer) -> Result<Layer> {
        let mut pending: Vec<Option<&Argument>> = addition.arguments.iter().map(Some).collect();
        let mut arguments = Vec::with_capacity(self.arguments.len() + pending.len());

        for base in &self.arguments {
            let candidates: Vec<usize> = pending
                .iter()
                .enumerate()
                .filter(|(_, slot)| slot.is_some_and(|a| a.id_matches(base)))
                .map(|(idx, _)| idx)
                .collect();

            if let Some(id) = base.id_value() {
                if candidates.len() > 1 {
                    return Err(Error::MultipleIdentityMatch {
                        name: base.name().to_string(),
                        id: id.to_string(),
                        count: candidates.len(),
                    });
                }
            }

            let matched = candidates.first().and_then(|&idx| pending[idx].take());
            match matched {
                Some(update) => {
                    let mut merged = base.update_arguments(update.attributes())?;
                    if let Some(value) = update.value() {
                        merged = merged.replace_value(Some(value.to_string()));
                    }
                    arguments.push(merged);
                }
                None => arguments.push(base.clone()),
            }
        }

        arguments.extend(pending.into_iter().flatten().cloned());

        Ok(Layer {
            general: self.general.merge(&addition.general),
            arguments,
        })
    }
}

impl PartialEq for Layer {
    /// Field-wise settings, argument lists compared as multisets.
    fn eq(&self, other: &Self) -> bool {
        if self.general != other.general || self.arguments.len() != other.arguments.len() {
            return false;
        }

        let mut unmatched: Vec<&Argument> = other.arguments.iter().collect();
        for arg in &self.arguments {
            match unmatched.iter().position(|candidate| *candidate == arg) {
                Some(idx) => {
                    unmatched.swap_remove(idx);
                }
                None => return false,
            }
        }
        true
    }
}

impl Eq for Layer {}

/// Fold `apply` over `layers`, starting from the empty layer.
pub fn combine_layers<'a, I>(layers: I) -> Result<Layer>
where
    I: IntoIterator<Item = &'a Layer>,
{
    layers.into_iter().try_fold(Layer::empty(), |acc, layer| {
        let combined = acc.apply(layer)?;
        tracing::debug!(
            arguments = combined.arguments().len(),
            engine = %combined.general().engine,
            "applied layer"
        );
        Ok(combined)
    })
}
