//! Runtime request layer
//!
//! What the user asks for on the command line, expressed as one more layer
//! so it merges through the same `apply` as everything else.

use crate::layer::{GeneralSettings, Layer};

/// Parameters supplied when launching the emulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Kernel image to boot.
    pub kernel: Option<String>,
    /// Arguments passed to the kernel; joined with spaces.
    pub arguments: Vec<String>,
    /// Halt the CPU at startup.
    pub halted: bool,
    /// Enable the gdb server.
    pub debug: bool,
    /// gdb server listen device (`-gdb <dev>`), used when `debug` is set.
    pub debug_listen: Option<String>,
}

impl Layer {
    /// Layer carrying a run request.
    ///
    /// Switches that are off stay unspecified, so they never disable
    /// something an earlier layer turned on.
    pub fn from_request(request: &RunRequest) -> Layer {
        let cmdline = request.arguments.join(" ");
        let general = GeneralSettings {
            kernel: request.kernel.clone().filter(|k| !k.is_empty()),
            kernel_cmdline: if cmdline.is_empty() { None } else { Some(cmdline) },
            halted: request.halted.then_some(true),
            gdb: request.debug.then_some(true),
            gdb_dev: request.debug_listen.clone(),
            ..GeneralSettings::default()
        };
        Layer::new(general, Vec::new())
    }
}
