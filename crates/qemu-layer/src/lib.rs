//! Layered emulator configuration.
//!
//! A stack of layers, each a partial QEMU configuration, is merged in order
//! and rendered into the argv passed to the emulator.
//!
//! ```
//! use qemu_layer::{build_command_line, combine_layers, parse_layer, VariableResolver};
//!
//! let base = parse_layer("[general]\nengine = qemu-system-arm\n\n[machine]\n@ = virt\n").unwrap();
//! let extra = parse_layer("[machine]\nflash_kb = 1024\n").unwrap();
//! let combined = combine_layers([&base, &extra]).unwrap();
//!
//! let argv = build_command_line(&combined, None, VariableResolver::identity()).unwrap();
//! assert_eq!(argv, ["qemu-system-arm", "-machine", "virt,flash_kb=1024"]);
//! ```

pub mod argument;
pub mod cmdline;
pub mod error;
pub mod format;
pub mod layer;
pub mod request;
pub mod resolver;

pub use argument::{Argument, Attributes, ID_KEY};
pub use cmdline::{argument_tokens, build_command_line, EngineResolver};
pub use error::{Error, Result};
pub use format::{parse_layer, serialize_layer};
pub use layer::{combine_layers, GeneralSettings, Layer, Mode};
pub use request::RunRequest;
pub use resolver::{
    append_resolver, make_resolver_from_dict, resolve_no_variables, VariableResolver, KERNEL_DIR,
};
