//! QEMU runner
//!
//! Builds QEMU command lines from stacked configuration layers, finds the
//! emulator executable, and packages layer stacks into runner bundles that
//! can be derived from and inspected.

pub mod bundle;
pub mod config;
pub mod engine;
pub mod locator;
pub mod logging;
pub mod run;
pub mod shell;

pub use bundle::{BundleBuilder, BundleError, DeriveOptions, EmbeddedLayer, RunnerBundle, RunnerManifest};
pub use config::{ConfigError, RunnerConfig};
pub use engine::{find_qemu, SearchContext};
pub use locator::{load_layer, LayerSources, LocateError};
pub use run::{RunError, RunOptions};
