//! qemu-runner CLI
//!
//! Entry point for the `qemu-runner` command-line tool.

use clap::{Args, Parser, Subcommand};
use qemu_layer::RunRequest;
use qemu_runner::bundle::{derive_bundle, make_bundle, BundleResult, DeriveOptions, RunnerBundle};
use qemu_runner::run::{self, RunOptions, QEMU_FLAGS_VAR, RUNNER_FLAGS_VAR};
use qemu_runner::{logging, shell, LayerSources, RunnerConfig, SearchContext};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process;

/// Exit code for usage and configuration errors
const EXIT_USAGE: i32 = 2;

/// Exit code for any other failure before QEMU starts
const EXIT_FAILURE: i32 = 1;

const SEARCH_HELP: &str = "\
QEMU search precedence:
    1. QEMU_DEV environment variable, direct path to executable
    2. --qemu argument as direct path to executable
    3. QEMU_DIR environment variable, directory containing the executable
    4. --qemu-dir argument and qemu_dirs from the config file
    5. Runner bundle directory and its ancestors, each also with a qemu/ subdirectory,
       then the same for base bundles tracked with --track-qemu
    6. Directories added with --qemu-dir when the bundle was made
    7. Directories in PATH

Environment:
    QEMU_RUNNER_FLAGS  extra `run` arguments, inserted before the command-line ones
    QEMU_FLAGS         extra QEMU arguments, passed through without interpretation";

#[derive(Parser)]
#[command(name = "qemu-runner")]
#[command(about = "Run QEMU from stacked configuration layers", version)]
#[command(after_help = SEARCH_HELP)]
struct Cli {
    /// Path to config file (default: ~/.config/qemu-runner/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the QEMU command line and run it
    Run(RunArgs),

    /// Package layers into a runner bundle
    Make {
        /// Layer to embed, repeatable, applied in order
        #[arg(short = 'l', long = "layer", required = true)]
        layers: Vec<String>,

        /// Output bundle path
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Directory where the bundle should look for the QEMU engine
        #[arg(long)]
        qemu_dir: Option<PathBuf>,
    },

    /// Create a new runner bundle on top of an existing one
    Derive {
        /// Base runner bundle
        #[arg(long)]
        bundle: PathBuf,

        /// Layer applied on top of the base layers, repeatable
        #[arg(short = 'l', long = "layer", required = true)]
        layers: Vec<String>,

        /// Output bundle path
        #[arg(short = 'o', long)]
        output: PathBuf,

        /// Keep searching for QEMU next to the base bundle
        #[arg(long)]
        track_qemu: bool,

        /// Directory where the derived bundle should look for the QEMU engine
        #[arg(long)]
        qemu_dir: Option<PathBuf>,
    },

    /// Print the layers embedded in a runner bundle
    Inspect {
        /// Runner bundle to inspect
        #[arg(long)]
        bundle: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Runner bundle whose layers are applied first
    #[arg(long)]
    bundle: Option<PathBuf>,

    /// Layer applied after the bundle's layers, repeatable
    #[arg(short = 'l', long = "layer")]
    layers: Vec<String>,

    /// Explicit path to QEMU executable
    #[arg(long)]
    qemu: Option<PathBuf>,

    /// Directory where the runner should look for the QEMU engine
    #[arg(long)]
    qemu_dir: Option<PathBuf>,

    /// Halt machine on startup
    #[arg(long)]
    halted: bool,

    /// Enable QEMU gdbserver
    #[arg(long)]
    debug: bool,

    /// QEMU gdbserver listen address
    #[arg(long, value_name = "DEVICE")]
    debug_listen: Option<String>,

    /// Do not execute QEMU, just print the command line
    #[arg(long)]
    dry_run: bool,

    /// Executable to run under QEMU
    #[arg(required_unless_present = "dry_run")]
    kernel: Option<PathBuf>,

    /// Arguments passed to the executable
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    arguments: Vec<String>,
}

fn fail(code: i32, err: impl Display) -> ! {
    eprintln!("error: {}", err);
    process::exit(code);
}

/// Insert `flags` right after the `run` subcommand token, if there is one.
fn splice_runner_flags(mut args: Vec<String>, flags: Vec<String>) -> Vec<String> {
    if flags.is_empty() {
        return args;
    }

    let mut index = 1;
    while index < args.len() {
        match args[index].as_str() {
            "--config" => index += 2,
            arg if arg.starts_with('-') => index += 1,
            "run" => {
                let tail = args.split_off(index + 1);
                args.extend(flags);
                args.extend(tail);
                return args;
            }
            _ => break,
        }
    }
    args
}

fn main() {
    let runner_flags = match run::env_flags(RUNNER_FLAGS_VAR) {
        Ok(flags) => flags,
        Err(e) => fail(EXIT_USAGE, e),
    };
    let cli = Cli::parse_from(splice_runner_flags(std::env::args().collect(), runner_flags));

    let config = match RunnerConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => fail(EXIT_USAGE, format!("Failed to load config: {}", e)),
    };

    logging::init(cli.verbose, config.log_level.as_deref());

    let code = match cli.command {
        Commands::Run(args) => run_run(args, &config),
        Commands::Make {
            layers,
            output,
            qemu_dir,
        } => run_make(&layers, &output, qemu_dir, &config),
        Commands::Derive {
            bundle,
            layers,
            output,
            track_qemu,
            qemu_dir,
        } => run_derive(&bundle, &layers, &output, track_qemu, qemu_dir, &config),
        Commands::Inspect { bundle } => run_inspect(&bundle),
    };

    process::exit(code);
}

fn absolute(path: &Path) -> PathBuf {
    match run::absolute_path(path) {
        Ok(path) => path,
        Err(e) => fail(EXIT_FAILURE, format!("Cannot resolve {}: {}", path.display(), e)),
    }
}

fn run_run(args: RunArgs, config: &RunnerConfig) -> i32 {
    let qemu_flags = match run::env_flags(QEMU_FLAGS_VAR) {
        Ok(flags) => flags,
        Err(e) => fail(EXIT_USAGE, e),
    };

    let kernel = args
        .kernel
        .as_deref()
        .map(|kernel| absolute(kernel).to_string_lossy().into_owned());

    let options = RunOptions {
        bundle: args.bundle,
        layers: args.layers,
        qemu: args.qemu,
        qemu_dir: args.qemu_dir,
        request: RunRequest {
            kernel,
            arguments: args.arguments,
            halted: args.halted,
            debug: args.debug,
            debug_listen: args.debug_listen,
        },
    };

    let cmdline = match run::plan_command_line(&options, config, SearchContext::from_env(), &qemu_flags) {
        Ok(cmdline) => cmdline,
        Err(e) => fail(EXIT_FAILURE, e),
    };

    if args.dry_run {
        println!("{}", shell::join(&cmdline));
        return 0;
    }

    match run::execute(&cmdline) {
        Ok(code) => code,
        Err(e) => fail(EXIT_FAILURE, e),
    }
}

fn write_bundle(result: &BundleResult, output: &Path) -> i32 {
    if let Err(e) = result.write(output) {
        fail(EXIT_FAILURE, format!("Failed to write {}: {}", output.display(), e));
    }
    println!(
        "Wrote {} ({} layers, {} bytes, sha256 {})",
        output.display(),
        result.manifest.layers.len(),
        result.size(),
        result.bundle_sha256
    );
    0
}

fn run_make(layers: &[String], output: &Path, qemu_dir: Option<PathBuf>, config: &RunnerConfig) -> i32 {
    let sources = LayerSources::from_config(config);
    let search_paths: Vec<PathBuf> = qemu_dir.iter().map(|dir| absolute(dir)).collect();

    match make_bundle(layers, &sources, &search_paths) {
        Ok(result) => write_bundle(&result, output),
        Err(e) => fail(EXIT_FAILURE, e),
    }
}

fn run_derive(
    bundle: &Path,
    layers: &[String],
    output: &Path,
    track_qemu: bool,
    qemu_dir: Option<PathBuf>,
    config: &RunnerConfig,
) -> i32 {
    let base = match RunnerBundle::load(bundle) {
        Ok(base) => base,
        Err(e) => fail(EXIT_FAILURE, format!("Failed to load {}: {}", bundle.display(), e)),
    };

    let sources = LayerSources::from_config(config).with_embedded(base.layers().to_vec());
    let options = DeriveOptions {
        track_qemu,
        qemu_dir: qemu_dir.as_deref().map(absolute),
    };

    match derive_bundle(&base, layers, &sources, &options) {
        Ok(result) => write_bundle(&result, output),
        Err(e) => fail(EXIT_FAILURE, e),
    }
}

fn run_inspect(bundle: &Path) -> i32 {
    match RunnerBundle::load(bundle) {
        Ok(bundle) => {
            print!("{}", bundle.inspect());
            0
        }
        Err(e) => fail(EXIT_FAILURE, format!("Failed to load {}: {}", bundle.display(), e)),
    }
}
