//! Tessel CLI
//!
//! Run a script once, or serve the scheduler over a script directory.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use tessel_core::{Capabilities, Stack, Value};
use tessel_runtime::diagnostics;
use tessel_runtime::report::{self, ReportConfig, ReportData};
use tessel_runtime::{MemoryMetrics, RegistryOptions, RunnerConfig, ScriptRunner, default_registry};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_DIRECTIVES: &str = "tessel_runtime=info,tessel_runner=info";

#[derive(ClapParser)]
#[command(name = "tessel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Tessel - run and schedule time-series scripts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a script once and print the resulting stack, top first
    Run {
        /// Script file
        script: PathBuf,

        /// Runner configuration (TOML) supplying loop budget and limits
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run every script under the script root on its periodicity
    Serve {
        /// Runner configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Script root, overriding the configuration
        #[arg(long)]
        root: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { script, config } => {
            init_logging();
            run_script(&script, config.as_deref());
        }
        Commands::Serve { config, root } => {
            init_logging();
            run_serve(config.as_deref(), root);
        }
        Commands::Completions { shell } => {
            run_completions(shell);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> RunnerConfig {
    match RunnerConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run_script(script: &Path, config_path: Option<&Path>) {
    let config = load_config(config_path);
    let source = match std::fs::read_to_string(script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error reading {}: {}", script.display(), e);
            process::exit(1);
        }
    };

    let registry = default_registry(&RegistryOptions {
        loop_max_duration_ms: config.loops.max_duration_ms,
    });
    let mut stack = Stack::new(Arc::new(registry), Capabilities::default(), config.limits());

    if let Err(e) = stack.exec_script(&source) {
        match e.operator() {
            Some(op) => eprintln!("{} in {}: {}", e.kind(), op, e),
            None => eprintln!("{}: {}", e.kind(), e),
        }
        process::exit(1);
    }
    print!("{}", format_stack(stack.values()));
}

/// One line per value, top of the stack first
fn format_stack(values: &[Value]) -> String {
    values
        .iter()
        .rev()
        .enumerate()
        .map(|(depth, v)| format!("{}: {}\n", depth, v))
        .collect()
}

fn run_serve(config_path: Option<&Path>, root: Option<PathBuf>) {
    let mut config = load_config(config_path);
    if let Some(root) = root {
        config.root = root;
    }

    let metrics = Arc::new(MemoryMetrics::new());
    let mut runner = match ScriptRunner::new(&config, Capabilities::default(), metrics.clone()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = diagnostics::install_shutdown_flag(Arc::clone(&shutdown)) {
        eprintln!("Error installing signal handlers: {}", e);
        process::exit(1);
    }
    diagnostics::install_signal_handler(Arc::clone(runner.schedule()), Some(metrics.clone()));

    let started = Instant::now();
    runner.run(&shutdown);
    info!(uptime_ms = started.elapsed().as_millis() as u64, "shutdown complete");

    if let Some(report_config) = ReportConfig::from_env() {
        let data = ReportData::collect(
            started.elapsed(),
            runner.schedule(),
            runner.pool(),
            &metrics,
        );
        report::emit_report(&report_config, &data);
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "tessel", &mut io::stdout());
}
