//! flowd CLI
//!
//! Flow-state daemon: samples behavioral signals and toggles focus mode.

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowd::{
    collector::{Registry, MANIFEST},
    config::Config,
    control::{LogisticPredictor, Predictor},
    error::SupervisorError,
    stats::PersistedStats,
    Supervisor, VERSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flowd")]
#[command(version = VERSION)]
#[command(about = "Flow-state daemon: samples behavioral signals and toggles focus mode", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon until Ctrl+C
    Start {
        /// Directory for logs, stats and the model
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Aggregation interval in seconds
        #[arg(long)]
        interval: Option<u64>,

        /// Run the control loop every N aggregation ticks
        #[arg(long)]
        control_every: Option<u32>,

        /// Focus threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        /// Number of recent rows scored per decision
        #[arg(long)]
        window: Option<usize>,

        /// Per-collector shutdown timeout in milliseconds
        #[arg(long)]
        stop_timeout_ms: Option<u64>,

        /// Serve GET /health and /status on this localhost port (requires server feature)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show configuration summary and cumulative statistics
    Status,

    /// List compiled-in collectors
    Collectors,

    /// Show effective configuration
    Config,

    /// Fit the model from the training CSV and save it
    Train,
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Start {
            data_dir,
            interval,
            control_every,
            threshold,
            window,
            stop_timeout_ms,
            port,
        } => {
            let mut config = config;
            if let Some(dir) = data_dir {
                config.data_path = dir;
            }
            if let Some(secs) = interval {
                config.collect_interval = Duration::from_secs(secs);
            }
            if let Some(n) = control_every {
                config.control_every = n;
            }
            if let Some(t) = threshold {
                config.threshold = t;
            }
            if let Some(n) = window {
                config.window_size = n;
            }
            if let Some(ms) = stop_timeout_ms {
                config.stop_timeout_ms = ms;
            }
            cmd_start(config, port)
        }
        Commands::Status => {
            cmd_status(&config);
            Ok(())
        }
        Commands::Collectors => {
            cmd_collectors(&config);
            Ok(())
        }
        Commands::Config => {
            cmd_config(&config, cli.config.as_deref());
            Ok(())
        }
        Commands::Train => cmd_train(&config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowd=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("could not load config from {}", path.display()))?,
        None => Config::load().context("could not load config")?,
    };
    Ok(config)
}

fn cmd_start(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    println!("flowd v{VERSION}");
    println!();

    let stop_timeout = config.stop_timeout();
    let supervisor = Arc::new(Supervisor::new(config));
    supervisor.configure().context("could not configure supervisor")?;

    let config = supervisor.config();
    println!("Collectors: {}", supervisor.columns().join(", "));
    println!("  Interval: {}s", config.collect_interval.as_secs_f64());
    println!("  Control every: {} tick(s)", config.control_every);
    println!("  Threshold: {:.2}", config.threshold);
    println!("  Window: {} rows", config.window_size);
    println!("  Data: {}", config.data_path.display());
    println!("Instance ID: {}", supervisor.status().instance_id);

    let token = supervisor.shutdown_token();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }

    #[cfg(feature = "server")]
    let _server = match port {
        Some(port) => {
            let runtime = tokio::runtime::Runtime::new().context("could not start runtime")?;
            let (addr, shutdown_tx) = runtime
                .block_on(flowd::server::run(port, Arc::clone(&supervisor)))
                .context("could not start status server")?;
            println!("  Status server: http://{addr}");
            Some((runtime, shutdown_tx))
        }
        None => None,
    };

    #[cfg(not(feature = "server"))]
    if port.is_some() {
        eprintln!("Warning: --port ignored (server feature not enabled at compile time)");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let outcome = supervisor.run();
    if let Err(SupervisorError::NoCollectors) = outcome {
        anyhow::bail!("no collectors were discovered");
    }

    println!();
    println!("Stopping collectors...");
    let report = supervisor.stop(stop_timeout);
    if !report.timed_out.is_empty() {
        eprintln!(
            "Warning: collectors still running at exit: {}",
            report.timed_out.join(", ")
        );
    }

    #[cfg(feature = "server")]
    if let Some((runtime, shutdown_tx)) = _server {
        let _ = shutdown_tx.send(());
        runtime.shutdown_timeout(Duration::from_secs(1));
    }

    println!("{}", supervisor.stats().summary());
    outcome.context("supervisor run failed")
}

fn cmd_status(config: &Config) {
    println!("flowd Status");
    println!("============");
    println!();

    println!("Configuration:");
    println!("  Interval: {}s", config.collect_interval.as_secs_f64());
    println!("  Control every: {} tick(s)", config.control_every);
    println!("  Threshold: {:.2}", config.threshold);
    println!("  Window: {} rows", config.window_size);
    println!("  Data: {}", config.data_path.display());
    println!(
        "  Mode command: {}",
        config
            .mode_command
            .as_ref()
            .map(|c| c.join(" "))
            .unwrap_or_else(|| "none (log only)".to_string())
    );
    println!(
        "  Model: {}",
        if config.model_path().exists() {
            "trained"
        } else {
            "not trained"
        }
    );
    println!();

    let stats_path = config.stats_path();
    match std::fs::read_to_string(&stats_path)
        .ok()
        .and_then(|content| serde_json::from_str::<PersistedStats>(&content).ok())
    {
        Some(stats) => {
            println!("Cumulative Statistics:");
            println!(
                "  Aggregation ticks: {} ({} failed)",
                stats.ticks_completed, stats.ticks_failed
            );
            println!("  Metric rows written: {}", stats.metrics_written);
            println!(
                "  Decisions applied: {} ({} skipped)",
                stats.decisions_applied, stats.decisions_skipped
            );
            println!("  Collector deaths: {}", stats.runner_deaths);
            println!("  Shutdown timeouts: {}", stats.shutdown_timeouts);
            println!("  Last updated: {}", stats.last_updated);
        }
        None => println!("No previous session data found."),
    }
}

fn cmd_collectors(config: &Config) {
    println!("Compiled-in collectors:");
    for registration in MANIFEST {
        let mark = if config.is_disabled(registration.name) {
            " (disabled)"
        } else {
            ""
        };
        println!("  {}{mark}", registration.name);
    }
}

fn cmd_config(config: &Config, path: Option<&std::path::Path>) {
    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {:?}",
        path.map(PathBuf::from).unwrap_or_else(Config::config_path)
    );
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_train(config: &Config) -> anyhow::Result<()> {
    let training_data = config
        .training_data
        .as_ref()
        .filter(|p| p.exists())
        .context("no training data found; set training_data in the config")?;

    let columns = Registry::discover(MANIFEST, config).names();
    if columns.is_empty() {
        anyhow::bail!("no collectors enabled, nothing to train on");
    }

    config.ensure_directories()?;
    let mut predictor = LogisticPredictor::from_config(config);
    predictor.train(&columns)?;

    let model = predictor.model().context("training produced no model")?;
    println!("Trained on {} rows from {}", model.samples, training_data.display());
    println!("Columns: {}", model.columns.join(", "));
    println!("Model saved to {}", config.model_path().display());
    Ok(())
}
