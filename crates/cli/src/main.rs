mod config_commands;
mod console;
mod demo;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "palaver", about = "Conversational bot dispatcher on the console")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the standard search locations.
    #[arg(long, global = true, env = "PALAVER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the demo bot over stdin/stdout (default when no subcommand
    /// is provided).
    Run {
        /// User id attached to every line read from stdin.
        #[arg(long, default_value = "console")]
        user: String,
        /// Print Prometheus metrics to stderr on exit.
        #[cfg(feature = "prometheus")]
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr; stdout carries the conversation.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = config_commands::load(cli.config.as_deref())?;

    match cli.command {
        None => {
            info!("no subcommand given, starting console bot");
            console::run(config, "console".into()).await
        },
        #[cfg(feature = "prometheus")]
        Some(Commands::Run { user, metrics }) => {
            let handle = palaver_metrics::init_metrics(palaver_metrics::MetricsRecorderConfig {
                enabled: metrics,
                global_labels: Vec::new(),
            })?;
            let result = console::run(config, user).await;
            if metrics {
                eprintln!("{}", handle.render());
            }
            result
        },
        #[cfg(not(feature = "prometheus"))]
        Some(Commands::Run { user }) => console::run(config, user).await,
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, &config, cli.config.as_deref())
        },
    }
}
