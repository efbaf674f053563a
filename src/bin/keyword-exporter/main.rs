// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use keyword_exporter::bounded_channel::{TrySendError, bounded};
use keyword_exporter::init::agent::Agent;
use keyword_exporter::init::args::AgentRun;
use keyword_exporter::init::config::AgentConfig;
use keyword_exporter::init::wait;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Run agent
    Start(Box<AgentRun>),
    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "keyword-exporter")]
#[command(bin_name = "keyword-exporter")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "KEYWORD_EXPORTER_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    match opt.command {
        Some(Commands::Version) => {
            println!("{}", get_version())
        }
        Some(Commands::Start(agent)) => {
            let config = match AgentConfig::load(agent.config.as_deref()) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::from(1);
                }
            };

            let _guard = match setup_logging(&opt.log_format, agent.log_path.as_deref()) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("ERROR: failed to setup logging: {}", e);
                    return ExitCode::from(1);
                }
            };

            if let Err(e) = run_agent(agent, config) {
                error!(error = %e, "Failed to run agent.");
                return ExitCode::from(1);
            }
        }
        None => {
            // unreachable while a subcommand is required
            eprintln!("ERROR: must specify a command");
            return ExitCode::from(2);
        }
    }

    ExitCode::SUCCESS
}

#[tokio::main]
async fn run_agent(agent_args: Box<AgentRun>, config: AgentConfig) -> Result<(), BoxError> {
    let mut agent_join_set = JoinSet::new();
    let cancel_token = CancellationToken::new();
    let (checkpoint_tx, checkpoint_rx) = bounded(1);
    let shutdown_timeout = Duration::from_secs(agent_args.shutdown_timeout_secs);

    {
        let token = cancel_token.clone();
        let agent_fut = async move {
            Agent::new(config, shutdown_timeout)
                .with_checkpoint_requests(checkpoint_rx)
                .run(token)
                .await
        };
        agent_join_set.spawn(agent_fut);
    }

    let mut sig_term = sig(SignalKind::terminate())?;
    let mut sig_int = sig(SignalKind::interrupt())?;
    let mut sig_usr1 = sig(SignalKind::user_defined1())?;

    loop {
        select! {
            _ = sig_term.recv() => {
                info!("Signal SIGTERM received, shutting down.");
                cancel_token.cancel();
                break;
            },
            _ = sig_int.recv() => {
                info!("Signal SIGINT received, shutting down.");
                cancel_token.cancel();
                break;
            },
            _ = sig_usr1.recv() => {
                match checkpoint_tx.try_send(()) {
                    Ok(()) => info!("Signal SIGUSR1 received, requesting checkpoint."),
                    Err(TrySendError::Full) => debug!("Checkpoint already pending."),
                    Err(TrySendError::Disconnected) => warn!("Agent is not accepting checkpoint requests."),
                }
            },
            e = wait::wait_for_any_task(&mut agent_join_set) => {
                match e {
                    Ok(()) => warn!("Unexpected early exit of agent."),
                    Err(e) => return Err(e),
                }
                break;
            },
        }
    }

    // The agent bounds its own shutdown, so this only catches a wedged agent.
    wait::wait_for_tasks_with_timeout(&mut agent_join_set, shutdown_timeout * 2).await?;

    Ok(())
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(
    log_format: &LogFormatArg,
    log_path: Option<&Path>,
) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard, use_ansi) = match log_path {
        Some(path) => {
            let dir = match path.parent() {
                Some(d) if !d.as_os_str().is_empty() => d,
                _ => Path::new("."),
            };
            let file_name = path
                .file_name()
                .ok_or_else(|| format!("invalid log path: {}", path.display()))?;
            fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create log directory {}: {}", dir.display(), e))?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, false)
        }
        None => {
            use std::io::IsTerminal;
            // Skip color codes when not in a terminal
            let use_ansi = std::io::stdout().is_terminal();
            let (writer, guard) = tracing_appender::non_blocking(std::io::stdout());
            (writer, guard, use_ansi)
        }
    };

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?
        .add_directive("hyper_util=warn".parse()?)
        .add_directive("rustls=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);
        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn get_version() -> String {
    // Set during CI
    let version_build = option_env!("BUILD_SHORT_SHA").unwrap_or("dev");
    format!("{}-{}", env!("CARGO_PKG_VERSION"), version_build)
}

fn sig(kind: SignalKind) -> Result<Signal, BoxError> {
    signal(kind).map_err(|e| format!("failed to install signal handler: {}", e).into())
}
