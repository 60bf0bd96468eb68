use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use cloudwatchmetricbeat::{
    BEAT_NAME,
    beat::Beat,
    config::{Config, LoggingConfig, read_config_file},
    util::get_default_config_path,
};
use tracing::{debug, error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Polls metric statistics and ships them to an output")]
struct Args {
    /// Config file
    #[arg(
        short,
        long,
        env = "CLOUDWATCHMETRICBEAT_CONFIG",
        default_value_os_t = get_default_config_path()
    )]
    config: PathBuf,
}

fn init(logging: &LoggingConfig) -> anyhow::Result<()> {
    let level = match logging.level.as_deref() {
        Some(level) => level
            .parse::<LevelFilter>()
            .with_context(|| format!("invalid log level '{level}'"))?,
        None => LevelFilter::INFO,
    };
    let filter = filter::Targets::new().with_target(BEAT_NAME, level);

    let file_layer = match logging.log_file() {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;

            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .try_init()?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let config = read_config_file(&args.config);
    let logging = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();

    if let Err(e) = init(&logging) {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }
    trace!("started with args: {args:?}");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(code) => {
            info!("exiting with code {code}");
            ExitCode::from(code)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<u8> {
    let beat = Beat::from_config(&config)?;

    // Installed before readiness so an early signal is never missed
    let mut signals = ShutdownSignals::install()?;

    beat.start().await?;

    tokio::select! {
        name = signals.recv() => info!("received {name}, stopping"),
        _ = beat.stop_requested() => debug!("stop requested"),
    }

    let stop = beat.stop();
    tokio::pin!(stop);
    let report = loop {
        tokio::select! {
            report = &mut stop => break report,
            name = signals.recv() => {
                info!("received {name} while draining, already stopping");
            }
        }
    };
    debug!("final stats: {:?}", report.stats);

    Ok(report.exit_code())
}

/// SIGINT and SIGTERM, received as often as they arrive
#[cfg(unix)]
struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn install() -> anyhow::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())
                .context("failed to install SIGINT handler")?,
            terminate: signal(SignalKind::terminate())
                .context("failed to install SIGTERM handler")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn install() -> anyhow::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "Ctrl-C",
            Err(e) => {
                error!("failed to listen for Ctrl-C: {e}");
                std::future::pending().await
            }
        }
    }
}
