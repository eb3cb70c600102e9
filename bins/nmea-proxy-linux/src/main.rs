use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nmea_proxy_core::{ProxyConfig, SerialErrorPolicy, SerialSpec};
use nmea_proxy_server::{spawn_signal_forwarder, NmeaProxy};

/// Multiplexes and forwards NMEA streams from serial ports and TCP sockets.
#[derive(Debug, Parser)]
#[command(name = "nmea-proxy", version)]
struct Args {
    /// Log level: DEBUG, INFO, WARNING, or ERROR
    #[arg(long, default_value = "INFO")]
    loglevel: String,

    /// Log file to append to (default: stderr)
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Serial device to attach, repeatable
    #[arg(long, value_name = "DEVICE[,BAUD]")]
    uart: Vec<SerialSpec>,

    /// TCP port to listen on, repeatable
    #[arg(long, value_name = "PORT")]
    tcp: Vec<u16>,

    /// JSON configuration file; flags are added on top of it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Worker polling interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// What to do when a serial device fails after opening: ignore or deregister
    #[arg(long)]
    serial_errors: Option<SerialErrorPolicy>,
}

impl Args {
    fn proxy_config(&self) -> anyhow::Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        config.serial.extend(self.uart.iter().cloned());
        config.tcp_ports.extend(self.tcp.iter().copied());
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if let Some(policy) = self.serial_errors {
            config.serial_error_policy = policy;
        }
        Ok(config)
    }
}

/// Map the classic level names onto a tracing filter directive.
fn level_directive(level: &str) -> anyhow::Result<&'static str> {
    match level.to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARN" | "WARNING" => Ok("warn"),
        "ERROR" | "CRITICAL" => Ok("error"),
        other => anyhow::bail!("Invalid log level: {}", other),
    }
}

/// Install the global subscriber. RUST_LOG, when set, overrides `--loglevel`.
///
/// The returned guard must be held until exit so buffered file output is
/// flushed.
fn init_tracing(args: &Args) -> anyhow::Result<Option<WorkerGuard>> {
    let level = level_directive(&args.loglevel)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &args.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_tracing(&args)?;
    let config = args.proxy_config()?;

    tracing::info!("NMEA proxy starting...");

    let proxy = NmeaProxy::start(config).await?;
    for addr in proxy.listener_addrs() {
        tracing::info!("   TCP: {}", addr);
    }
    for link in proxy.registry().stats() {
        tracing::info!("   {}", link.label);
    }

    let (controller, requests) = proxy.controller();
    let _signals = spawn_signal_forwarder(requests).context("installing signal handlers")?;
    tracing::info!("Ready. SIGUSR1 dumps link stats, Ctrl+C stops.");

    let report = controller.run().await;

    tracing::info!(
        "Shutdown complete ({} workers stopped, {} aborted)",
        report.stopped,
        report.aborted
    );
    Ok(())
}
