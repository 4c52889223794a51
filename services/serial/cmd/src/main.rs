//! Serial keeper binary.
//!
//! Keeps one serial-over-TCP peer connected in the background and drives it
//! from line commands on stdin. A console observer prints what the peer sends
//! while attached; while detached, events are buffered and the link indicator
//! is shown instead.

use clap::Parser;
use serial_session::{
    delivery_context, start_telemetry_processor, Command, ConnectionSession, DeliveryContext,
    LogPresentation, Observer, SerialError, SessionConfig, TcpTransport, TelemetryNotifier,
};
use bytes::Bytes;
use std::io::IsTerminal;
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::{KeeperConfig, TelemetryMode};
use logging::KeeperLogFormatter;

/// Background connection keeper for a serial peer
#[derive(Parser, Debug)]
#[command(name = "serial-keeper", version, about = "Background connection keeper for a serial peer")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Peer to connect to on startup, e.g. 127.0.0.1:7000
    #[arg(long)]
    connect: Option<String>,

    /// Longest a reconnect streak may run, e.g. 5m; 0s means forever
    #[arg(long)]
    reconnect_timeout: Option<humantime::Duration>,

    /// Telemetry mode: log, json, off
    #[arg(long)]
    telemetry: Option<String>,

    /// Start without the console observer attached
    #[arg(long)]
    detached: bool,
}

/// Prints peer events to the console
struct ConsoleObserver;

impl Observer for ConsoleObserver {
    fn on_connect(&self) {
        println!("** connected");
    }

    fn on_connect_error(&self, error: SerialError) {
        println!("** connect error: {}", error);
    }

    fn on_read(&self, batch: Vec<Bytes>) {
        for chunk in batch {
            print!("{}", String::from_utf8_lossy(&chunk));
        }
        println!();
    }

    fn on_io_error(&self, error: SerialError) {
        println!("** io error: {}", error);
    }
}

/// A line typed on stdin
#[derive(Debug)]
enum ConsoleCommand {
    Session(Command),
    Attach,
    Detach,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> anyhow::Result<Self> {
        let verb = line.split_whitespace().next().unwrap_or_default();
        match verb.to_ascii_lowercase().as_str() {
            "attach" => Ok(ConsoleCommand::Attach),
            "detach" => Ok(ConsoleCommand::Detach),
            "status" => Ok(ConsoleCommand::Status),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            _ => Ok(ConsoleCommand::Session(line.parse()?)),
        }
    }
}

/// Queue an attach behind everything already waiting on the delivery context
fn post_attach(ctx: &DeliveryContext, session: &ConnectionSession, observer: &Arc<dyn Observer>) {
    let session = session.clone();
    let observer = observer.clone();
    if ctx.post(Box::new(move || session.attach(&observer))).is_err() {
        warn!("Delivery context closed, attach dropped");
    }
}

fn post_detach(ctx: &DeliveryContext, session: &ConnectionSession) {
    let session = session.clone();
    if ctx.post(Box::new(move || session.detach())).is_err() {
        warn!("Delivery context closed, detach dropped");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("serial_keeper={}", args.log_level).parse()?)
        .add_directive(format!("serial_session={}", args.log_level).parse()?);

    let formatter = KeeperLogFormatter::new("serial-keeper");

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(std::io::stdout().is_terminal())
        .event_format(formatter)
        .init();

    info!("Starting serial keeper v{}", env!("CARGO_PKG_VERSION"));

    let mut keeper_config = KeeperConfig::load_from_file(&args.config)?;

    // Command line wins over file and environment
    if let Some(address) = args.connect.clone() {
        keeper_config.address = Some(address);
    }
    if let Some(timeout) = args.reconnect_timeout {
        keeper_config.reconnect_timeout = timeout.into();
    }
    if let Some(mode) = args.telemetry.as_deref() {
        keeper_config.telemetry = TelemetryMode::from_str(mode)?;
    }
    if args.detached {
        keeper_config.attach_on_start = false;
    }

    let telemetry = match keeper_config.telemetry.format() {
        Some(format) => {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            tokio::spawn(start_telemetry_processor(event_rx, format));
            TelemetryNotifier::new(event_tx)
        }
        None => TelemetryNotifier::disabled(),
    };

    let (ctx, mut delivery) = delivery_context();
    let session = ConnectionSession::new(
        SessionConfig {
            reconnect_timeout: keeper_config.reconnect_timeout,
        },
        Arc::new(TcpTransport::new()),
        ctx.clone(),
        Arc::new(LogPresentation),
        telemetry,
    );

    let observer: Arc<dyn Observer> = Arc::new(ConsoleObserver);
    if keeper_config.attach_on_start {
        post_attach(&ctx, &session, &observer);
    }

    if let Some(address) = keeper_config.address.clone() {
        session.execute(Command::Connect {
            address,
            reconnect_timeout: None,
        });
    }

    info!(
        "Ready; commands: connect <address> [timeout], disconnect, send <text>, attach, detach, status, quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            running = delivery.run_next() => {
                if !running {
                    warn!("Delivery context closed");
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed, keeping the session until interrupted");
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Session(command)) => session.execute(command),
                    Ok(ConsoleCommand::Attach) => post_attach(&ctx, &session, &observer),
                    Ok(ConsoleCommand::Detach) => post_detach(&ctx, &session),
                    Ok(ConsoleCommand::Status) => {
                        let status = session.status();
                        info!(
                            "connected={} target={:?} retrying={} reconnect_timeout={} attached={} buffered={}+{} pending_reads={}",
                            status.connected,
                            status.target,
                            status.retrying,
                            humantime::format_duration(status.reconnect_timeout),
                            status.delivery.attached,
                            status.delivery.in_flight_misses,
                            status.delivery.unattached,
                            status.delivery.pending_read_chunks
                        );
                    }
                    Ok(ConsoleCommand::Quit) => break,
                    Err(e) => warn!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    session.disconnect();
    let flushed = delivery.run_pending();
    info!("Serial keeper stopped ({} pending handoffs flushed)", flushed);

    // Give the telemetry processor a moment to drain
    tokio::time::sleep(Duration::from_millis(50)).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_commands() {
        assert!(matches!("attach".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Attach)));
        assert!(matches!("DETACH".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Detach)));
        assert!(matches!("quit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit)));
        assert!(matches!(
            "send hi".parse::<ConsoleCommand>(),
            Ok(ConsoleCommand::Session(Command::Send { .. }))
        ));
        assert!("frobnicate".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "serial-keeper",
            "--connect",
            "127.0.0.1:7000",
            "--reconnect-timeout",
            "30s",
            "--detached",
        ]);
        assert_eq!(args.connect.as_deref(), Some("127.0.0.1:7000"));
        assert_eq!(
            args.reconnect_timeout.map(Duration::from),
            Some(Duration::from_secs(30))
        );
        assert!(args.detached);
    }
}
