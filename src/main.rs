//! Dashboard real-time client
//!
//! Connects to the dashboard's real-time endpoint, prints subscribed messages and
//! status notices, and sends lines read from stdin.

use std::future::Future;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dashboard_realtime::config::StaticToken;
use dashboard_realtime::notice::{ChannelNoticeSink, LogNoticeSink, NoticeLevel, NoticeSink};
use dashboard_realtime::{ClientConfig, ConnectionManager, InboundMessage, TungsteniteTransport};

/// Dashboard real-time client
///
/// Keeps a WebSocket connection to the dashboard server alive
#[derive(Parser, Debug)]
#[command(name = "dashboard-realtime")]
#[command(version, about, long_about = None)]
struct Args {
    /// Endpoint URL (overrides the config file and DASHBOARD_WS_URL)
    #[arg(short, long)]
    url: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Authentication token (takes precedence over token_file)
    #[arg(long)]
    token: Option<String>,

    /// Enable automatic reconnection
    #[arg(long)]
    auto_reconnect: bool,

    /// Reconnect budget when auto-reconnect is enabled
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Event types to print, may be repeated
    #[arg(short, long = "subscribe")]
    subscribe: Vec<String>,

    /// Write status notices to the log instead of stdout
    #[arg(long)]
    log_notices: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Dashboard real-time client v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args)?;
    config
        .endpoint()
        .with_context(|| format!("Cannot connect to {}", config.url))?;
    info!(
        "Endpoint {} (auto-reconnect: {}, max attempts: {})",
        config.url, config.auto_reconnect, config.max_reconnect_attempts
    );

    let (notices, mut notice_rx) = ChannelNoticeSink::new();
    let transport = TungsteniteTransport::new();
    let manager = match args.token.clone() {
        Some(token) => {
            ConnectionManager::init_with_token_store(config, transport, notices, StaticToken::new(token))
        }
        None => ConnectionManager::init(config, transport, notices),
    };

    let subscriptions: Vec<_> = args
        .subscribe
        .iter()
        .map(|event_type| manager.subscribe(event_type.as_str(), print_message))
        .collect();

    let log_notices = args.log_notices;
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            if log_notices {
                LogNoticeSink.notify(notice);
                continue;
            }
            let marker = match notice.level {
                NoticeLevel::Info => "i",
                NoticeLevel::Success => "+",
                NoticeLevel::Warning => "!",
                NoticeLevel::Error => "x",
            };
            println!("[{}] {}", marker, notice.message);
        }
    });

    let stdin = BufReader::new(tokio::io::stdin());
    run_console(stdin, &manager, shutdown_signal()).await?;

    drop(subscriptions);
    manager.shutdown().await;
    info!("Client shutdown complete");
    Ok(())
}

/// Drive the manager from console lines until EOF, `:quit` or `shutdown` resolves
async fn run_console<R>(
    reader: R,
    manager: &ConnectionManager,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let environment = manager.environment();
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                match line.trim() {
                    "" => {}
                    ":quit" => break,
                    ":reconnect" => manager.reconnect(),
                    ":status" => println!(
                        "status={} attempts={}",
                        manager.connection_status(),
                        manager.reconnect_attempts()
                    ),
                    ":visible" => environment.visibility_changed(true),
                    ":hidden" => environment.visibility_changed(false),
                    ":online" => environment.network_changed(true),
                    ":offline" => environment.network_changed(false),
                    payload => manager.send_message(payload),
                }
            }
            _ = &mut shutdown => {
                info!("Initiating graceful shutdown...");
                break;
            }
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    config = config.with_env_overrides().with_url_override(args.url.clone());

    if args.auto_reconnect {
        config.auto_reconnect = true;
        if config.max_reconnect_attempts == 0 {
            config.max_reconnect_attempts = ClientConfig::active().max_reconnect_attempts;
        }
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_reconnect_attempts = max_attempts;
    }
    Ok(config)
}

fn print_message(message: &InboundMessage) {
    let data = message
        .data()
        .map(|value| value.to_string())
        .unwrap_or_default();
    println!("<{}> {} {}", message.event_type, message.timestamp, data);
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    fn idle_manager() -> ConnectionManager {
        let config = ClientConfig {
            connect_on_init: false,
            ..ClientConfig::default()
        };
        let (notices, _notice_rx) = ChannelNoticeSink::new();
        ConnectionManager::init(config, TungsteniteTransport::new(), notices)
    }

    #[tokio::test]
    async fn test_console_stops_on_shutdown_after_input() {
        let manager = idle_manager();
        let (mut input, output) = duplex(256);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let console = run_console(BufReader::new(output), &manager, async {
            let _ = stop_rx.await;
        });
        let driver = async {
            input.write_all(b":status\n:hidden\n\n").await.unwrap();
            sleep(Duration::from_millis(20)).await;
            stop_tx.send(()).unwrap();
        };

        // Input stays open, so only the shutdown future can end the loop
        let (result, ()) = tokio::join!(timeout(Duration::from_secs(5), console), driver);
        result.expect("console ignored shutdown").unwrap();
        drop(input);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_console_quit_command() {
        let manager = idle_manager();
        let (mut input, output) = duplex(64);
        input.write_all(b":quit\n").await.unwrap();

        let result = timeout(
            Duration::from_secs(5),
            run_console(BufReader::new(output), &manager, std::future::pending()),
        )
        .await;
        result.expect("console ignored :quit").unwrap();
        assert_eq!(manager.connection_status(), dashboard_realtime::ConnectionState::Disconnected);
        manager.shutdown().await;
    }
}
