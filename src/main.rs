//! WebSocket relay: servers push text, every connected client receives it.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use monoio_ws_relay::{RelayConfig, Server, config::DEFAULT_ROLE_HEADER};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ws-relay", about = "WebSocket relay from servers to clients", version)]
struct Cli {
    /// Listen address.
    #[arg(long, env = "WS_RELAY_LISTEN", default_value = "0.0.0.0:10090")]
    listen: SocketAddr,

    /// Request header whose value (`client` or `server`) selects the role of a peer.
    #[arg(long, env = "WS_RELAY_ROLE_HEADER", default_value = DEFAULT_ROLE_HEADER)]
    role_header: String,

    /// Maximum number of live connections (default: unbounded).
    #[arg(long, env = "WS_RELAY_MAX_CONNECTIONS")]
    max_connections: Option<usize>,

    /// Seconds a peer has to complete its opening handshake.
    #[arg(long, env = "WS_RELAY_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    handshake_timeout_secs: u64,

    /// Maximum size of the opening request head in bytes (default: 8192 = 8KB).
    #[arg(long, env = "WS_RELAY_MAX_HANDSHAKE_SIZE", default_value = "8192")]
    max_handshake_size: usize,

    /// Maximum payload size of an incoming frame in bytes, 0 for no limit (default: 16777216 = 16MB).
    #[arg(long, env = "WS_RELAY_MAX_FRAME_SIZE", default_value = "16777216")]
    max_frame_size: usize,

    /// Initial read buffer capacity of each connection in bytes.
    #[arg(long, env = "WS_RELAY_READ_BUFFER_CAPACITY", default_value = "4096")]
    read_buffer_capacity: usize,

    /// Bytes that may wait to be written to one peer before it is evicted (default: 1048576 = 1MB).
    #[arg(long, env = "WS_RELAY_MAX_QUEUED_BYTES", default_value = "1048576")]
    max_queued_bytes: usize,

    /// Accept unmasked frames from peers.
    #[arg(long, env = "WS_RELAY_ACCEPT_UNMASKED_FRAMES")]
    accept_unmasked_frames: bool,

    /// Log level, overridden by `RUST_LOG`.
    #[arg(long, env = "WS_RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format.
    #[arg(long, env = "WS_RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

impl Cli {
    fn config(&self) -> RelayConfig {
        RelayConfig::default()
            .listen(self.listen)
            .role_header(self.role_header.as_str())
            .max_connections(self.max_connections)
            .handshake_timeout(Duration::from_secs(self.handshake_timeout_secs))
            .max_handshake_size(self.max_handshake_size)
            .max_frame_size(Some(self.max_frame_size).filter(|&size| size > 0))
            .read_buffer_capacity(self.read_buffer_capacity)
            .max_queued_bytes(self.max_queued_bytes)
            .accept_unmasked_frames(self.accept_unmasked_frames)
    }
}

fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(false)
            .flatten_event(true)
            .with_filter(filter)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .context("failed to initialize logging")
}

#[monoio::main(timer_enabled = true)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format)?;

    let config = cli.config();
    tracing::info!(
        listen = %config.listen,
        role_header = %config.role_header,
        max_connections = ?config.max_connections,
        "starting relay"
    );

    let server = Server::bind(config).with_context(|| format!("failed to bind {}", cli.listen))?;
    server.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = Cli::parse_from(["ws-relay"]);
        let config = cli.config();
        assert_eq!(config.listen.port(), 10090);
        assert_eq!(config.role_header, "User-Agent");
        assert_eq!(config.max_connections, None);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.max_frame_size, Some(16 << 20));
        assert_eq!(config.max_handshake_size, 8 * 1024);
        assert_eq!(config.read_buffer_capacity, 4 * 1024);
        assert_eq!(config.max_queued_bytes, 1 << 20);
        assert!(!config.accept_unmasked_frames);
        assert_eq!(cli.log_format, LogFormat::Pretty);
    }

    #[test]
    fn flags() {
        let cli = Cli::parse_from([
            "ws-relay",
            "--listen",
            "127.0.0.1:9000",
            "--role-header",
            "X-Relay-Role",
            "--max-connections",
            "64",
            "--log-format",
            "json",
            "--max-frame-size",
            "0",
            "--max-queued-bytes",
            "65536",
            "--accept-unmasked-frames",
        ]);
        let config = cli.config();
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.role_header, "X-Relay-Role");
        assert_eq!(config.max_connections, Some(64));
        assert_eq!(config.max_frame_size, None);
        assert_eq!(config.max_queued_bytes, 65536);
        assert!(config.accept_unmasked_frames);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
