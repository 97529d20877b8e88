use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;

use crate::session::SessionConfig;

#[derive(Debug, Parser)]
#[command(
    name = "beach-pier",
    author,
    version,
    about = "Bridges browser clients to remote Neovim UI sessions"
)]
pub struct Cli {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BEACH_PIER_LISTEN_ADDR", default_value = "127.0.0.1:9998")]
    pub listen_addr: String,

    /// Upper bound for dialing an editor and completing the handshake.
    #[arg(long, env = "BEACH_PIER_DIAL_TIMEOUT_SECS", default_value_t = 5)]
    pub dial_timeout_secs: u64,

    /// Upper bound for a single editor RPC call.
    #[arg(long, env = "BEACH_PIER_CALL_TIMEOUT_SECS", default_value_t = 10)]
    pub call_timeout_secs: u64,

    /// Messages queued per client before the editor listener waits.
    #[arg(long, env = "BEACH_PIER_OUTBOUND_BUFFER", default_value_t = 256)]
    pub outbound_buffer: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_PIER_SHUTDOWN_GRACE_SECS", default_value_t = 1)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub dial_timeout: Duration,
    pub call_timeout: Duration,
    pub outbound_buffer: usize,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            outbound_buffer: self.outbound_buffer,
            ..SessionConfig::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9998)),
            dial_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            outbound_buffer: 256,
            shutdown_grace: Duration::from_secs(1),
        }
    }
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        ensure!(cli.outbound_buffer >= 1, "outbound buffer must hold at least one message");
        Ok(ServerConfig {
            listen_addr,
            dial_timeout: Duration::from_secs(cli.dial_timeout_secs),
            call_timeout: Duration::from_secs(cli.call_timeout_secs),
            outbound_buffer: cli.outbound_buffer,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["beach-pier"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn explicit_flags_convert() {
        let cli = parse(&[
            "--listen-addr",
            "0.0.0.0:7000",
            "--dial-timeout-secs",
            "2",
            "--outbound-buffer",
            "8",
        ]);
        let config = ServerConfig::try_from(cli).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:7000".parse().unwrap());
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.session_config().outbound_buffer, 8);
    }

    #[test]
    fn rejects_bad_listen_addr() {
        let err = ServerConfig::try_from(parse(&["--listen-addr", "nowhere"])).unwrap_err();
        assert!(err.to_string().contains("invalid listen address"));
    }

    #[test]
    fn rejects_empty_buffer() {
        assert!(ServerConfig::try_from(parse(&["--outbound-buffer", "0"])).is_err());
    }
}
