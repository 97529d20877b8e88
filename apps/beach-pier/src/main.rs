use anyhow::Result;
use beach_pier::config::{Cli, ServerConfig};
use beach_pier::{server, telemetry};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = telemetry::Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        dial_timeout_secs = config.dial_timeout.as_secs(),
        call_timeout_secs = config.call_timeout.as_secs(),
        "starting beach-pier"
    );

    server::run(config, telemetry.metrics_handle()).await
}
