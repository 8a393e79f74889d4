//! `ntables server`: run a server until Ctrl-C.

use super::output::{print_until_ctrl_c, OutputFormat};
use ntables_core::Participant;
use ntables_server::{Server, ServerConfig};
use std::net::SocketAddr;
use tracing::info;

/// Runs the server command.
pub async fn run(
    port: u16,
    identity: &str,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        ServerConfig::new(SocketAddr::from(([0, 0, 0, 0], port))).with_identity(identity);
    let server = Server::new(config);
    let events = server.subscribe();

    let addr = server.start().await?;
    info!(%addr, "serving, press Ctrl-C to stop");
    print_until_ctrl_c("server", events, format).await;

    server.stop()?;
    Ok(())
}
