//! NetworkTables CLI
//!
//! Runs a NetworkTables v3 server or client from the command line.
//!
//! # Commands
//!
//! - `server` - Serve entries and print every change
//! - `client` - Connect, publish values and print every change
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::output::OutputFormat;
use ntables_core::DEFAULT_PORT;
use tracing_subscriber::EnvFilter;

/// NetworkTables command-line tools.
#[derive(Parser)]
#[command(name = "ntables")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a server until Ctrl-C
    Server {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Identity announced to clients
        #[arg(short, long, default_value = "ntables")]
        identity: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Connect to a server and print entry changes until Ctrl-C
    Client {
        /// Server address, optionally with a port
        #[arg(short, long, default_value = "localhost")]
        address: String,

        /// Port used when the address has none
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Identity announced to the server
        #[arg(short, long, default_value = "ntables")]
        identity: String,

        /// Publish KEY=VALUE (repeatable)
        #[arg(short, long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Server {
            port,
            identity,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            commands::server::run(port, &identity, format).await?;
        }
        Commands::Client {
            address,
            port,
            identity,
            set,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            commands::client::run(&address, port, &identity, &set, format).await?;
        }
        Commands::Version => {
            println!("NetworkTables CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Protocol v{}.{}",
                ntables_protocol::PROTOCOL_MAJOR,
                ntables_protocol::PROTOCOL_MINOR
            );
        }
    }

    Ok(())
}
