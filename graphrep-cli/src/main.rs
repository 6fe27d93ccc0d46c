//! graphrep-cli - Command-line interface for graphrep
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use graphrep_client::{Client, ConnectionConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "graphrep-cli")]
#[command(about = "Command-line interface for the graphrep graph server")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "GRAPHREP_SERVER", default_value = "127.0.0.1:47474")]
    server: SocketAddr,

    /// Seconds to wait for a whole exchange
    #[arg(long, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Get a node
    GetNode {
        /// Node ID
        id: u64,
    },

    /// Create a node
    CreateNode {
        /// Labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Vec<String>,

        /// Properties as a JSON map (or @file.json)
        #[arg(short, long)]
        props: Option<String>,
    },

    /// Replace every label and property of a node
    PutNode {
        /// Node ID
        id: u64,

        /// Labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Vec<String>,

        /// Properties as a JSON map (or @file.json)
        #[arg(short, long)]
        props: Option<String>,
    },

    /// Add labels and merge properties into a node
    PatchNode {
        /// Node ID
        id: u64,

        /// Labels (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        labels: Vec<String>,

        /// Properties as a JSON map; null removes a key
        #[arg(short, long)]
        props: Option<String>,
    },

    /// Delete a node
    DeleteNode {
        /// Node ID
        id: u64,
    },

    /// Get a relationship
    GetRel {
        /// Relationship ID
        id: u64,
    },

    /// Create a relationship
    CreateRel {
        /// Start node ID
        start: u64,

        /// End node ID
        end: u64,

        /// Relationship type
        rel_type: String,

        /// Properties as a JSON map (or @file.json)
        #[arg(short, long)]
        props: Option<String>,
    },

    /// Delete a relationship
    DeleteRel {
        /// Relationship ID
        id: u64,
    },

    /// Run a query
    Query {
        /// Query text
        query: String,

        /// Parameters as a JSON map
        #[arg(short, long)]
        params: Option<String>,
    },

    /// List nodes by label, optionally filtered by one property
    Nodes {
        /// Label
        label: String,

        /// Property key
        #[arg(short, long)]
        key: Option<String>,

        /// Property value literal
        #[arg(short, long)]
        value: Option<String>,
    },

    /// Get or create nodes by label and property
    Merge {
        /// Label
        label: String,

        /// Property key
        key: String,

        /// Property value literal
        value: String,
    },

    /// Send a raw request and print every frame
    Send {
        /// Verb (GET, PUT, PATCH, POST, DELETE)
        method: String,

        /// Resource name
        resource: String,

        /// Argument literals
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config =
        ConnectionConfig::new(cli.server).with_request_timeout(Duration::from_secs(cli.timeout));
    let client = Client::new(config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(client, cli.server).await?;
        }
        Some(cmd) => {
            client.connect().await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;

            match commands::execute(&client, cmd).await {
                Ok(output) => {
                    println!("{}", output);
                }
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    std::process::exit(1);
                }
            }

            client.close().await?;
        }
    }

    Ok(())
}
