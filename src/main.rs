//! Gateway binary.
//!
//! Usage:
//!   coderoom serve [--port 3001]

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::warn;

use coderoom::allowlist::Allowlist;
use coderoom::config::Config;
use coderoom::http;
use coderoom::jobs::store::SqliteJobStore;
use coderoom::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "coderoom")]
#[command(about = "Collaborative code-room gateway")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env();

    match args.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);

            // A missing allowlist leaves every package invalid rather than
            // refusing to start.
            let allowlist = match Allowlist::load(&config.allowlist_path) {
                Ok(allowlist) => allowlist,
                Err(err) => {
                    warn!(%err, path = %config.allowlist_path.display(), "failed to load allowlist");
                    Allowlist::empty()
                }
            };

            let store = Arc::new(SqliteJobStore::open(&config.store_path)?);
            let state = AppState::new(config, allowlist, store);
            http::run_server(port, state).await
        }
    }
}
