mod cli;
mod config;
mod dcc;
mod irc;
mod logging;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "crabbooks", version, about)]
struct Args {
    /// Config file (default: <config dir>/crabbooks/config.toml)
    #[arg(long, global = true, env = "CRABBOOKS_CONFIG")]
    config: Option<PathBuf>,

    /// IRC nickname
    #[arg(long, global = true)]
    name: Option<String>,

    /// Download directory
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Search and download from the terminal (default)
    Cli,
    /// Serve WebSocket clients, each with its own IRC session
    Server {
        /// Address to listen on
        #[arg(long)]
        listen: Option<String>,

        /// Keep books in the download directory after serving them
        #[arg(long)]
        persist: bool,
    },
}

impl Args {
    fn mode(&self) -> Mode {
        self.mode.clone().unwrap_or(Mode::Cli)
    }

    fn apply(&self, config: &mut AppConfig) {
        if let Some(name) = &self.name {
            config.irc.nickname = Some(name.clone());
        }
        if let Some(dir) = &self.dir {
            config.dcc.download_dir = dir.clone();
        }
        if let Mode::Server { listen, persist } = self.mode() {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            config.server.persist |= persist;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = args.mode();
    logging::init_tracing(match mode {
        Mode::Cli => "crabbooks=warn",
        Mode::Server { .. } => "crabbooks=info",
    });
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let mut cfg = config::load_config(args.config.as_deref())?;
    args.apply(&mut cfg);

    match mode {
        Mode::Cli => cli::run(cfg).await,
        Mode::Server { .. } => server::run(cfg).await,
    }
}
