//! WinDbg MCP bridge
//!
//! Serves WinDbg command execution as MCP tools over stdio, forwarding each
//! call to the vibedbg extension over a named pipe.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use windbg_mcp::commands::Commands;
use windbg_mcp::common::{logging, Config, Result};
use windbg_mcp::{cli, server};

#[derive(Parser)]
#[command(name = "windbg-mcp", about = "MCP bridge to the WinDbg vibedbg extension")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Pipe name, with or without the `\\.\pipe\` prefix
    #[arg(long, global = true)]
    pipe: Option<String>,

    /// Configuration file (default: the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };
        if let Some(pipe) = &self.pipe {
            config.pipe.name = pipe.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let command = cli.command.clone().unwrap_or(Commands::Serve);

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = match command {
        Commands::Serve => Some(logging::init_server(cli.debug)),
        _ => {
            logging::init_cli(cli.debug);
            None
        }
    };

    let result = match cli.load_config() {
        Ok(config) => {
            let config = Arc::new(config);
            match command {
                Commands::Serve => server::run(config).await,
                Commands::Exec {
                    command,
                    timeout_ms,
                } => cli::exec(config, &command.join(" "), timeout_ms).await,
                Commands::Probe => cli::probe(config).await,
            }
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
