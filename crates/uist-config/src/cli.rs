//! Command-line argument parsing.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::Config;

/// What this process runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Game server plus a local client.
    #[default]
    Host,
    /// A client of a remote server.
    Client,
}

/// UIST command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "uist", about = "UIST hunters and prey")]
pub struct CliArgs {
    /// Run the server with a local client, or only a client.
    #[arg(long, value_enum, default_value_t = Role::Host)]
    pub role: Role,

    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Level to load (host only).
    #[arg(long)]
    pub level: Option<u32>,

    /// Round duration in seconds (host only).
    #[arg(long)]
    pub round_secs: Option<u64>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(level) = args.level {
            self.game.level = level;
        }
        if let Some(secs) = args.round_secs {
            self.game.round_secs = secs;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
