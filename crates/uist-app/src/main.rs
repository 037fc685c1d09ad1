//! UIST: hunters and prey on a shared field.
//!
//! `uist --role host` runs the authoritative game server and joins it with a
//! local client; `uist --role client --server ADDR` joins a remote host.
//! Commands are read from stdin, see [`controls`].
//!
//! Run with: `cargo run -p uist-app -- --role host --level 2`

mod controls;
mod settings;

use std::io;
use std::process::ExitCode;
use std::sync::{Mutex, MutexGuard, PoisonError};

use clap::Parser;
use tokio::io::BufReader;
use tracing::info;
use uist_config::{CliArgs, Config, Role, default_config_dir};
use uist_game::{GameClient, GameServer};

use crate::controls::Controller;
use crate::settings::BindAddressError;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    BindAddress(#[from] BindAddressError),
    #[error("failed to start the game server: {0}")]
    Serve(#[source] io::Error),
    #[error("failed to read commands: {0}")]
    Input(#[source] io::Error),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().or_else(default_config_dir);
    let mut config = match config_dir.as_deref() {
        Some(dir) => Config::load_or_create(dir).unwrap_or_else(|e| {
            eprintln!("Failed to load config: {e}, using defaults");
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.as_ref().map(|dir| dir.join("logs"));
    uist_log::init_logging(log_dir.as_deref(), cfg!(debug_assertions), Some(&config));

    match run(args.role, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(role: Role, config: &Config) -> Result<(), AppError> {
    let rules = settings::game_rules(&config.game);
    let client = GameClient::new(settings::client_config(&config.network), rules.clone());

    let result = match role {
        Role::Host => {
            let server = GameServer::new(settings::server_config(&config.network)?, rules);
            server.load_game(config.game.level);
            let addr = server.run().await.map_err(AppError::Serve)?;
            info!("Hosting level {} on {addr}", config.game.level);

            client.connect(&settings::local_endpoint(addr));
            let result = control(&client, Some(&server)).await;
            server.stop().await;
            result
        }
        Role::Client => {
            let endpoint = config.server_endpoint();
            info!("Joining {endpoint}");
            client.connect(&endpoint);
            control(&client, None).await
        }
    };

    client.stop();
    info!("Goodbye");
    result
}

async fn control(client: &GameClient, server: Option<&GameServer>) -> Result<(), AppError> {
    let input = BufReader::new(tokio::io::stdin());
    Controller::new(client, server)
        .run(input, interrupted())
        .await
        .map_err(AppError::Input)
}

/// Resolves on Ctrl+C. Never resolves if the handler cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}
