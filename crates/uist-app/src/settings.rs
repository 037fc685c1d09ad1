//! Translate the persisted [`uist_config::Config`] into the game and transport settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use uist_config::{GameConfig, NetworkConfig};
use uist_game::{GameRules, ScoreRule};
use uist_net::{ClientConfig, ReconnectConfig, ServerConfig};

/// The configured server address could not be bound.
#[derive(Debug, thiserror::Error)]
#[error("`{address}` is not an IP address to listen on")]
pub struct BindAddressError {
    pub address: String,
}

pub fn game_rules(game: &GameConfig) -> GameRules {
    GameRules {
        round_duration: Duration::from_secs(game.round_secs),
        tick_interval: Duration::from_millis(game.tick_millis.max(1)),
        score_rule: if game.score_hunters {
            ScoreRule::Versus
        } else {
            ScoreRule::PreyOnly
        },
    }
}

pub fn server_config(network: &NetworkConfig) -> Result<ServerConfig, BindAddressError> {
    let ip: IpAddr = network
        .server_address
        .parse()
        .map_err(|_| BindAddressError {
            address: network.server_address.clone(),
        })?;
    Ok(ServerConfig {
        bind_addr: SocketAddr::new(ip, network.server_port),
        max_connections: network.max_connections,
    })
}

pub fn client_config(network: &NetworkConfig) -> ClientConfig {
    ClientConfig {
        reconnect: network.retry_connect.then(ReconnectConfig::default),
        ..ClientConfig::default()
    }
}

/// Address the host's own client dials to reach `bound`.
pub fn local_endpoint(bound: SocketAddr) -> String {
    let ip = if bound.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        bound.ip()
    };
    SocketAddr::new(ip, bound.port()).to_string()
}
