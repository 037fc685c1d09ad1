//! A real server and real clients over loopback.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::TcpListener;
use uist_game::{GameClient, GamePhase, GameRules, GameServer, Replicable};
use uist_net::{ClientConfig, PlayerId, ServerConfig};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `condition` until it holds, failing the test after two seconds.
async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn host(level: u32) -> (GameServer, String) {
    let server = GameServer::new(ServerConfig::default(), GameRules::default());
    server.load_game(level);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    server.run_with_listener(listener);
    (server, addr.to_string())
}

fn joined(address: &str) -> GameClient {
    let client = GameClient::new(ClientConfig::default(), GameRules::default());
    client.connect(address);
    client
}

async fn wait_for_mirror(client: &GameClient) {
    eventually("mirrored level", || {
        let game = lock(client.game());
        game.units().len() == 10
            && game.obstacles().len() == 6
            && game.own_player_id() != PlayerId::NONE
    })
    .await;
}

#[tokio::test]
async fn test_client_mirrors_level_and_learns_player_id() {
    let (server, address) = host(1).await;
    let client = joined(&address);
    wait_for_mirror(&client).await;

    assert!(client.is_connected());
    assert_eq!(client.own_player_id(), PlayerId::FIRST_CLIENT);
    let game = lock(client.game());
    assert_eq!(game.phase(), GamePhase::Empty);
    // Mirrored entities share the server's ids.
    let server_game = lock(server.game());
    for unit in server_game.units() {
        let id = lock(unit).message_id();
        assert!(game.unit_by_id(id).is_some());
    }
    drop(server_game);
    drop(game);
    server.stop().await;
}

#[tokio::test]
async fn test_move_request_moves_mirrored_unit() {
    let (server, address) = host(1).await;
    let client = joined(&address);
    wait_for_mirror(&client).await;

    server.start_game();
    client.move_unit(0, 0.0, 1.0);

    let mirrored = lock(client.game()).own_unit_by_index(0).unwrap();
    let start_x = lock(&mirrored).position().x;
    eventually("unit to move right", || {
        lock(&mirrored).position().x > start_x + 5.0
    })
    .await;

    // Other units stay where they were.
    let other = lock(client.game()).own_unit_by_index(1).unwrap();
    assert_eq!(lock(&other).position().x, 60.0);
    server.stop().await;
}

#[tokio::test]
async fn test_requests_queued_before_connecting_arrive_in_order() {
    let (server, address) = host(1).await;
    let client = GameClient::new(ClientConfig::default(), GameRules::default());
    // Index 0 is resolved once the server knows who sent it.
    client.highlight_unit(0, true);
    client.highlight_unit(0, false);
    client.highlight_unit(1, true);
    client.connect(&address);
    wait_for_mirror(&client).await;

    let game = server.game();
    eventually("highlight requests", || {
        let game = lock(game);
        let first = game.unit_by_index(PlayerId::FIRST_CLIENT, 0).unwrap();
        let second = game.unit_by_index(PlayerId::FIRST_CLIENT, 1).unwrap();
        !lock(&first).is_highlighted() && lock(&second).is_highlighted()
    })
    .await;
    server.stop().await;
}

#[tokio::test]
async fn test_second_client_plays_hunters_and_cannot_see_prey_by_index() {
    let (server, address) = host(1).await;
    let prey = joined(&address);
    wait_for_mirror(&prey).await;
    let hunter = joined(&address);
    wait_for_mirror(&hunter).await;

    assert_eq!(hunter.own_player_id(), PlayerId(5));
    let game = lock(hunter.game());
    assert!(game.unit_by_index(PlayerId::FIRST_CLIENT, 0).is_none());
    let own = game.own_unit_by_index(0).unwrap();
    assert_eq!(lock(&own).owner(), PlayerId(5));
    drop(game);
    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_cleans_up_clients() {
    let (server, address) = host(1).await;
    let client = joined(&address);
    wait_for_mirror(&client).await;

    server.stop().await;
    eventually("client cleanup", || {
        let game = lock(client.game());
        game.units().is_empty() && game.own_player_id() == PlayerId::NONE
    })
    .await;
    eventually("client to become idle", || client.accepts_connection()).await;
}

#[tokio::test]
async fn test_level_reload_reaches_every_mirror() {
    let (server, address) = host(1).await;
    let prey = joined(&address);
    wait_for_mirror(&prey).await;
    let hunter = joined(&address);
    wait_for_mirror(&hunter).await;

    server.load_game(4);
    let obstacle_ids: Vec<_> = lock(server.game())
        .obstacles()
        .iter()
        .map(|obstacle| lock(obstacle).message_id())
        .collect();
    for client in [&prey, &hunter] {
        eventually("mirror of the reloaded level", || {
            let game = lock(client.game());
            game.units().len() == 10
                && game.obstacles().len() == obstacle_ids.len()
                && obstacle_ids.iter().all(|id| game.obstacle_by_id(*id).is_some())
        })
        .await;
    }

    // Players keep their ids and still control their side.
    assert_eq!(prey.own_player_id(), PlayerId::FIRST_CLIENT);
    assert_eq!(hunter.own_player_id(), PlayerId(5));
    let own = lock(prey.game()).own_unit_by_index(0).unwrap();
    assert_eq!(lock(&own).position().x, 340.0);

    server.start_game();
    prey.move_unit(0, 0.0, 1.0);
    eventually("move on the reloaded level", || {
        lock(&own).position().x > 345.0
    })
    .await;
    server.stop().await;
}

#[tokio::test]
async fn test_client_reconnects_to_new_round() {
    let (server, address) = host(1).await;
    let client = joined(&address);
    wait_for_mirror(&client).await;

    server.load_game(3);
    client.reconnect();
    eventually("mirror of the new level", || {
        let game = lock(client.game());
        game.obstacles().len() == 8 && game.own_player_id() == PlayerId(5)
    })
    .await;
    server.stop().await;
}
