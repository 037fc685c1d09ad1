//! Line-based stdin controller standing in for keyboard input.
//!
//! ```text
//! start                      start the loaded round (host only)
//! load N                     load level N for every player (host only)
//! move I ANGLE STRENGTH      accelerate own unit I; ANGLE in radians, STRENGTH in 0..=1
//! highlight I on|off         toggle the highlight of own unit I
//! status                     log the mirrored game
//! reconnect                  drop and re-open the server connection
//! quit                       leave
//! ```

use std::future::Future;
use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use uist_game::{GameClient, GameServer};

use crate::lock;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Load(u32),
    Move {
        index: u8,
        angle: f32,
        strength: f32,
    },
    Highlight {
        index: u8,
        on: bool,
    },
    Status,
    Reconnect,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects: {usage}")]
    Usage {
        command: &'static str,
        usage: &'static str,
    },
}

impl Command {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("start", []) => Command::Start,
            ("start", _) => return Err(usage("start", "start")),
            ("load", [level]) => Command::Load(level.parse().map_err(|_| usage("load", "load N"))?),
            ("load", _) => return Err(usage("load", "load N")),
            ("move", [index, angle, strength]) => {
                let parsed = (index.parse(), angle.parse(), strength.parse());
                let (Ok(index), Ok(angle), Ok(strength)) = parsed else {
                    return Err(usage("move", "move I ANGLE STRENGTH"));
                };
                Command::Move {
                    index,
                    angle,
                    strength,
                }
            }
            ("move", _) => return Err(usage("move", "move I ANGLE STRENGTH")),
            ("highlight", [index, toggle]) => {
                let on = match *toggle {
                    "on" => true,
                    "off" => false,
                    _ => return Err(usage("highlight", "highlight I on|off")),
                };
                let index = index
                    .parse()
                    .map_err(|_| usage("highlight", "highlight I on|off"))?;
                Command::Highlight { index, on }
            }
            ("highlight", _) => return Err(usage("highlight", "highlight I on|off")),
            ("status", []) => Command::Status,
            ("reconnect", []) => Command::Reconnect,
            ("quit" | "exit", []) => Command::Quit,
            _ => return Err(CommandError::Unknown(line.trim().to_string())),
        };
        Ok(Some(command))
    }
}

fn usage(command: &'static str, usage: &'static str) -> CommandError {
    CommandError::Usage { command, usage }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Applies commands to the local client and, on the host, the server.
pub struct Controller<'a> {
    client: &'a GameClient,
    server: Option<&'a GameServer>,
}

impl<'a> Controller<'a> {
    pub fn new(client: &'a GameClient, server: Option<&'a GameServer>) -> Self {
        Self { client, server }
    }

    /// Read commands from `input` until `quit`, end of input or `shutdown`.
    pub async fn run<R, S>(&self, input: R, shutdown: S) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut lines = input.lines();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match Command::parse(&line) {
                        Ok(Some(command)) => {
                            if !self.apply(command) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("{e}"),
                    }
                }
                () = &mut shutdown => {
                    tracing::info!("Interrupted");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Apply one command. Returns `false` once the controller should stop.
    pub fn apply(&self, command: Command) -> bool {
        match command {
            Command::Start => match self.server {
                Some(server) => server.start_game(),
                None => tracing::warn!("Only the host can start a round"),
            },
            Command::Load(level) => match self.server {
                Some(server) => server.load_game(level),
                None => tracing::warn!("Only the host can load a level"),
            },
            Command::Move {
                index,
                angle,
                strength,
            } => self.client.move_unit(index, angle, strength),
            Command::Highlight { index, on } => self.client.highlight_unit(index, on),
            Command::Status => self.log_status(),
            Command::Reconnect => self.client.reconnect(),
            Command::Quit => return false,
        }
        true
    }

    fn log_status(&self) {
        let game = lock(self.client.game());
        tracing::info!(
            connected = self.client.is_connected(),
            player = %game.own_player_id(),
            phase = ?game.phase(),
            units = game.units().len(),
            obstacles = game.obstacles().len(),
            "Status"
        );
        if let Some(server) = self.server {
            let game = lock(server.game());
            if game.has_started() {
                tracing::info!("Current result: {:?}", game.outcome());
            }
        }
    }
}
