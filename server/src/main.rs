use clap::Parser;
use log::{debug, info, warn};
use server::{CommandHandler, Server, ServerConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// JSON config file; flags below override its values
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Number of player slots
    #[clap(short, long)]
    max_connections: Option<usize>,
    /// Seconds of silence before a connection is dropped (0 disables)
    #[clap(long)]
    idle_timeout: Option<u64>,
    /// Enable debug logging
    #[clap(short, long)]
    verbose: bool,
    /// Tick rate (dispatcher drains per second)
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
}

impl Args {
    fn into_config(self) -> Result<(ServerConfig, u32), Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_json_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_connections) = self.max_connections {
            config.max_connections = max_connections;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }
        config.verbose |= self.verbose;

        Ok((config, self.tick_rate.max(1)))
    }
}

/// Last known controller state of one player
#[derive(Debug, Default)]
struct PlayerState {
    name: String,
    joystick: (f32, f32),
    gyro: (f32, f32, f32),
    keys_pressed: u64,
}

/// Standalone collaborator that tracks players and logs their input
#[derive(Debug, Default)]
struct ConsoleHandler {
    players: BTreeMap<usize, PlayerState>,
}

impl ConsoleHandler {
    fn player(&mut self, player_id: usize) -> Option<&mut PlayerState> {
        let player = self.players.get_mut(&player_id);
        if player.is_none() {
            warn!("Input for unknown player {}", player_id);
        }
        player
    }
}

impl CommandHandler for ConsoleHandler {
    fn register(&mut self, player_id: usize, player_name: &str) {
        info!("Player {} '{}' joined", player_id, player_name);
        self.players.insert(
            player_id,
            PlayerState {
                name: player_name.to_string(),
                ..Default::default()
            },
        );
    }

    fn deregister(&mut self, player_id: usize) {
        if let Some(player) = self.players.remove(&player_id) {
            info!(
                "Player {} '{}' left after {} key presses (last joystick {:?}, gyro {:?})",
                player_id, player.name, player.keys_pressed, player.joystick, player.gyro
            );
        }
    }

    fn key_down(&mut self, player_id: usize, key: &str, extra: &str) {
        if let Some(player) = self.player(player_id) {
            player.keys_pressed += 1;
            info!("{} pressed {} {}", player.name, key, extra);
        }
    }

    fn joystick(&mut self, player_id: usize, x: f32, y: f32) {
        if let Some(player) = self.player(player_id) {
            player.joystick = (x, y);
            debug!("{} joystick ({:.2}, {:.2})", player.name, x, y);
        }
    }

    fn gyro(&mut self, player_id: usize, x: f32, y: f32, z: f32) {
        if let Some(player) = self.player(player_id) {
            player.gyro = (x, y, z);
            debug!("{} gyro ({:.2}, {:.2}, {:.2})", player.name, x, y, z);
        }
    }
}

/// Main-method of the application.
/// Parses command-line arguments, binds the server, then drains the dispatcher at the tick rate.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, tick_rate) = Args::parse().into_config()?;

    let default_level = if config.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let server = Server::bind(config, ConsoleHandler::default()).await?;

    tokio::select! {
        _ = run_tick_loop(&server, tick_rate) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    server.shutdown();
    server.wait().await;
    // Deliver the final deregister callbacks
    server.run_pending();

    Ok(())
}

/// Runs queued handler callbacks once per tick, on this task only
async fn run_tick_loop(server: &Server, tick_rate: u32) {
    let mut interval_timer = interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut tick: u64 = 0;
    loop {
        interval_timer.tick().await;
        server.run_pending();

        tick += 1;
        // Periodic status, roughly every ten seconds
        if tick % (u64::from(tick_rate) * 10) == 0 {
            debug!(
                "Tick {}: {} players connected {:?}",
                tick,
                server.player_count(),
                server.players()
            );
        }
    }
}
