use clap::Parser;
use client::config::ClientConfig;
use client::game_state::GameState;
use client::main_thread::MainThread;
use client::worker::Worker;
use log::{debug, info, warn};
use shared::{ConnectionEvent, DEFAULT_PORT, N_VISIBLE_PLAYERS};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(short = 's', long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Room to join
    #[arg(short = 'r', long, default_value = "default")]
    room: String,

    /// Player name (defaults to the login name)
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Seconds to wait before reattaching after the stream drops
    #[arg(long)]
    reconnect_delay: Option<u64>,
}

impl Args {
    fn into_config(self) -> ClientConfig {
        ClientConfig {
            server: self.server,
            port: self.port,
            room: self.room,
            player_name: self.name.unwrap_or_else(ClientConfig::default_player_name),
            reconnect_delay: self.reconnect_delay.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, PartialEq)]
enum Input {
    Shout,
    Turn,
    Move { tile: usize, x: i32, y: i32 },
    Quit,
    Chat(String),
}

fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(Input::Chat(line.to_string())));
    }

    let mut words = line.split_whitespace();
    let input = match words.next().unwrap_or_default() {
        "/shout" => Input::Shout,
        "/turn" => Input::Turn,
        "/quit" => Input::Quit,
        "/move" => {
            let usage = || "usage: /move TILE X Y".to_string();
            let tile = words.next().and_then(|w| w.parse().ok()).ok_or_else(usage)?;
            let x = words.next().and_then(|w| w.parse().ok()).ok_or_else(usage)?;
            let y = words.next().and_then(|w| w.parse().ok()).ok_or_else(usage)?;
            Input::Move { tile, x, y }
        }
        other => return Err(format!("unknown command {}", other)),
    };

    Ok(Some(input))
}

fn apply_input(game: &GameState, input: Input) {
    match input {
        Input::Shout => game.shout(),
        Input::Turn => game.turn(),
        Input::Move { tile, x, y } => game.move_tile(tile, x, y),
        Input::Chat(text) => game.send_message(&text),
        Input::Quit => game.leave(),
    }
}

/// Builds the listener that prints reconciled events.
fn event_printer() -> impl FnMut(&ConnectionEvent) + Send + 'static {
    let mut names: Vec<Option<String>> = vec![None; N_VISIBLE_PLAYERS];

    move |event| match event {
        ConnectionEvent::Header { self_num } => info!("You are player {}", self_num),
        ConnectionEvent::PlayerNameChanged { player_num, name } => {
            info!("Player {} is {}", player_num, name);
            if let Some(slot) = names.get_mut(*player_num) {
                *slot = Some(name.clone());
            }
        }
        ConnectionEvent::PlayerFlagsChanged { player_num, flags } => {
            debug!("Player {} is now {}", player_num, flags);
        }
        ConnectionEvent::PlayerShoutingChanged {
            player_num,
            shouting: true,
        } => info!("Player {} shouts!", player_num),
        ConnectionEvent::PlayerShoutingChanged { .. } => {}
        ConnectionEvent::TileChanged {
            num,
            x,
            y,
            letter,
            new_tile,
            ..
        } => {
            if *new_tile {
                info!("Tile {} turned up: {} at ({}, {})", num, letter, x, y);
            } else {
                debug!("Tile {} moved to ({}, {})", num, x, y);
            }
        }
        ConnectionEvent::Message { player, text } => {
            let name = names
                .get(*player)
                .cloned()
                .flatten()
                .unwrap_or_else(|| format!("player {}", player));
            println!("{}: {}", name, text);
        }
        ConnectionEvent::Error { message } => warn!("{}", message),
        ConnectionEvent::RunningStateChanged { running } => {
            info!("{}", if *running { "Connected" } else { "Disconnected" });
        }
        ConnectionEvent::StateChanged => info!("Conversation state changed"),
        ConnectionEvent::PollChanged => {}
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    info!(
        "Joining room '{}' on {}:{} as {}",
        config.room, config.server, config.port, config.player_name
    );
    info!("Commands: /shout, /turn, /move TILE X Y, /quit; anything else is chat");

    let main_thread = Arc::new(MainThread::new());
    let stopped = Arc::new(AtomicBool::new(false));

    let mut worker = Worker::new(config);
    let game = Arc::new(GameState::new(worker.connection(), main_thread.clone()));
    game.subscribe(event_printer());

    let (flag, waker) = (stopped.clone(), main_thread.clone());
    worker.on_exit(move || {
        flag.store(true, Ordering::SeqCst);
        waker.wake();
    });
    worker.start()?;

    let (input_game, input_main, quit) = (game.clone(), main_thread.clone(), stopped.clone());
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            match parse_input(&line) {
                Ok(Some(Input::Quit)) => break,
                Ok(Some(input)) => {
                    let game = input_game.clone();
                    input_main.queue_idle(move || apply_input(&game, input));
                }
                Ok(None) => {}
                Err(e) => warn!("{}", e),
            }
        }

        input_main.queue_idle(move || {
            apply_input(&input_game, Input::Quit);
            quit.store(true, Ordering::SeqCst);
        });
    });

    main_thread.run_until(|| stopped.load(Ordering::SeqCst));

    drop(worker);
    info!("Bye");
    Ok(())
}
