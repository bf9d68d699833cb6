mod config;
mod events;
mod session;
mod simulation;
mod tui;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use config::SessionConfig;
use events::SessionEvent;
use session::Session;
use tui::TuiState;
use versus::net::Role;
use versus::{GameEvent, GameMode, LobbyEvent, NetConfig};

/// How long a finished session keeps running so the last frames get through.
const FINISH_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "versus")]
#[command(about = "Two-player versus session over TCP")]
struct Args {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, global = true, default_value_t = versus::DEFAULT_PORT)]
    port: u16,

    #[arg(long, global = true, help = "Log to stderr instead of drawing a dashboard")]
    headless: bool,

    #[arg(long, global = true, default_value_t = 1000, help = "Heartbeat interval in ms")]
    heartbeat_ms: u64,

    #[arg(long, global = true, default_value_t = 5000, help = "Heartbeat timeout in ms")]
    timeout_ms: u64,

    #[arg(long, global = true, default_value_t = 24, help = "Blocks in the scripted game")]
    pieces: u32,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for a guest on the given port.
    Host {
        #[arg(short, long, value_enum, default_value_t = ModeArg::Normal)]
        mode: ModeArg,

        #[arg(long, help = "Start as soon as the guest is ready")]
        auto_start: bool,
    },
    /// Connect to a host.
    Join {
        #[arg(default_value = "127.0.0.1")]
        host: String,

        #[arg(long, help = "Ready up as soon as the host picks a mode")]
        auto_ready: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Normal,
    Item,
}

impl From<ModeArg> for GameMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Normal => GameMode::Normal,
            ModeArg::Item => GameMode::Item,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SessionConfig {
        net: NetConfig::default().with_port(args.port).with_heartbeat(
            Duration::from_millis(args.heartbeat_ms),
            Duration::from_millis(args.timeout_ms),
        ),
        pieces: args.pieces,
        ..Default::default()
    };
    // Nobody presses keys in headless mode.
    config.auto_ready = args.headless;
    config.auto_start = args.headless;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let session = match &args.command {
        Command::Host { mode, auto_start } => {
            config.mode = (*mode).into();
            config.auto_start |= *auto_start;
            println!("Waiting for a guest on port {}...", args.port);
            Session::host(config)?
        }
        Command::Join { host, auto_ready } => {
            config.auto_ready |= *auto_ready;
            println!("Connecting to {}:{}...", host, args.port);
            Session::join(config, host)?
        }
    };

    if args.headless {
        run_headless(session)
    } else {
        run_with_tui(session)?;
        Ok(())
    }
}

fn run_headless(mut session: Session) -> Result<()> {
    if let Some(peer) = session.remote_addr() {
        log::info!("Session with {} as {:?}", peer, session.role());
    }

    let mut finished_at = None;
    loop {
        for event in session.tick() {
            if let Some(line) = describe(&event) {
                log::info!("{}", line);
            }
            match event {
                SessionEvent::Finished => finished_at = Some(Instant::now()),
                SessionEvent::Disconnected(reason) => {
                    log::warn!("Session ended: {}", reason.as_str());
                    return Ok(());
                }
                _ => {}
            }
        }
        if finished_at.is_some_and(|at: Instant| at.elapsed() >= FINISH_GRACE) {
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }

    let stats = session.stats();
    log::info!(
        "Final score {} vs {}, {} garbage lines received",
        stats.score,
        stats.opponent_score,
        stats.garbage
    );
    session.shutdown(Duration::from_millis(200));
    Ok(())
}

fn run_with_tui(mut session: Session) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tui_state = TuiState::new();
    if let Some(peer) = session.remote_addr() {
        tui_state.log_info(format!("Connected to {}", peer));
    }

    let mut running = true;
    while running {
        for event in session.tick() {
            match &event {
                SessionEvent::Disconnected(reason) => {
                    tui_state.log_error(format!("Session ended: {}", reason.as_str()))
                }
                SessionEvent::Garbage { .. } => {
                    if let Some(line) = describe(&event) {
                        tui_state.log_warn(line);
                    }
                }
                _ => {
                    if let Some(line) = describe(&event) {
                        tui_state.log_info(line);
                    }
                }
            }
        }

        if event::poll(Duration::from_millis(20))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            let outcome = match key.code {
                KeyCode::Char('q') | KeyCode::Esc => {
                    running = false;
                    Ok(())
                }
                KeyCode::Char('r') if session.role() == Role::Guest => session
                    .toggle_ready()
                    .map(|ready| tui_state.log_info(if ready { "Ready" } else { "Not ready" })),
                KeyCode::Char('s') if session.role() == Role::Host => session.start(),
                KeyCode::Char('m') if session.role() == Role::Host && !session.is_started() => {
                    session
                        .switch_mode()
                        .map(|mode| tui_state.log_info(format!("Mode: {}", mode.as_str())))
                }
                _ => Ok(()),
            };
            if let Err(e) = outcome {
                tui_state.log_warn(e.to_string());
            }
        }

        let stats = session.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats);
        })?;
    }

    tui_state.log_info("Shutting down...");
    session.shutdown(Duration::ZERO);

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

fn describe(event: &SessionEvent) -> Option<String> {
    let line = match event {
        SessionEvent::Lobby(LobbyEvent::ModeSelected(mode)) => {
            format!("Host picked {} mode", mode.as_str())
        }
        SessionEvent::Lobby(LobbyEvent::VersionChecked(version)) => {
            format!("Guest runs version {}", version)
        }
        SessionEvent::Lobby(LobbyEvent::GuestReady(true)) => "Guest is ready".into(),
        SessionEvent::Lobby(LobbyEvent::GuestReady(false)) => "Guest cancelled ready".into(),
        SessionEvent::Lobby(LobbyEvent::GuestStarted) => "Guest started".into(),
        SessionEvent::Lobby(LobbyEvent::Started(mode)) => {
            format!("Game started ({})", mode.as_str())
        }
        SessionEvent::Lobby(LobbyEvent::Disconnected) => return None,
        SessionEvent::Opponent(GameEvent::LinesCleared { rows, .. }) => {
            format!("Opponent cleared {} lines", rows.len())
        }
        SessionEvent::Opponent(GameEvent::ScoreUpdated { score, level, .. }) => {
            format!("Opponent score {} (level {})", score, level)
        }
        SessionEvent::Opponent(GameEvent::GameOver { final_score }) => {
            format!("Opponent finished with {}", final_score)
        }
        SessionEvent::Opponent(_) => return None,
        SessionEvent::Garbage { lines } => format!("Received {} garbage lines", lines),
        SessionEvent::StateChanged(state) => format!("Connection {}", state.as_str()),
        SessionEvent::Finished => "Game over".into(),
        SessionEvent::Disconnected(reason) => format!("Disconnected: {}", reason.as_str()),
    };
    Some(line)
}
