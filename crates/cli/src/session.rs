use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel as cb;

use versus::net::Role;
use versus::{
    ConnectionState, EventBus, EventSynchronizer, GameMode, LobbyEvent, NetworkManager,
    NetworkStats, Priority, SyncStats, WaitingRoom,
};

use crate::config::SessionConfig;
use crate::events::{DisconnectReason, SessionEvent};
use crate::simulation::{GarbageBoard, ScriptedGame};

/// Snapshot of everything the dashboard shows.
#[derive(Debug, Clone)]
pub struct SessionStats {
    pub role: Role,
    pub mode: Option<GameMode>,
    pub state: ConnectionState,
    pub remote_addr: Option<SocketAddr>,
    pub rtt_avg_ms: u64,
    pub rtt_last_ms: u64,
    pub network: NetworkStats,
    pub sync: SyncStats,
    pub ready: bool,
    pub can_start: bool,
    pub started: bool,
    pub score: u64,
    pub opponent_score: u64,
    pub garbage: u32,
    pub uptime_secs: u64,
}

pub struct Session {
    role: Role,
    config: SessionConfig,
    network: NetworkManager,
    room: Arc<WaitingRoom>,
    local: EventBus,
    sync: Arc<EventSynchronizer>,
    board: Arc<GarbageBoard>,
    events_tx: cb::Sender<SessionEvent>,
    events: cb::Receiver<SessionEvent>,
    game: ScriptedGame,
    mode: Option<GameMode>,
    state: ConnectionState,
    ready: bool,
    started: bool,
    opponent_score: u64,
    last_step: Instant,
    start_time: Instant,
}

impl Session {
    /// Hosts and blocks until a guest connects.
    pub fn host(config: SessionConfig) -> Result<Self> {
        let network = NetworkManager::new(config.net.clone());
        let room = WaitingRoom::host(network.clone(), config.mode);
        let mut session = Self::wire(Role::Host, config, network, room);
        session.mode = Some(session.config.mode);

        if !session.network.start_as_server(session.config.net.port)? {
            bail!("hosting cancelled");
        }
        session.state = session.network.state();
        session.room.open()?;
        Ok(session)
    }

    pub fn join(config: SessionConfig, host: &str) -> Result<Self> {
        let network = NetworkManager::new(config.net.clone());
        let room = WaitingRoom::guest(network.clone());
        let mut session = Self::wire(Role::Guest, config, network, room);

        if !session.network.connect_as_client(host, session.config.net.port)? {
            bail!("join cancelled");
        }
        session.state = session.network.state();
        Ok(session)
    }

    fn wire(
        role: Role,
        config: SessionConfig,
        network: NetworkManager,
        room: Arc<WaitingRoom>,
    ) -> Self {
        let (events_tx, events) = cb::unbounded();
        let board = Arc::new(GarbageBoard::default());
        let remote = Arc::new(EventBus::new());
        let sync = EventSynchronizer::new(
            role.player_id(),
            network.weak_sink(),
            Arc::clone(&remote),
            Some(board.clone()),
            config.net.stats_interval,
        );
        let local = EventBus::new();
        sync.attach(&local);
        network.add_message_listener(sync.clone());

        let tx = events_tx.clone();
        remote.subscribe_all(Priority::Normal, move |event| {
            let _ = match event {
                versus::GameEvent::AttackReceived(attack) => tx.send(SessionEvent::Garbage {
                    lines: attack.lines,
                }),
                other => tx.send(SessionEvent::Opponent(other.clone())),
            };
        });
        let tx = events_tx.clone();
        network.set_state_listener(move |state| {
            let _ = tx.send(SessionEvent::StateChanged(state));
        });
        let tx = events_tx.clone();
        network.set_disconnection_handler(move || {
            let _ = tx.send(SessionEvent::Disconnected(DisconnectReason::Lost));
        });

        Self {
            role,
            game: ScriptedGame::new(config.pieces),
            config,
            network,
            room,
            local,
            sync,
            board,
            events_tx,
            events,
            mode: None,
            state: ConnectionState::Disconnected,
            ready: false,
            started: false,
            opponent_score: 0,
            last_step: Instant::now(),
            start_time: Instant::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.network.remote_addr()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn toggle_ready(&mut self) -> Result<bool> {
        self.ready = self.room.toggle_ready()?;
        Ok(self.ready)
    }

    pub fn start(&mut self) -> Result<()> {
        self.room.start()?;
        Ok(())
    }

    pub fn switch_mode(&mut self) -> Result<GameMode> {
        let next = match self.mode {
            Some(GameMode::Normal) => GameMode::Item,
            _ => GameMode::Normal,
        };
        self.room.change_mode(next)?;
        self.mode = Some(next);
        Ok(next)
    }

    /// Advances the scripted game and collects everything that happened since
    /// the last call.
    pub fn tick(&mut self) -> Vec<SessionEvent> {
        self.auto_actions();

        let due = self.last_step.elapsed() >= self.config.step_interval;
        if self.started && !self.game.is_over() && due {
            self.last_step = Instant::now();
            for event in self.game.step() {
                self.local.publish(&event);
            }
            if self.game.is_over() {
                let _ = self.events_tx.send(SessionEvent::Finished);
            }
        }

        self.sync.report_if_due();

        let lobby: Vec<SessionEvent> = self
            .room
            .events()
            .try_iter()
            .map(SessionEvent::Lobby)
            .collect();
        let mut drained = Vec::with_capacity(lobby.len());
        let events = self.events.clone();
        for event in lobby.into_iter().chain(events.try_iter()) {
            drained.push(self.observe(event));
        }
        drained
    }

    fn auto_actions(&mut self) {
        if self.started {
            return;
        }
        match self.role {
            Role::Host if self.config.auto_start && self.room.can_start() => {
                if let Err(e) = self.start() {
                    log::warn!("Auto start failed: {}", e);
                }
            }
            _ => {}
        }
    }

    fn observe(&mut self, event: SessionEvent) -> SessionEvent {
        match &event {
            SessionEvent::Lobby(LobbyEvent::ModeSelected(mode)) => {
                self.mode = Some(*mode);
                self.ready = self.room.is_ready();
                if self.config.auto_ready
                    && !self.ready
                    && let Err(e) = self.toggle_ready()
                {
                    log::warn!("Auto ready failed: {}", e);
                }
            }
            SessionEvent::Lobby(LobbyEvent::GuestReady(ready)) => self.ready = *ready,
            SessionEvent::Lobby(LobbyEvent::Started(mode)) => {
                self.mode = Some(*mode);
                self.started = true;
                self.last_step = Instant::now();
            }
            SessionEvent::Opponent(versus::GameEvent::ScoreUpdated { score, .. })
            | SessionEvent::Opponent(versus::GameEvent::GameOver { final_score: score }) => {
                self.opponent_score = *score;
            }
            SessionEvent::StateChanged(state) => self.state = *state,
            SessionEvent::Disconnected(_) => {
                let reason = if self.state == ConnectionState::Timeout {
                    DisconnectReason::Timeout
                } else {
                    DisconnectReason::Lost
                };
                self.state = ConnectionState::Disconnected;
                return SessionEvent::Disconnected(reason);
            }
            _ => {}
        }
        event
    }

    pub fn stats(&self) -> SessionStats {
        let latency = self.network.latency();
        SessionStats {
            role: self.role,
            mode: self.mode,
            state: self.network.state(),
            remote_addr: self.network.remote_addr(),
            rtt_avg_ms: latency.average_latency(),
            rtt_last_ms: latency.last_latency(),
            network: self.network.stats(),
            sync: self.sync.stats(),
            ready: self.ready,
            can_start: self.room.can_start(),
            started: self.started,
            score: self.game.score(),
            opponent_score: self.opponent_score,
            garbage: self.board.pending(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Gives queued frames a moment to flush, then closes the connection.
    pub fn shutdown(&self, grace: Duration) {
        std::thread::sleep(grace);
        self.sync.detach(&self.local);
        self.room.close();
        self.network.disconnect();
    }
}
