use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;

use super::{GuestLobby, HostLobby, LobbyError};
use crate::net::{
    ControlType, GameMode, ListenerId, Message, MessageListener, MessageSink, NetworkManager,
};

/// What the waiting room reports to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyEvent {
    ModeSelected(GameMode),
    VersionChecked(String),
    GuestReady(bool),
    GuestStarted,
    Started(GameMode),
    Disconnected,
}

enum Side {
    Host(HostLobby),
    Guest(GuestLobby),
}

/// Runs one side of the handshake over a live `NetworkManager`.
///
/// Create it before connecting so no early control frame is missed.
pub struct WaitingRoom {
    network: NetworkManager,
    side: Mutex<Side>,
    events_tx: cb::Sender<LobbyEvent>,
    events: cb::Receiver<LobbyEvent>,
    listener: Mutex<Option<ListenerId>>,
}

/// Registered with the network instead of the room itself so the
/// registry does not keep the room alive.
struct RoomListener(Weak<WaitingRoom>);

impl MessageListener for RoomListener {
    fn on_message(&self, message: &Message) {
        if let Some(room) = self.0.upgrade() {
            room.on_control(message);
        }
    }

    fn on_connection_lost(&self) {
        if let Some(room) = self.0.upgrade() {
            room.emit(LobbyEvent::Disconnected);
        }
    }
}

impl WaitingRoom {
    pub fn host(network: NetworkManager, mode: GameMode) -> Arc<Self> {
        let debounce = network.config().ready_debounce;
        Self::bind(network, Side::Host(HostLobby::new(mode, debounce)))
    }

    pub fn guest(network: NetworkManager) -> Arc<Self> {
        Self::bind(network, Side::Guest(GuestLobby::new()))
    }

    fn bind(network: NetworkManager, side: Side) -> Arc<Self> {
        let (events_tx, events) = cb::unbounded();
        let room = Arc::new(Self {
            network,
            side: Mutex::new(side),
            events_tx,
            events,
            listener: Mutex::new(None),
        });
        let id = room
            .network
            .add_control_listener(Arc::new(RoomListener(Arc::downgrade(&room))));
        *room.listener.lock() = Some(id);
        room
    }

    pub fn events(&self) -> &cb::Receiver<LobbyEvent> {
        &self.events
    }

    pub fn is_host(&self) -> bool {
        matches!(*self.side.lock(), Side::Host(_))
    }

    /// Host only: announces the mode once the guest is connected.
    pub fn open(&self) -> Result<(), LobbyError> {
        let message = match &*self.side.lock() {
            Side::Host(host) => host.on_connected(),
            Side::Guest(_) => return Err(LobbyError::WrongRole("host")),
        };
        self.send(message)
    }

    pub fn change_mode(&self, mode: GameMode) -> Result<(), LobbyError> {
        let message = match &mut *self.side.lock() {
            Side::Host(host) if host.is_started() => return Err(LobbyError::AlreadyStarted),
            Side::Host(host) => host.change_mode(mode),
            Side::Guest(_) => return Err(LobbyError::WrongRole("host")),
        };
        self.send(message)
    }

    /// Guest only. Returns the new ready flag.
    pub fn toggle_ready(&self) -> Result<bool, LobbyError> {
        let (message, ready) = match &mut *self.side.lock() {
            Side::Guest(guest) => {
                let message = guest.toggle_ready()?;
                (message, guest.is_ready())
            }
            Side::Host(_) => return Err(LobbyError::WrongRole("guest")),
        };
        self.send(message)?;
        Ok(ready)
    }

    /// The guest's ready flag, as seen from either side.
    pub fn is_ready(&self) -> bool {
        match &*self.side.lock() {
            Side::Host(host) => host.is_guest_ready(),
            Side::Guest(guest) => guest.is_ready(),
        }
    }

    pub fn can_start(&self) -> bool {
        match &*self.side.lock() {
            Side::Host(host) => host.can_start(Instant::now()),
            Side::Guest(_) => false,
        }
    }

    pub fn remaining_debounce(&self) -> Option<Duration> {
        match &*self.side.lock() {
            Side::Host(host) => host.remaining_debounce(Instant::now()),
            Side::Guest(_) => None,
        }
    }

    /// Host only: sends `START_REQUEST` and starts locally right away.
    pub fn start(&self) -> Result<GameMode, LobbyError> {
        let (message, mode) = match &mut *self.side.lock() {
            Side::Host(host) => (host.start(Instant::now())?, host.mode()),
            Side::Guest(_) => return Err(LobbyError::WrongRole("host")),
        };
        self.send(message)?;
        log::info!("Starting {} game", mode.as_str());
        self.emit(LobbyEvent::Started(mode));
        Ok(mode)
    }

    /// Blocks until the game starts on this side, the peer drops, or `timeout`.
    pub fn wait_for_start(&self, timeout: Duration) -> Option<GameMode> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.events.recv_deadline(deadline) {
                Ok(LobbyEvent::Started(mode)) => return Some(mode),
                Ok(LobbyEvent::Disconnected) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Stops listening for control frames.
    pub fn close(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.network.remove_control_listener(id);
        }
    }

    fn send(&self, message: Message) -> Result<(), LobbyError> {
        if self.network.send_message(message) {
            Ok(())
        } else {
            Err(LobbyError::SendFailed)
        }
    }

    fn emit(&self, event: LobbyEvent) {
        let _ = self.events_tx.send(event);
    }

    fn on_control(&self, message: &Message) {
        let Some(control) = message.as_control() else {
            return;
        };
        log::debug!("Lobby received {:?}", control.control);

        let mut events = Vec::new();
        let reply = match &mut *self.side.lock() {
            Side::Host(host) => {
                host.handle(control, Instant::now());
                match control.control {
                    ControlType::VersionCheck => events.push(LobbyEvent::VersionChecked(
                        host.peer_version().unwrap_or_default().to_string(),
                    )),
                    ControlType::Ready | ControlType::ReadyCancel => {
                        events.push(LobbyEvent::GuestReady(host.is_guest_ready()))
                    }
                    ControlType::StartGame => events.push(LobbyEvent::GuestStarted),
                    _ => {}
                }
                None
            }
            Side::Guest(guest) => {
                let was_started = guest.is_started();
                let reply = guest.handle(control);
                match control.control {
                    ControlType::ModeSelect | ControlType::ModeChanged => {
                        if let Some(mode) = guest.mode() {
                            events.push(LobbyEvent::ModeSelected(mode));
                        }
                    }
                    ControlType::StartRequest if !was_started => {
                        if let Some(mode) = guest.mode() {
                            log::info!("Starting {} game", mode.as_str());
                            events.push(LobbyEvent::Started(mode));
                        }
                    }
                    _ => {}
                }
                reply
            }
        };

        if let Some(reply) = reply
            && self.send(reply).is_err()
        {
            log::warn!("Dropped lobby reply to {:?}", control.control);
        }
        for event in events {
            self.emit(event);
        }
    }
}

impl Drop for WaitingRoom {
    fn drop(&mut self) {
        self.close();
    }
}
