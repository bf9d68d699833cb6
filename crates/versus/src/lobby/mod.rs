mod room;

use std::time::{Duration, Instant};

use crate::net::{
    ControlMessage, ControlType, GUEST_PLAYER_ID, GameMode, HOST_PLAYER_ID, Message,
    PROTOCOL_VERSION,
};

pub use room::{LobbyEvent, WaitingRoom};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("guest is not ready to start")]
    NotReady,
    #[error("ready is unavailable until the host selects a mode")]
    ReadyUnavailable,
    #[error("game already started")]
    AlreadyStarted,
    #[error("only the {0} can do that")]
    WrongRole(&'static str),
    #[error("control message could not be queued")]
    SendFailed,
}

/// Host half of the waiting room.
///
/// Start unlocks once the guest has checked its version and stayed ready for
/// the whole debounce window.
#[derive(Debug, Clone)]
pub struct HostLobby {
    mode: GameMode,
    debounce: Duration,
    version_checked: bool,
    peer_version: Option<String>,
    guest_ready: bool,
    ready_since: Option<Instant>,
    guest_started: bool,
    started: bool,
}

impl HostLobby {
    pub fn new(mode: GameMode, debounce: Duration) -> Self {
        Self {
            mode,
            debounce,
            version_checked: false,
            peer_version: None,
            guest_ready: false,
            ready_since: None,
            guest_started: false,
            started: false,
        }
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn is_version_checked(&self) -> bool {
        self.version_checked
    }

    pub fn peer_version(&self) -> Option<&str> {
        self.peer_version.as_deref()
    }

    pub fn is_guest_ready(&self) -> bool {
        self.guest_ready
    }

    pub fn guest_started(&self) -> bool {
        self.guest_started
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// First message once the guest is connected.
    pub fn on_connected(&self) -> Message {
        Message::control_with(HOST_PLAYER_ID, ControlType::ModeSelect, Some(self.mode), None)
    }

    /// Switches mode. The guest must check in and ready up again.
    pub fn change_mode(&mut self, mode: GameMode) -> Message {
        self.mode = mode;
        self.version_checked = false;
        self.guest_ready = false;
        self.ready_since = None;
        Message::control_with(HOST_PLAYER_ID, ControlType::ModeChanged, Some(mode), None)
    }

    pub fn handle(&mut self, control: &ControlMessage, now: Instant) {
        match control.control {
            ControlType::VersionCheck => {
                let version = control.info.clone().unwrap_or_default();
                if version != PROTOCOL_VERSION {
                    log::warn!(
                        "Guest runs version {:?}, expected {}",
                        version,
                        PROTOCOL_VERSION
                    );
                }
                self.version_checked = true;
                self.peer_version = Some(version);
            }
            ControlType::Ready => {
                self.guest_ready = true;
                self.ready_since = Some(now);
            }
            ControlType::ReadyCancel => {
                self.guest_ready = false;
                self.ready_since = None;
            }
            ControlType::StartGame => self.guest_started = true,
            other => log::debug!("Host ignoring {:?}", other),
        }
    }

    pub fn can_start(&self, now: Instant) -> bool {
        !self.started
            && self.version_checked
            && self.guest_ready
            && self
                .ready_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.debounce)
    }

    /// Time left until start unlocks, if the guest is ready.
    pub fn remaining_debounce(&self, now: Instant) -> Option<Duration> {
        self.ready_since
            .map(|since| self.debounce.saturating_sub(now.saturating_duration_since(since)))
    }

    /// Starts the game. The host does not wait for the guest's acknowledgement.
    pub fn start(&mut self, now: Instant) -> Result<Message, LobbyError> {
        if self.started {
            return Err(LobbyError::AlreadyStarted);
        }
        if !self.can_start(now) {
            return Err(LobbyError::NotReady);
        }
        self.started = true;
        Ok(Message::control_with(
            HOST_PLAYER_ID,
            ControlType::StartRequest,
            Some(self.mode),
            None,
        ))
    }
}

/// Guest half of the waiting room.
#[derive(Debug, Clone, Default)]
pub struct GuestLobby {
    mode: Option<GameMode>,
    version_sent: bool,
    ready: bool,
    started: bool,
}

impl GuestLobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Option<GameMode> {
        self.mode
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Ready toggles are enabled after the version check went out.
    pub fn can_toggle_ready(&self) -> bool {
        self.version_sent && !self.started
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Returns the reply to send, if any.
    pub fn handle(&mut self, control: &ControlMessage) -> Option<Message> {
        match control.control {
            ControlType::ModeSelect => {
                self.mode = control.mode.or(self.mode);
                Some(self.version_check())
            }
            ControlType::ModeChanged => {
                self.mode = control.mode.or(self.mode);
                self.ready = false;
                self.version_sent = false;
                Some(self.version_check())
            }
            ControlType::StartRequest => {
                if self.started {
                    return None;
                }
                self.mode = control.mode.or(self.mode);
                self.started = true;
                self.ready = false;
                Some(Message::control_with(
                    GUEST_PLAYER_ID,
                    ControlType::StartGame,
                    self.mode,
                    None,
                ))
            }
            other => {
                log::debug!("Guest ignoring {:?}", other);
                None
            }
        }
    }

    fn version_check(&mut self) -> Message {
        self.version_sent = true;
        Message::control_with(
            GUEST_PLAYER_ID,
            ControlType::VersionCheck,
            None,
            Some(PROTOCOL_VERSION.to_string()),
        )
    }

    pub fn toggle_ready(&mut self) -> Result<Message, LobbyError> {
        if self.started {
            return Err(LobbyError::AlreadyStarted);
        }
        if !self.version_sent {
            return Err(LobbyError::ReadyUnavailable);
        }
        self.ready = !self.ready;
        let control = if self.ready {
            ControlType::Ready
        } else {
            ControlType::ReadyCancel
        };
        Ok(Message::control(GUEST_PLAYER_ID, control))
    }
}
