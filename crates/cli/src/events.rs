use versus::{ConnectionState, GameEvent, LobbyEvent};

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Lobby(LobbyEvent),
    Opponent(GameEvent),
    Garbage { lines: u32 },
    StateChanged(ConnectionState),
    Finished,
    Disconnected(DisconnectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Lost,
    Timeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Lost => "connection lost",
            DisconnectReason::Timeout => "timed out",
        }
    }
}
