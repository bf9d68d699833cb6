pub mod event;
pub mod lobby;
pub mod net;
pub mod sync;

pub use event::{Attack, EventBus, EventFilter, EventKind, GameEvent, PlacedBlock, Priority};
pub use lobby::{GuestLobby, HostLobby, LobbyError, LobbyEvent, WaitingRoom};
pub use net::{
    ConnectionState, ControlType, DEFAULT_PORT, GameMode, Message, MessageListener, MessageSink,
    NetConfig, NetError, NetworkManager, NetworkStats, PlayerId, Role,
};
pub use sync::{EventSynchronizer, LocalBoard, SyncStats};
