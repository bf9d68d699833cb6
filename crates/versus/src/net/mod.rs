mod config;
mod connection;
mod error;
mod latency;
mod manager;
mod monitor;
mod protocol;
mod receiver;
mod sender;
mod stats;

use std::cell::Cell;
use std::thread::{self, JoinHandle};

pub(crate) use protocol::aligned_copy;
pub use config::NetConfig;
pub use connection::{ConnectionManager, ConnectionState, Role, SharedState, select_local_address};
pub use error::NetError;
pub use latency::{DEFAULT_LAG_THRESHOLD_MS, DEFAULT_LATENCY_WINDOW, LatencyMonitor};
pub use manager::{DisconnectHandler, NetworkManager, StateHandler, WeakSink};
pub use monitor::{ConnectionMonitor, StateListener};
pub use protocol::{
    ControlMessage, ControlType, DEFAULT_PORT, FRAME_HEADER_SIZE, GUEST_PLAYER_ID, GameMode,
    HOST_PLAYER_ID, MAX_FRAME_SIZE, Message, MessageError, MessageKind, PROTOCOL_VERSION,
    Payload, PlayerId, now_ms, read_frame, write_frame,
};
pub use receiver::{ListenerId, ListenerRegistry, MessageListener, MessageReceiver};
pub use sender::{MessageSender, MessageSink};
pub use stats::{NetworkStats, SharedStats};

/// Joins a worker thread unless called from that worker itself, which
/// happens when a worker's own failure triggers teardown.
fn join_worker(handle: Option<JoinHandle<()>>, name: &str) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        log::warn!("{} thread panicked", name);
    }
}

thread_local! {
    static SESSION_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Tags the current thread as a sender, receiver or monitor worker.
fn mark_worker() {
    SESSION_WORKER.with(|worker| worker.set(true));
}

/// True on threads that a teardown may be joining.
fn on_worker_thread() -> bool {
    SESSION_WORKER.with(Cell::get)
}
