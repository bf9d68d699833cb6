use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use parking_lot::Mutex;

use super::config::NetConfig;
use super::connection::{ConnectionState, SharedState};
use super::{join_worker, mark_worker};
use super::latency::LatencyMonitor;
use super::protocol::Message;
use super::sender::MessageSink;

pub type StateListener = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

/// Sends periodic heartbeats and derives `Connected`/`Lagging`/`Timeout`
/// from echo round trips and inbound silence.
///
/// RTT is measured against the most recent probe. Echoes carry no sequence
/// number, so an echo arriving after the next probe went out is attributed
/// to that newer probe.
pub struct ConnectionMonitor {
    shared: Arc<MonitorShared>,
    shutdown: Mutex<Option<cb::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct MonitorShared {
    sink: Arc<dyn MessageSink>,
    latency: Arc<LatencyMonitor>,
    state: SharedState,
    interval: Duration,
    timeout: Duration,
    last_send: Mutex<Option<Instant>>,
    last_response: Mutex<Instant>,
    listener: Mutex<Option<StateListener>>,
    running: AtomicBool,
}

impl ConnectionMonitor {
    pub fn new(
        config: &NetConfig,
        sink: Arc<dyn MessageSink>,
        latency: Arc<LatencyMonitor>,
        state: SharedState,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                sink,
                latency,
                state,
                interval: config.heartbeat_interval,
                timeout: config.heartbeat_timeout,
                last_send: Mutex::new(None),
                last_response: Mutex::new(Instant::now()),
                listener: Mutex::new(None),
                running: AtomicBool::new(false),
            }),
            shutdown: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn set_state_listener<F>(&self, listener: F)
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        *self.shared.listener.lock() = Some(Arc::new(listener));
    }

    pub fn start(&self) -> io::Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "monitor already started",
            ));
        }
        *self.shared.last_response.lock() = Instant::now();

        let (shutdown_tx, shutdown_rx) = cb::bounded::<()>(0);
        *self.shutdown.lock() = Some(shutdown_tx);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("versus-monitor".into())
            .spawn(move || run(shared, shutdown_rx));
        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Any inbound frame proves the peer is alive.
    pub fn on_activity(&self) {
        *self.shared.last_response.lock() = Instant::now();
    }

    /// Handles the peer's answer to our last probe.
    pub fn on_heartbeat_echo(&self) {
        self.shared.record_echo(Instant::now());
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn latency(&self) -> &LatencyMonitor {
        &self.shared.latency
    }

    pub fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shutdown.lock().take();
        join_worker(self.handle.lock().take(), "monitor");
    }

    #[cfg(test)]
    fn tick_at(&self, now: Instant) {
        self.shared.tick(now);
    }

    #[cfg(test)]
    fn echo_at(&self, now: Instant) {
        self.shared.record_echo(now);
    }

    #[cfg(test)]
    fn evaluate_at(&self, now: Instant) {
        self.shared.evaluate(now);
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl MonitorShared {
    fn tick(&self, now: Instant) {
        if self.sink.send_message(Message::heartbeat()) {
            *self.last_send.lock() = Some(now);
            log::trace!("Heartbeat sent");
        } else {
            log::debug!("Heartbeat not queued");
        }
        self.evaluate(now);
    }

    fn record_echo(&self, now: Instant) {
        *self.last_response.lock() = now;
        if let Some(sent) = *self.last_send.lock() {
            let rtt = now.saturating_duration_since(sent).as_millis() as u64;
            self.latency.record_latency(rtt);
            log::trace!("Heartbeat RTT {}ms", rtt);
        }
        self.evaluate(now);
    }

    fn evaluate(&self, now: Instant) {
        let current = self.state.get();
        if !current.is_live() {
            return;
        }

        let silence = now.saturating_duration_since(*self.last_response.lock());
        let target = if silence > self.timeout {
            ConnectionState::Timeout
        } else if self.latency.is_lagging() {
            ConnectionState::Lagging
        } else {
            ConnectionState::Connected
        };
        if target == current {
            return;
        }

        // The CAS makes concurrent evaluations agree on a single winner.
        let Some(previous) = self.state.transition(target) else {
            return;
        };
        match target {
            ConnectionState::Timeout => {
                self.running.store(false, Ordering::SeqCst);
                log::warn!("No response from peer for {:?}", silence);
            }
            ConnectionState::Lagging => log::info!(
                "Connection lagging: average RTT {}ms",
                self.latency.average_latency()
            ),
            _ => log::info!("Connection recovered"),
        }

        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(previous, target);
        }
    }
}

fn run(shared: Arc<MonitorShared>, shutdown: cb::Receiver<()>) {
    mark_worker();
    while shared.running.load(Ordering::SeqCst) {
        match shutdown.recv_timeout(shared.interval) {
            Err(cb::RecvTimeoutError::Timeout) => {}
            _ => break,
        }
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        shared.tick(Instant::now());
    }
    log::debug!("Monitor stopped");
}
