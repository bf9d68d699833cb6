use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::config::NetConfig;
use super::connection::{ConnectionManager, ConnectionState, Role};
use super::error::NetError;
use super::latency::LatencyMonitor;
use super::monitor::ConnectionMonitor;
use super::on_worker_thread;
use super::protocol::{Message, Payload, PlayerId};
use super::receiver::{ListenerId, ListenerRegistry, MessageListener, MessageReceiver};
use super::sender::{MessageSender, MessageSink};
use super::stats::{NetworkStats, SharedStats};

pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;
pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Single entry point for a two-player session: setup, sending, listener
/// registration and teardown.
///
/// Cloning yields another handle on the same session.
#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: NetConfig,
    connection: ConnectionManager,
    session: Mutex<Option<Session>>,
    teardown_lock: Mutex<()>,
    message_listeners: ListenerRegistry,
    control_listeners: ListenerRegistry,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
    state_handler: Mutex<Option<StateHandler>>,
    lost_notified: AtomicBool,
    latency: Arc<LatencyMonitor>,
    stats: Arc<SharedStats>,
}

struct Session {
    monitor: Arc<ConnectionMonitor>,
    sender: Arc<MessageSender>,
    receiver: MessageReceiver,
}

impl NetworkManager {
    pub fn new(config: NetConfig) -> Self {
        let latency = Arc::new(LatencyMonitor::new(
            config.latency_window,
            config.lag_threshold_ms,
        ));
        Self {
            inner: Arc::new(Inner {
                connection: ConnectionManager::new(config.clone()),
                config,
                session: Mutex::new(None),
                teardown_lock: Mutex::new(()),
                message_listeners: ListenerRegistry::default(),
                control_listeners: ListenerRegistry::default(),
                disconnect_handler: Mutex::new(None),
                state_handler: Mutex::new(None),
                lost_notified: AtomicBool::new(false),
                latency,
                stats: Arc::new(SharedStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.inner.config
    }

    /// Hosts on `port`, blocking until the guest arrives.
    ///
    /// Returns `Ok(false)` if `disconnect` was called while waiting.
    pub fn start_as_server(&self, port: u16) -> Result<bool, NetError> {
        self.ensure_idle()?;
        if !self.inner.connection.start_server(port)? {
            return Ok(false);
        }
        self.inner.start_session()
    }

    /// Joins a host. Returns `Ok(false)` if `disconnect` was called while dialing.
    pub fn connect_as_client(&self, host: &str, port: u16) -> Result<bool, NetError> {
        self.ensure_idle()?;
        if !self.inner.connection.connect_to_server(host, port)? {
            return Ok(false);
        }
        self.inner.start_session()
    }

    fn ensure_idle(&self) -> Result<(), NetError> {
        if self.inner.session.lock().is_some() {
            return Err(NetError::AlreadyConnected);
        }
        Ok(())
    }

    /// Ends the session. Does not invoke the disconnection handler.
    ///
    /// Called from a listener while another thread is already tearing the
    /// session down, this returns at once and leaves the close to that thread.
    pub fn disconnect(&self) {
        self.inner.lost_notified.store(true, Ordering::SeqCst);
        self.inner.teardown();
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.inner.message_listeners.add(listener)
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.inner.message_listeners.remove(id)
    }

    /// Registers a listener for `GAME_CONTROL` frames only.
    pub fn add_control_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.inner.control_listeners.add(listener)
    }

    pub fn remove_control_listener(&self, id: ListenerId) -> bool {
        self.inner.control_listeners.remove(id)
    }

    /// Called once when the session ends on its own (timeout or I/O failure).
    pub fn set_disconnection_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.disconnect_handler.lock() = Some(Arc::new(handler));
    }

    pub fn set_state_listener<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        *self.inner.state_handler.lock() = Some(Arc::new(handler));
    }

    pub fn is_connected(&self) -> bool {
        self.inner.session.lock().is_some() && self.inner.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.inner.connection.role()
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.role().map(|role| role.player_id())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.connection.local_addr()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.connection.remote_addr()
    }

    pub fn latency(&self) -> &LatencyMonitor {
        &self.inner.latency
    }

    pub fn stats(&self) -> NetworkStats {
        self.inner.stats.snapshot()
    }

    pub fn weak_sink(&self) -> Arc<dyn MessageSink> {
        Arc::new(WeakSink(Arc::downgrade(&self.inner)))
    }
}

impl MessageSink for NetworkManager {
    fn send_message(&self, message: Message) -> bool {
        self.inner.send_message(message)
    }
}

/// Sending handle that does not keep the session alive. Listeners registered
/// on the manager use this to avoid a reference cycle.
pub struct WeakSink(Weak<Inner>);

impl MessageSink for WeakSink {
    fn send_message(&self, message: Message) -> bool {
        match self.0.upgrade() {
            Some(inner) => inner.send_message(message),
            None => false,
        }
    }
}

impl Inner {
    fn send_message(&self, message: Message) -> bool {
        let sender = self.session.lock().as_ref().map(|s| Arc::clone(&s.sender));
        match sender {
            Some(sender) => sender.send_message(message),
            None => false,
        }
    }

    fn start_session(self: &Arc<Self>) -> Result<bool, NetError> {
        let started = self.try_start_session();
        if let Err(e) = &started {
            log::warn!("Failed to start session: {}", e);
            self.lost_notified.store(true, Ordering::SeqCst);
            self.teardown();
        }
        started.map(|_| true)
    }

    fn try_start_session(self: &Arc<Self>) -> Result<(), NetError> {
        // Held until every worker runs, so a worker that fails immediately
        // tears down a complete session.
        let mut slot = self.session.lock();
        if slot.is_some() {
            return Err(NetError::AlreadyConnected);
        }

        let (writer, reader) = self.connection.split_streams()?;
        self.lost_notified.store(false, Ordering::SeqCst);
        self.latency.reset();

        let sender = Arc::new(MessageSender::new(
            self.config.queue_capacity,
            self.config.max_frame_size,
            Arc::clone(&self.stats),
        ));
        let monitor = Arc::new(ConnectionMonitor::new(
            &self.config,
            sender.clone(),
            Arc::clone(&self.latency),
            self.connection.shared_state(),
        ));
        let receiver = MessageReceiver::new(Arc::clone(&self.stats));

        let weak = Arc::downgrade(self);
        monitor.set_state_listener(move |_, new| {
            if let Some(inner) = weak.upgrade() {
                inner.on_state_changed(new);
            }
        });
        receiver.add_listener(Arc::new(SessionListener {
            inner: Arc::downgrade(self),
            monitor: Arc::clone(&monitor),
            sender: Arc::clone(&sender),
        }));

        *slot = Some(Session {
            monitor: Arc::clone(&monitor),
            sender: Arc::clone(&sender),
            receiver,
        });
        let session = slot.as_ref().ok_or(NetError::NotConnected)?;

        let weak = Arc::downgrade(self);
        sender.start_stream(writer, move || {
            if let Some(inner) = weak.upgrade() {
                inner.handle_connection_lost();
            }
        })?;
        session
            .receiver
            .start(reader, self.config.max_frame_size)?;
        monitor.start()?;

        log::info!("Session started");
        Ok(())
    }

    /// Stops monitor, sender, receiver, then the socket. Idempotent.
    ///
    /// Serialized so a caller returning from `disconnect` knows no older
    /// teardown can still close a connection made afterwards. A worker thread
    /// never waits for the lock: its holder may be joining that worker, so
    /// the worker leaves the rest of the teardown to the holder.
    fn teardown(&self) {
        let _serial = if on_worker_thread() {
            match self.teardown_lock.try_lock() {
                Some(guard) => guard,
                None => {
                    log::debug!("Teardown already running elsewhere");
                    return;
                }
            }
        } else {
            self.teardown_lock.lock()
        };
        let session = self.session.lock().take();
        if let Some(session) = session {
            session.monitor.shutdown();
            session.sender.shutdown();
            session.receiver.shutdown();
            log::info!("Session stopped");
        }
        self.connection.disconnect();
    }

    fn on_state_changed(self: &Arc<Self>, state: ConnectionState) {
        let handler = self.state_handler.lock().clone();
        if let Some(handler) = handler {
            handler(state);
        }
        if state == ConnectionState::Timeout {
            self.handle_connection_lost();
        }
    }

    fn handle_connection_lost(self: &Arc<Self>) {
        if self.lost_notified.swap(true, Ordering::SeqCst) {
            return;
        }
        log::warn!("Connection to peer lost");

        self.teardown();
        self.message_listeners.notify_connection_lost();
        self.control_listeners.notify_connection_lost();

        let handler = self.disconnect_handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// First listener on every session: answers probes, feeds the monitor and
/// routes control frames apart from gameplay frames.
struct SessionListener {
    inner: Weak<Inner>,
    monitor: Arc<ConnectionMonitor>,
    sender: Arc<MessageSender>,
}

impl MessageListener for SessionListener {
    fn on_message(&self, message: &Message) {
        self.monitor.on_activity();

        match message.payload() {
            Payload::Heartbeat { echo: false } => {
                self.sender.send_message(Message::heartbeat_echo());
            }
            Payload::Heartbeat { echo: true } => self.monitor.on_heartbeat_echo(),
            Payload::GameControl(_) => {
                if let Some(inner) = self.inner.upgrade() {
                    inner.control_listeners.dispatch(message);
                }
            }
            Payload::GameEvent { .. } | Payload::Attack { .. } => {
                if let Some(inner) = self.inner.upgrade() {
                    inner.message_listeners.dispatch(message);
                }
            }
        }
    }

    fn on_connection_lost(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_connection_lost();
        }
    }
}
