use std::io;
use std::net::{
    IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs, UdpSocket,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::config::NetConfig;
use super::error::NetError;
use super::protocol::{GUEST_PLAYER_ID, HOST_PLAYER_ID, PlayerId};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn player_id(&self) -> PlayerId {
        match self {
            Role::Host => HOST_PLAYER_ID,
            Role::Guest => GUEST_PLAYER_ID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Lagging = 3,
    Timeout = 4,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Lagging,
            4 => ConnectionState::Timeout,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl ConnectionState {
    /// Edges of the lifecycle graph. Any state may fall back to
    /// `Disconnected`; a failed setup goes `Connecting -> Disconnected`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (a, b) if a == b => false,
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) => true,
            (Connected, Lagging) | (Lagging, Connected) => true,
            (Connected, Timeout) | (Lagging, Timeout) => true,
            _ => false,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Lagging)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Lagging => "lagging",
            ConnectionState::Timeout => "timed out",
        }
    }
}

/// Lock-free connection state readable from any thread.
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from(self.0.load(Ordering::Acquire))
    }

    /// Moves to `next` if the edge is legal. Returns the previous state on success.
    pub fn transition(&self, next: ConnectionState) -> Option<ConnectionState> {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let from = ConnectionState::from(current);
            if !from.can_transition_to(next) {
                return None;
            }
            match self.0.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(from),
                Err(actual) => current = actual,
            }
        }
    }
}

#[derive(Debug)]
struct Link {
    stream: TcpStream,
    role: Role,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
}

/// Owns the single TCP connection of a session.
#[derive(Debug)]
pub struct ConnectionManager {
    config: NetConfig,
    state: SharedState,
    shutting_down: AtomicBool,
    listener: Mutex<Option<TcpListener>>,
    link: Mutex<Option<Link>>,
}

impl ConnectionManager {
    pub fn new(config: NetConfig) -> Self {
        Self {
            config,
            state: SharedState::default(),
            shutting_down: AtomicBool::new(false),
            listener: Mutex::new(None),
            link: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    /// Listens on `port` and blocks until a guest connects or the accept
    /// timeout expires.
    ///
    /// Returns `Ok(false)` when a concurrent `disconnect` aborted the wait.
    pub fn start_server(&self, port: u16) -> Result<bool, NetError> {
        self.begin()?;

        // std sets SO_REUSEADDR on Unix listeners, so a quick restart on the
        // same port does not trip over TIME_WAIT.
        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .and_then(|l| l.set_nonblocking(true).map(|_| l))
        {
            Ok(listener) => listener,
            Err(e) => return self.fail(NetError::Io(e)),
        };
        let listen_port = listener
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(port);
        let poll_handle = match listener.try_clone() {
            Ok(handle) => handle,
            Err(e) => return self.fail(NetError::Io(e)),
        };
        *self.listener.lock() = Some(listener);

        log::info!("Waiting for a guest on port {}", listen_port);

        let deadline = Instant::now() + self.config.connect_timeout;
        let accepted = loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break Err(None);
            }
            match poll_handle.accept() {
                Ok(pair) => break Ok(pair),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break Err(Some(NetError::Timeout));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(Some(NetError::Io(e))),
            }
        };
        self.listener.lock().take();

        let (stream, remote_addr) = match accepted {
            Ok(pair) => pair,
            Err(None) => return self.cancelled(),
            Err(Some(e)) => return self.fail(e),
        };

        let local_ip = select_local_address(&local_address_candidates(&stream));
        let local_addr = SocketAddr::new(local_ip, listen_port);
        self.establish(stream, Role::Host, local_addr, remote_addr)
    }

    /// Dials the host. Returns `Ok(false)` when a concurrent `disconnect`
    /// aborted the attempt.
    pub fn connect_to_server(&self, host: &str, port: u16) -> Result<bool, NetError> {
        self.begin()?;

        let candidates = match (host, port).to_socket_addrs() {
            Ok(addrs) => dial_order(addrs),
            Err(e) => return self.fail(NetError::Io(e)),
        };

        let mut last_error = None;
        let mut connected = None;
        for addr in candidates {
            if self.shutting_down.load(Ordering::SeqCst) {
                return self.cancelled();
            }
            log::info!("Connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, self.config.connect_timeout) {
                Ok(stream) => {
                    connected = Some((stream, addr));
                    break;
                }
                Err(e) => {
                    log::debug!("Dialing {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        let Some((stream, addr)) = connected else {
            let error = last_error.unwrap_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address for {}", host),
                )
            });
            return self.fail(NetError::from_setup(error));
        };
        if self.shutting_down.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return self.cancelled();
        }

        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => return self.fail(NetError::Io(e)),
        };
        self.establish(stream, Role::Guest, local_addr, addr)
    }

    fn begin(&self) -> Result<(), NetError> {
        if self.link.lock().is_some() {
            return Err(NetError::AlreadyConnected);
        }
        self.shutting_down.store(false, Ordering::SeqCst);
        if self.state.transition(ConnectionState::Connecting).is_none() {
            return Err(NetError::AlreadyConnected);
        }
        Ok(())
    }

    fn establish(
        &self,
        stream: TcpStream,
        role: Role,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Result<bool, NetError> {
        let configured = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_nodelay(true))
            .and_then(|_| stream.set_read_timeout(Some(self.config.read_timeout)));
        if let Err(e) = configured {
            return self.fail(NetError::Io(e));
        }

        *self.link.lock() = Some(Link {
            stream,
            role,
            local_addr,
            remote_addr,
        });

        if self.shutting_down.load(Ordering::SeqCst) {
            self.close_link();
            return self.cancelled();
        }

        self.state.transition(ConnectionState::Connected);
        log::info!(
            "Connected as {:?}: local {} remote {}",
            role,
            local_addr,
            remote_addr
        );
        Ok(true)
    }

    fn fail(&self, error: NetError) -> Result<bool, NetError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return self.cancelled();
        }
        self.state.transition(ConnectionState::Disconnected);
        log::warn!("Connection setup failed: {}", error);
        Err(error)
    }

    fn cancelled(&self) -> Result<bool, NetError> {
        self.state.transition(ConnectionState::Disconnected);
        log::info!("Connection setup cancelled");
        Ok(false)
    }

    /// Hands out independent handles on the stream: writer first, then reader.
    pub fn split_streams(&self) -> Result<(TcpStream, TcpStream), NetError> {
        let link = self.link.lock();
        let link = link.as_ref().ok_or(NetError::NotConnected)?;
        let writer = link.stream.try_clone()?;
        let reader = link.stream.try_clone()?;
        Ok((writer, reader))
    }

    /// Closes everything. Safe to call repeatedly and from any thread.
    pub fn disconnect(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.listener.lock().take();
        if self.close_link() {
            log::info!("Connection closed");
        }
        self.state.transition(ConnectionState::Disconnected);
    }

    fn close_link(&self) -> bool {
        match self.link.lock().take() {
            Some(link) => {
                let _ = link.stream.shutdown(Shutdown::Both);
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.lock().is_some() && self.state.get().is_live()
    }

    pub fn role(&self) -> Option<Role> {
        self.link.lock().as_ref().map(|l| l.role)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.lock().as_ref().map(|l| l.local_addr)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.link.lock().as_ref().map(|l| l.remote_addr)
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn shared_state(&self) -> SharedState {
        self.state.clone()
    }
}

fn local_address_candidates(stream: &TcpStream) -> Vec<IpAddr> {
    let mut candidates = Vec::new();
    if let Ok(addr) = stream.local_addr() {
        candidates.push(addr.ip());
    }
    // Routing probe: connecting a UDP socket sends nothing but picks the
    // outbound interface.
    if let Ok(probe) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        && probe.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).is_ok()
        && let Ok(addr) = probe.local_addr()
    {
        candidates.push(addr.ip());
    }
    candidates
}

/// Picks the address to advertise: private IPv4, then any non-loopback
/// IPv4, then loopback.
pub fn select_local_address(candidates: &[IpAddr]) -> IpAddr {
    let v4 = || {
        candidates.iter().filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_unspecified() => Some(*v4),
            _ => None,
        })
    };

    v4().find(|ip| ip.is_private())
        .or_else(|| v4().find(|ip| !ip.is_loopback()))
        .map(IpAddr::V4)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Resolved host addresses in the order they are dialed. The host listens on
/// IPv4 only, so IPv4 goes first.
fn dial_order(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    let mut addrs: Vec<SocketAddr> = addrs.into_iter().collect();
    addrs.sort_by_key(|addr| !addr.is_ipv4());
    addrs
}
