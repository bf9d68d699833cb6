use std::io::{self, Read};
use std::net::{Shutdown, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::{join_worker, mark_worker};
use super::protocol::{FRAME_HEADER_SIZE, Message, read_frame};
use super::stats::SharedStats;

/// Receives every decoded inbound message on the receiver thread.
///
/// Callbacks run synchronously; anything that touches UI state must hand
/// the message over to its own thread.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &Message);

    fn on_connection_lost(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener list that is mutated under a lock and dispatched from a copy.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(ListenerId, Arc<dyn MessageListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn add(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn MessageListener>> {
        self.listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    /// Delivers `message` to every listener. A panicking listener is logged
    /// and skipped.
    pub fn dispatch(&self, message: &Message) {
        for listener in self.snapshot() {
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_message(message)));
            if delivered.is_err() {
                log::error!("Listener panicked handling {:?}", message.kind());
            }
        }
    }

    pub fn notify_connection_lost(&self) {
        for listener in self.snapshot() {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_connection_lost())).is_err() {
                log::error!("Listener panicked handling connection loss");
            }
        }
    }
}

/// Reads frames from the stream on a dedicated thread and fans them out.
pub struct MessageReceiver {
    listeners: Arc<ListenerRegistry>,
    running: Arc<AtomicBool>,
    interrupt: Mutex<Option<TcpStream>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<SharedStats>,
}

impl MessageReceiver {
    pub fn new(stats: Arc<SharedStats>) -> Self {
        Self {
            listeners: Arc::new(ListenerRegistry::default()),
            running: Arc::new(AtomicBool::new(false)),
            interrupt: Mutex::new(None),
            handle: Mutex::new(None),
            stats,
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn MessageListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Starts reading from a TCP stream. A clone of the stream is kept so
    /// `shutdown` can unblock a pending read.
    pub fn start(&self, stream: TcpStream, max_frame_size: usize) -> io::Result<()> {
        *self.interrupt.lock() = Some(stream.try_clone()?);
        self.start_reader(stream, max_frame_size)
    }

    pub fn start_reader<R>(&self, reader: R, max_frame_size: usize) -> io::Result<()>
    where
        R: Read + Send + 'static,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "receiver already started",
            ));
        }

        let listeners = Arc::clone(&self.listeners);
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let spawned = thread::Builder::new()
            .name("versus-receiver".into())
            .spawn(move || run(reader, max_frame_size, listeners, running, stats));

        match spawned {
            Ok(handle) => {
                *self.handle.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the loop. A read failure caused by this call is not reported
    /// as a lost connection.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(stream) = self.interrupt.lock().take() {
            let _ = stream.shutdown(Shutdown::Read);
        }
        join_worker(self.handle.lock().take(), "receiver");
    }
}

impl Drop for MessageReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<R: Read>(
    mut reader: R,
    max_frame_size: usize,
    listeners: Arc<ListenerRegistry>,
    running: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
) {
    mark_worker();
    let mut body = Vec::new();

    while running.load(Ordering::SeqCst) {
        match read_frame(&mut reader, &mut body, max_frame_size) {
            Ok(true) => {}
            // Idle past the read timeout; the heartbeat monitor owns silence.
            Ok(false) => continue,
            Err(e) => {
                if running.swap(false, Ordering::SeqCst) {
                    log::warn!("Read failed: {}", e);
                    listeners.notify_connection_lost();
                }
                break;
            }
        }
        stats.record_received(body.len() + FRAME_HEADER_SIZE);

        match Message::decode(&body) {
            Ok(message) => {
                log::trace!("Received {:?}", message.kind());
                listeners.dispatch(&message);
            }
            Err(e) => {
                stats.record_codec_failure();
                log::warn!("Dropping undecodable frame: {}", e);
            }
        }
    }

    log::debug!("Receiver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{ControlType, write_frame};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        controls: Mutex<Vec<ControlType>>,
        lost: AtomicUsize,
    }

    impl MessageListener for Recorder {
        fn on_message(&self, message: &Message) {
            if let Some(control) = message.as_control() {
                self.controls.lock().push(control.control);
            }
        }

        fn on_connection_lost(&self) {
            self.lost.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl MessageListener for Panicker {
        fn on_message(&self, _message: &Message) {
            panic!("listener failure");
        }
    }

    fn wire(messages: &[Message]) -> Vec<u8> {
        let mut wire = Vec::new();
        for message in messages {
            write_frame(&mut wire, &message.encode().unwrap()).unwrap();
        }
        wire
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn test_dispatch_in_order_then_report_eof() {
        let stats = Arc::new(SharedStats::default());
        let receiver = MessageReceiver::new(Arc::clone(&stats));
        let recorder = Arc::new(Recorder::default());
        receiver.add_listener(recorder.clone());

        let data = wire(&[
            Message::control(1, ControlType::ModeSelect),
            Message::control(1, ControlType::Ready),
            Message::control(1, ControlType::StartRequest),
        ]);
        let wire_len = data.len() as u64;
        receiver.start_reader(Cursor::new(data), 1024).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            recorder.lost.load(Ordering::SeqCst) == 1
        }));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_received, 3);
        assert_eq!(snapshot.bytes_received, wire_len);
        assert_eq!(
            *recorder.controls.lock(),
            vec![
                ControlType::ModeSelect,
                ControlType::Ready,
                ControlType::StartRequest
            ]
        );
        assert!(!receiver.is_running());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let receiver = MessageReceiver::new(Arc::new(SharedStats::default()));
        let recorder = Arc::new(Recorder::default());
        receiver.add_listener(Arc::new(Panicker));
        receiver.add_listener(recorder.clone());

        let data = wire(&[Message::control(2, ControlType::Ready)]);
        receiver.start_reader(Cursor::new(data), 1024).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            recorder.lost.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(*recorder.controls.lock(), vec![ControlType::Ready]);
    }

    #[test]
    fn test_undecodable_frame_is_skipped() {
        let stats = Arc::new(SharedStats::default());
        let receiver = MessageReceiver::new(Arc::clone(&stats));
        let recorder = Arc::new(Recorder::default());
        receiver.add_listener(recorder.clone());

        let mut data = Vec::new();
        write_frame(&mut data, &[0xAB; 3]).unwrap();
        data.extend(wire(&[Message::control(2, ControlType::ReadyCancel)]));
        receiver.start_reader(Cursor::new(data), 1024).unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            recorder.lost.load(Ordering::SeqCst) == 1
        }));
        assert_eq!(*recorder.controls.lock(), vec![ControlType::ReadyCancel]);
        assert_eq!(stats.snapshot().frames_dropped_codec, 1);
    }

    #[test]
    fn test_removed_listener_gets_nothing() {
        let registry = ListenerRegistry::default();
        let recorder = Arc::new(Recorder::default());
        let id = registry.add(recorder.clone());

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.dispatch(&Message::control(1, ControlType::Ready));

        assert!(recorder.controls.lock().is_empty());
        assert!(registry.is_empty());
    }
}
