use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel as cb;
use parking_lot::Mutex;

use super::protocol::{Message, MessageError, write_frame};
use super::{join_worker, mark_worker};
use super::stats::SharedStats;

/// Frame buffer capacity kept between writes. A buffer that grew past this
/// for one large frame is released afterwards.
const FRAME_BUFFER_RETAIN: usize = 4 * 1024;

/// Anything that accepts outbound messages without blocking.
pub trait MessageSink: Send + Sync {
    /// Returns false when the message was dropped.
    fn send_message(&self, message: Message) -> bool;
}

/// Drains a bounded outbound queue onto the wire from a dedicated thread.
pub struct MessageSender {
    queue: cb::Sender<Message>,
    pending: Mutex<Option<cb::Receiver<Message>>>,
    shutdown: Mutex<Option<cb::Sender<()>>>,
    interrupt: Mutex<Option<TcpStream>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    max_frame_size: usize,
    stats: Arc<SharedStats>,
}

impl MessageSender {
    /// Frames whose encoded body exceeds `max_frame_size` are dropped
    /// instead of written, since the peer would reject them.
    pub fn new(capacity: usize, max_frame_size: usize, stats: Arc<SharedStats>) -> Self {
        let (queue, pending) = cb::bounded(capacity.max(1));
        Self {
            queue,
            pending: Mutex::new(Some(pending)),
            shutdown: Mutex::new(None),
            interrupt: Mutex::new(None),
            running: Arc::new(AtomicBool::new(true)),
            handle: Mutex::new(None),
            max_frame_size,
            stats,
        }
    }

    /// Spawns the writer thread. `on_failure` runs once if a write fails
    /// before `shutdown` was requested.
    pub fn start<W, F>(&self, writer: W, on_failure: F) -> io::Result<()>
    where
        W: Write + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let queue = self.pending.lock().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "sender already started")
        })?;
        let (shutdown_tx, shutdown_rx) = cb::bounded::<()>(0);
        *self.shutdown.lock() = Some(shutdown_tx);

        let max_frame_size = self.max_frame_size;
        let running = Arc::clone(&self.running);
        let stats = Arc::clone(&self.stats);
        let handle = thread::Builder::new()
            .name("versus-sender".into())
            .spawn(move || {
                run(writer, queue, shutdown_rx, max_frame_size, running, stats, on_failure)
            })?;
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Starts writing to a TCP stream. A clone of the stream is kept so
    /// `shutdown` can unblock a write stuck on a full socket buffer.
    pub fn start_stream<F>(&self, stream: TcpStream, on_failure: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        *self.interrupt.lock() = Some(stream.try_clone()?);
        self.start(stream, on_failure)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Stops the writer. Queued messages that were not written yet are lost.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.lock().take();
        if let Some(stream) = self.interrupt.lock().take() {
            let _ = stream.shutdown(Shutdown::Write);
        }
        join_worker(self.handle.lock().take(), "sender");
    }
}

impl MessageSink for MessageSender {
    fn send_message(&self, message: Message) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.queue.try_send(message) {
            Ok(()) => true,
            Err(cb::TrySendError::Full(message)) => {
                self.stats.record_overflow();
                log::debug!("Outbound queue full, dropping {:?}", message.kind());
                false
            }
            Err(cb::TrySendError::Disconnected(_)) => false,
        }
    }
}

impl Drop for MessageSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<W, F>(
    mut writer: W,
    queue: cb::Receiver<Message>,
    shutdown: cb::Receiver<()>,
    max_frame_size: usize,
    running: Arc<AtomicBool>,
    stats: Arc<SharedStats>,
    on_failure: F,
) where
    W: Write,
    F: FnOnce(),
{
    mark_worker();
    let mut frame = Vec::with_capacity(FRAME_BUFFER_RETAIN);

    loop {
        let next = cb::select! {
            recv(queue) -> message => message.ok(),
            recv(shutdown) -> _ => None,
        };
        let Some(message) = next else {
            break;
        };
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let body = match message.encode() {
            Ok(body) => body,
            Err(e) => {
                stats.record_codec_failure();
                log::warn!("Dropping {:?} frame: {}", message.kind(), e);
                continue;
            }
        };
        if body.len() > max_frame_size {
            stats.record_codec_failure();
            log::warn!(
                "Dropping {:?} frame: {}",
                message.kind(),
                MessageError::FrameTooLarge(body.len())
            );
            continue;
        }

        frame.clear();
        let written = write_frame(&mut frame, &body)
            .and_then(|_| writer.write_all(&frame))
            .and_then(|_| writer.flush());

        if let Err(e) = written {
            if running.swap(false, Ordering::SeqCst) {
                log::warn!("Write failed: {}", e);
                on_failure();
            }
            break;
        }
        stats.record_sent(frame.len());
        log::trace!("Sent {:?} ({} bytes)", message.kind(), frame.len());

        if frame.capacity() > FRAME_BUFFER_RETAIN {
            frame = Vec::with_capacity(FRAME_BUFFER_RETAIN);
        }
    }

    log::debug!("Sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Attack;
    use crate::net::protocol::{ControlType, MAX_FRAME_SIZE, read_frame};
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
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
    fn test_queue_bound_fails_fast() {
        let sender = MessageSender::new(3, MAX_FRAME_SIZE, Arc::new(SharedStats::default()));

        let results: Vec<bool> = (0..5)
            .map(|_| sender.send_message(Message::heartbeat()))
            .collect();

        assert_eq!(results, vec![true, true, true, false, false]);
        assert_eq!(sender.queued(), 3);
        assert_eq!(sender.stats.snapshot().frames_dropped_overflow, 2);
    }

    #[test]
    fn test_frames_written_in_queue_order() {
        let stats = Arc::new(SharedStats::default());
        let sender = MessageSender::new(16, MAX_FRAME_SIZE, Arc::clone(&stats));
        let controls = [
            ControlType::ModeSelect,
            ControlType::VersionCheck,
            ControlType::Ready,
            ControlType::ReadyCancel,
            ControlType::StartRequest,
        ];
        for control in controls {
            assert!(sender.send_message(Message::control(1, control)));
        }

        let buffer = SharedBuffer::default();
        sender.start(buffer.clone(), || {}).unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            stats.snapshot().frames_sent == controls.len() as u64
        }));
        sender.shutdown();

        let mut cursor = Cursor::new(buffer.0.lock().clone());
        let mut body = Vec::new();
        let mut seen = Vec::new();
        while read_frame(&mut cursor, &mut body, 1024).is_ok() {
            let message = Message::decode(&body).unwrap();
            seen.push(message.as_control().unwrap().control);
        }
        assert_eq!(seen, controls.to_vec());
    }

    #[test]
    fn test_write_failure_reports_once_and_stops() {
        let sender = MessageSender::new(8, MAX_FRAME_SIZE, Arc::new(SharedStats::default()));
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);

        sender
            .start(BrokenPipe, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        sender.send_message(Message::heartbeat());
        sender.send_message(Message::heartbeat());

        assert!(wait_until(Duration::from_secs(2), || !sender.is_running()));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(!sender.send_message(Message::heartbeat()));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let sender = MessageSender::new(8, MAX_FRAME_SIZE, Arc::new(SharedStats::default()));
        sender.start(SharedBuffer::default(), || {}).unwrap();

        sender.shutdown();
        sender.shutdown();

        assert!(!sender.is_running());
        assert!(!sender.send_message(Message::heartbeat()));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let sender = MessageSender::new(8, MAX_FRAME_SIZE, Arc::new(SharedStats::default()));
        sender.start(SharedBuffer::default(), || {}).unwrap();
        assert!(sender.start(SharedBuffer::default(), || {}).is_err());
    }

    #[test]
    fn test_oversized_frame_is_dropped_not_written() {
        let stats = Arc::new(SharedStats::default());
        let sender = MessageSender::new(8, 512, Arc::clone(&stats));
        let buffer = SharedBuffer::default();
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        sender
            .start(buffer.clone(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let huge = Attack::new(2, vec![vec![1; 4096]], 0);
        assert!(sender.send_message(Message::attack(1, huge)));
        assert!(sender.send_message(Message::control(1, ControlType::Ready)));

        assert!(wait_until(Duration::from_secs(2), || {
            stats.snapshot().frames_sent == 1
        }));
        sender.shutdown();

        assert_eq!(stats.snapshot().frames_dropped_codec, 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        let mut cursor = Cursor::new(buffer.0.lock().clone());
        let mut body = Vec::new();
        assert!(read_frame(&mut cursor, &mut body, 512).unwrap());
        let message = Message::decode(&body).unwrap();
        assert_eq!(message.as_control().unwrap().control, ControlType::Ready);
        assert!(read_frame(&mut cursor, &mut body, 512).is_err());
    }
}
