use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub frames_dropped_overflow: u64,
    pub frames_dropped_codec: u64,
}

/// Counters updated from the sender and receiver threads.
#[derive(Debug, Default)]
pub struct SharedStats {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    frames_dropped_overflow: AtomicU64,
    frames_dropped_codec: AtomicU64,
}

impl SharedStats {
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.frames_dropped_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_codec_failure(&self) {
        self.frames_dropped_codec.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NetworkStats {
        NetworkStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped_overflow: self.frames_dropped_overflow.load(Ordering::Relaxed),
            frames_dropped_codec: self.frames_dropped_codec.load(Ordering::Relaxed),
        }
    }
}
