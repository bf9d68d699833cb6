use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::event::{
    Attack, EventBus, EventFilter, GameEvent, PlacedBlock, Priority, SubscriptionId,
};
use crate::net::{Message, MessageListener, MessageSink, Payload, PlayerId};

/// Direct path for garbage received from the opponent.
pub trait LocalBoard: Send + Sync {
    fn apply_attack(&self, attack: &Attack);
}

pub type LostHandler = Arc<dyn Fn() + Send + Sync>;

/// Counters reported in the periodic diagnostics line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub events_sent: u64,
    pub events_filtered: u64,
    pub events_dropped: u64,
    pub attacks_sent: u64,
    pub events_received: u64,
    pub attacks_received: u64,
}

#[derive(Default)]
struct Counters {
    events_sent: AtomicU64,
    events_filtered: AtomicU64,
    events_dropped: AtomicU64,
    attacks_sent: AtomicU64,
    events_received: AtomicU64,
    attacks_received: AtomicU64,
}

/// Bridges the local simulation and the opponent.
///
/// Outbound, allowed local events become `GAME_EVENT` frames and big clears
/// additionally become `ATTACK` frames. Inbound frames are republished on
/// the remote bus, never on the local one.
pub struct EventSynchronizer {
    player_id: PlayerId,
    sink: Arc<dyn MessageSink>,
    remote: Arc<EventBus>,
    local_board: Option<Arc<dyn LocalBoard>>,
    filter: EventFilter,
    last_placed: Mutex<Option<PlacedBlock>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    on_lost: Mutex<Option<LostHandler>>,
    counters: Counters,
    stats_interval: Duration,
    last_report: Mutex<Instant>,
}

impl EventSynchronizer {
    pub fn new(
        player_id: PlayerId,
        sink: Arc<dyn MessageSink>,
        remote: Arc<EventBus>,
        local_board: Option<Arc<dyn LocalBoard>>,
        stats_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            player_id,
            sink,
            remote,
            local_board,
            filter: EventFilter,
            last_placed: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            on_lost: Mutex::new(None),
            counters: Counters::default(),
            stats_interval,
            last_report: Mutex::new(Instant::now()),
        })
    }

    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    pub fn remote_bus(&self) -> &Arc<EventBus> {
        &self.remote
    }

    /// Observes every event on the local bus and lets the filter decide.
    /// High priority so the frame is queued before local side effects run.
    pub fn attach(self: &Arc<Self>, local: &EventBus) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let id = local.subscribe_all(Priority::High, move |event| {
            if let Some(sync) = weak.upgrade() {
                sync.on_local_event(event);
            }
        });
        self.subscriptions.lock().push(id);
    }

    pub fn detach(&self, local: &EventBus) {
        for id in self.subscriptions.lock().drain(..) {
            local.unsubscribe(id);
        }
    }

    pub fn set_connection_lost_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_lost.lock() = Some(Arc::new(handler));
    }

    pub fn on_local_event(&self, event: &GameEvent) {
        if !self.filter.should_sync(event) {
            self.counters.events_filtered.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let GameEvent::BlockPlaced(placed) = event {
            *self.last_placed.lock() = Some(placed.clone());
        }

        match Message::game_event(self.player_id, event) {
            Ok(message) => self.send(message, &self.counters.events_sent),
            Err(e) => {
                self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping {:?} event: {}", event.kind(), e);
            }
        }

        if let GameEvent::LinesCleared { rows, last_placed } = event {
            let placed = last_placed
                .clone()
                .or_else(|| self.last_placed.lock().clone());
            if let Some(attack) = Attack::from_clear(rows.len(), placed.as_ref()) {
                log::debug!("Sending {} garbage lines", attack.lines);
                self.send(
                    Message::attack(self.player_id, attack),
                    &self.counters.attacks_sent,
                );
            }
        }

        self.report_at(Instant::now());
    }

    fn send(&self, message: Message, counter: &AtomicU64) {
        if self.sink.send_message(message) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_remote_event(&self, data: &[u8]) {
        match GameEvent::from_bytes(data) {
            Ok(event) => {
                self.counters.events_received.fetch_add(1, Ordering::Relaxed);
                self.remote.publish(&event);
            }
            Err(e) => log::warn!("Dropping unreadable remote event: {}", e),
        }
    }

    fn on_remote_attack(&self, attack: &Attack) {
        self.counters.attacks_received.fetch_add(1, Ordering::Relaxed);
        log::debug!("Received {} garbage lines", attack.lines);
        self.remote.publish(&GameEvent::AttackReceived(attack.clone()));
        if let Some(board) = &self.local_board {
            board.apply_attack(attack);
        }
    }

    /// Logs the counters if a stats interval has passed since the last
    /// report. Owners call this from their own loop so quiet sessions
    /// still report.
    pub fn report_if_due(&self) -> bool {
        self.report_at(Instant::now())
    }

    fn report_at(&self, now: Instant) -> bool {
        {
            let mut last = self.last_report.lock();
            if now.saturating_duration_since(*last) < self.stats_interval {
                return false;
            }
            *last = now;
        }
        let stats = self.stats();
        log::info!(
            "Sync: sent={} filtered={} dropped={} attacks={}",
            stats.events_sent,
            stats.events_filtered,
            stats.events_dropped,
            stats.attacks_sent
        );
        true
    }

    pub fn stats(&self) -> SyncStats {
        let c = &self.counters;
        SyncStats {
            events_sent: c.events_sent.load(Ordering::Relaxed),
            events_filtered: c.events_filtered.load(Ordering::Relaxed),
            events_dropped: c.events_dropped.load(Ordering::Relaxed),
            attacks_sent: c.attacks_sent.load(Ordering::Relaxed),
            events_received: c.events_received.load(Ordering::Relaxed),
            attacks_received: c.attacks_received.load(Ordering::Relaxed),
        }
    }
}

impl MessageListener for EventSynchronizer {
    fn on_message(&self, message: &Message) {
        match message.payload() {
            Payload::GameEvent { data, .. } => self.on_remote_event(data),
            Payload::Attack { attack, .. } => self.on_remote_attack(attack),
            Payload::Heartbeat { .. } | Payload::GameControl(_) => {}
        }
    }

    fn on_connection_lost(&self) {
        let handler = self.on_lost.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BlockType, EventKind};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<Message>>,
    }

    impl MessageSink for RecordingSink {
        fn send_message(&self, message: Message) -> bool {
            self.messages.lock().push(message);
            true
        }
    }

    #[derive(Default)]
    struct RecordingBoard {
        attacks: Mutex<Vec<Attack>>,
    }

    impl LocalBoard for RecordingBoard {
        fn apply_attack(&self, attack: &Attack) {
            self.attacks.lock().push(attack.clone());
        }
    }

    fn synchronizer(
        player_id: PlayerId,
    ) -> (Arc<EventSynchronizer>, Arc<RecordingSink>, Arc<RecordingBoard>) {
        let sink = Arc::new(RecordingSink::default());
        let board = Arc::new(RecordingBoard::default());
        let sync = EventSynchronizer::new(
            player_id,
            sink.clone(),
            Arc::new(EventBus::new()),
            Some(board.clone()),
            Duration::from_secs(10),
        );
        (sync, sink, board)
    }

    fn placed(pattern: Vec<Vec<u8>>, x: i32) -> PlacedBlock {
        PlacedBlock {
            block: BlockType::L,
            pattern,
            x,
            y: 17,
        }
    }

    fn kinds(sink: &RecordingSink) -> Vec<crate::net::MessageKind> {
        sink.messages.lock().iter().map(Message::kind).collect()
    }

    #[test]
    fn test_filtered_event_produces_no_message() {
        let (sync, sink, _) = synchronizer(1);
        sync.on_local_event(&GameEvent::Tick { frame: 42 });
        sync.on_local_event(&GameEvent::GamePaused);

        assert!(sink.messages.lock().is_empty());
        assert_eq!(sync.stats().events_filtered, 2);
    }

    #[test]
    fn test_three_line_clear_sends_event_and_attack() {
        let (sync, sink, _) = synchronizer(1);
        sync.on_local_event(&GameEvent::BlockPlaced(placed(vec![vec![1, 0, 1, 1]], 4)));
        sync.on_local_event(&GameEvent::LinesCleared {
            rows: vec![17, 18, 19],
            last_placed: None,
        });

        use crate::net::MessageKind;
        assert_eq!(
            kinds(&sink),
            vec![
                MessageKind::GameEvent,
                MessageKind::GameEvent,
                MessageKind::Attack
            ]
        );

        let messages = sink.messages.lock();
        match messages[2].payload() {
            Payload::Attack { attack, player_id } => {
                assert_eq!(*player_id, 1);
                assert_eq!(attack.lines, 3);
                assert_eq!(attack.pattern, vec![vec![1, 0, 1, 1]]);
                assert_eq!(attack.offset, 4);
            }
            other => panic!("expected attack, got {:?}", other),
        }
        assert_eq!(sync.stats().attacks_sent, 1);
    }

    #[test]
    fn test_clear_carries_its_own_placed_block() {
        let (sync, sink, _) = synchronizer(2);
        sync.on_local_event(&GameEvent::BlockPlaced(placed(vec![vec![1]], 0)));
        sync.on_local_event(&GameEvent::LinesCleared {
            rows: vec![18, 19],
            last_placed: Some(placed(vec![vec![1, 1], vec![0, 1]], 7)),
        });

        let messages = sink.messages.lock();
        let Payload::Attack { attack, .. } = messages[2].payload() else {
            panic!("expected attack");
        };
        assert_eq!(attack.offset, 7);
        assert_eq!(attack.lines, 2);
    }

    #[test]
    fn test_single_line_clear_sends_no_attack() {
        let (sync, sink, _) = synchronizer(1);
        sync.on_local_event(&GameEvent::LinesCleared {
            rows: vec![19],
            last_placed: None,
        });

        assert_eq!(kinds(&sink), vec![crate::net::MessageKind::GameEvent]);
    }

    #[test]
    fn test_attached_bus_forwards_synced_kinds_only() {
        let (sync, sink, _) = synchronizer(1);
        let local = EventBus::new();
        sync.attach(&local);
        assert_eq!(local.subscriber_count(), 1);

        local.publish(&GameEvent::BlockMoved { x: 3, y: 5 });
        local.publish(&GameEvent::Tick { frame: 1 });
        local.publish(&GameEvent::ScoreUpdated {
            score: 100,
            level: 1,
            lines: 1,
        });
        assert_eq!(sink.messages.lock().len(), 2);
        assert_eq!(sync.stats().events_filtered, 1);
        assert_eq!(sync.stats().events_sent, 2);

        sync.detach(&local);
        local.publish(&GameEvent::BlockMoved { x: 3, y: 6 });
        assert_eq!(sink.messages.lock().len(), 2);
        assert_eq!(local.subscriber_count(), 0);
    }

    #[test]
    fn test_remote_event_goes_to_remote_bus() {
        let (sync, _, _) = synchronizer(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        sync.remote_bus()
            .subscribe_all(Priority::Normal, move |e| s.lock().push(e.clone()));

        let event = GameEvent::BlockSpawned {
            block: BlockType::T,
            x: 4,
            y: 0,
            rotation: 0,
        };
        sync.on_message(&Message::game_event(1, &event).unwrap());

        assert_eq!(*seen.lock(), vec![event]);
        assert_eq!(sync.stats().events_received, 1);
    }

    #[test]
    fn test_remote_attack_reaches_board_and_bus() {
        let (sync, _, board) = synchronizer(2);
        let published = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&published);
        sync.remote_bus()
            .subscribe(EventKind::AttackReceived, Priority::Normal, move |_| {
                p.fetch_add(1, Ordering::SeqCst);
            });

        let attack = Attack::new(3, vec![vec![1, 0, 1, 1]], 4);
        sync.on_message(&Message::attack(1, attack.clone()));

        assert_eq!(*board.attacks.lock(), vec![attack]);
        assert_eq!(published.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_heartbeat_and_control_are_ignored() {
        let (sync, _, board) = synchronizer(2);
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        sync.remote_bus().subscribe_all(Priority::Normal, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        sync.on_message(&Message::heartbeat());
        sync.on_message(&Message::control(1, crate::net::ControlType::Ready));

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(board.attacks.lock().is_empty());
    }

    #[test]
    fn test_connection_lost_reaches_owner() {
        let (sync, _, _) = synchronizer(1);
        let lost = Arc::new(AtomicUsize::new(0));
        let l = Arc::clone(&lost);
        sync.set_connection_lost_handler(move || {
            l.fetch_add(1, Ordering::SeqCst);
        });

        sync.on_connection_lost();
        assert_eq!(lost.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_report_waits_for_interval() {
        let (sync, _, _) = synchronizer(1);
        let start = *sync.last_report.lock();

        assert!(!sync.report_at(start + Duration::from_secs(9)));
        assert!(sync.report_at(start + Duration::from_secs(10)));
        assert!(!sync.report_at(start + Duration::from_secs(15)));
        assert!(sync.report_at(start + Duration::from_secs(20)));
    }
}
