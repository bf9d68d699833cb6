use super::types::{EventKind, GameEvent};

/// Decides which local events are worth sending to the opponent.
///
/// Per-frame bookkeeping such as ticks stays local.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventFilter;

impl EventFilter {
    pub const SYNCED: [EventKind; 9] = [
        EventKind::BlockSpawned,
        EventKind::BlockMoved,
        EventKind::BlockRotated,
        EventKind::BlockPlaced,
        EventKind::LinesCleared,
        EventKind::ScoreUpdated,
        EventKind::GameOver,
        EventKind::ItemUsed,
        EventKind::AttackApplied,
    ];

    pub fn is_allowed(kind: EventKind) -> bool {
        matches!(
            kind,
            EventKind::BlockSpawned
                | EventKind::BlockMoved
                | EventKind::BlockRotated
                | EventKind::BlockPlaced
                | EventKind::LinesCleared
                | EventKind::ScoreUpdated
                | EventKind::GameOver
                | EventKind::ItemUsed
                | EventKind::AttackApplied
        )
    }

    pub fn should_sync(&self, event: &GameEvent) -> bool {
        Self::is_allowed(event.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_matches_is_allowed() {
        for kind in EventKind::ALL {
            assert_eq!(
                EventFilter::is_allowed(kind),
                EventFilter::SYNCED.contains(&kind),
                "{:?}",
                kind
            );
        }
    }

    #[test]
    fn test_local_only_events_are_dropped() {
        let filter = EventFilter;
        assert!(!filter.should_sync(&GameEvent::Tick { frame: 9 }));
        assert!(!filter.should_sync(&GameEvent::GamePaused));
        assert!(!filter.should_sync(&GameEvent::LevelUp { level: 2 }));
    }

    #[test]
    fn test_gameplay_events_pass() {
        let filter = EventFilter;
        assert!(filter.should_sync(&GameEvent::BlockMoved { x: 4, y: 0 }));
        assert!(filter.should_sync(&GameEvent::ScoreUpdated {
            score: 1200,
            level: 3,
            lines: 14,
        }));
        assert!(filter.should_sync(&GameEvent::GameOver { final_score: 1200 }));
    }
}
