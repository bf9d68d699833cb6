use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::net::MessageError;

/// Minimum number of rows a single clear must remove before it sends garbage.
pub const MIN_ATTACK_LINES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum EventKind {
    BlockSpawned,
    BlockMoved,
    BlockRotated,
    BlockPlaced,
    LinesCleared,
    ScoreUpdated,
    GameOver,
    ItemUsed,
    AttackApplied,
    Tick,
    BlockHeld,
    LevelUp,
    GamePaused,
    GameResumed,
    AttackReceived,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        Self::BlockSpawned,
        Self::BlockMoved,
        Self::BlockRotated,
        Self::BlockPlaced,
        Self::LinesCleared,
        Self::ScoreUpdated,
        Self::GameOver,
        Self::ItemUsed,
        Self::AttackApplied,
        Self::Tick,
        Self::BlockHeld,
        Self::LevelUp,
        Self::GamePaused,
        Self::GameResumed,
        Self::AttackReceived,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum BlockType {
    I,
    O,
    T,
    S,
    Z,
    J,
    L,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum ItemKind {
    ClearRow,
    Bomb,
    SlowDown,
    Shield,
}

/// A block as it was locked into the board: its occupied cells and where.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct PlacedBlock {
    pub block: BlockType,
    pub pattern: Vec<Vec<u8>>,
    pub x: i32,
    pub y: i32,
}

/// Garbage lines sent to the opponent.
///
/// `pattern` is the shape of the block that completed the clear, and `offset`
/// its column, so the receiving board can punch the same holes into the rows
/// it pushes up.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Attack {
    pub lines: u32,
    pub pattern: Vec<Vec<u8>>,
    pub offset: i32,
}

impl Attack {
    pub fn new(lines: u32, pattern: Vec<Vec<u8>>, offset: i32) -> Self {
        Self {
            lines,
            pattern,
            offset,
        }
    }

    /// Derives the attack for a clear of `cleared` rows, if it is large enough.
    pub fn from_clear(cleared: usize, placed: Option<&PlacedBlock>) -> Option<Self> {
        if cleared < MIN_ATTACK_LINES {
            return None;
        }
        let (pattern, offset) = placed
            .map(|p| (p.pattern.clone(), p.x))
            .unwrap_or_default();
        Some(Self::new(cleared as u32, pattern, offset))
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum GameEvent {
    BlockSpawned {
        block: BlockType,
        x: i32,
        y: i32,
        rotation: u8,
    },
    BlockMoved {
        x: i32,
        y: i32,
    },
    BlockRotated {
        rotation: u8,
        x: i32,
        y: i32,
    },
    BlockPlaced(PlacedBlock),
    LinesCleared {
        rows: Vec<u32>,
        last_placed: Option<PlacedBlock>,
    },
    ScoreUpdated {
        score: u64,
        level: u32,
        lines: u32,
    },
    GameOver {
        final_score: u64,
    },
    ItemUsed {
        item: ItemKind,
    },
    AttackApplied {
        lines: u32,
    },
    Tick {
        frame: u64,
    },
    BlockHeld {
        block: BlockType,
    },
    LevelUp {
        level: u32,
    },
    GamePaused,
    GameResumed,
    AttackReceived(Attack),
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::BlockSpawned { .. } => EventKind::BlockSpawned,
            Self::BlockMoved { .. } => EventKind::BlockMoved,
            Self::BlockRotated { .. } => EventKind::BlockRotated,
            Self::BlockPlaced(_) => EventKind::BlockPlaced,
            Self::LinesCleared { .. } => EventKind::LinesCleared,
            Self::ScoreUpdated { .. } => EventKind::ScoreUpdated,
            Self::GameOver { .. } => EventKind::GameOver,
            Self::ItemUsed { .. } => EventKind::ItemUsed,
            Self::AttackApplied { .. } => EventKind::AttackApplied,
            Self::Tick { .. } => EventKind::Tick,
            Self::BlockHeld { .. } => EventKind::BlockHeld,
            Self::LevelUp { .. } => EventKind::LevelUp,
            Self::GamePaused => EventKind::GamePaused,
            Self::GameResumed => EventKind::GameResumed,
            Self::AttackReceived(_) => EventKind::AttackReceived,
        }
    }

    pub fn cleared_lines(&self) -> usize {
        match self {
            Self::LinesCleared { rows, .. } => rows.len(),
            _ => 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(MessageError::Serialize)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, MessageError> {
        let aligned = crate::net::aligned_copy(data);
        rkyv::from_bytes::<Self, rancor::Error>(&aligned).map_err(MessageError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(pattern: Vec<Vec<u8>>, x: i32) -> PlacedBlock {
        PlacedBlock {
            block: BlockType::T,
            pattern,
            x,
            y: 18,
        }
    }

    #[test]
    fn test_kind_matches_variant() {
        for (event, kind) in [
            (GameEvent::GameOver { final_score: 10 }, EventKind::GameOver),
            (GameEvent::Tick { frame: 1 }, EventKind::Tick),
            (GameEvent::GamePaused, EventKind::GamePaused),
            (
                GameEvent::AttackReceived(Attack::new(2, vec![], 0)),
                EventKind::AttackReceived,
            ),
        ] {
            assert_eq!(event.kind(), kind);
        }
    }

    #[test]
    fn test_single_line_clear_is_not_an_attack() {
        let block = placed(vec![vec![1, 1, 1, 1]], 3);
        assert!(Attack::from_clear(1, Some(&block)).is_none());
        assert!(Attack::from_clear(0, None).is_none());
    }

    #[test]
    fn test_attack_copies_pattern_and_offset() {
        let block = placed(vec![vec![1, 0, 1, 1]], 4);
        let attack = Attack::from_clear(3, Some(&block)).unwrap();

        assert_eq!(attack.lines, 3);
        assert_eq!(attack.pattern, vec![vec![1, 0, 1, 1]]);
        assert_eq!(attack.offset, 4);
    }

    #[test]
    fn test_attack_without_placed_block_has_no_holes() {
        let attack = Attack::from_clear(4, None).unwrap();
        assert_eq!(attack.lines, 4);
        assert!(attack.pattern.is_empty());
        assert_eq!(attack.offset, 0);
    }

    #[test]
    fn test_event_bytes_survive_decode() {
        let event = GameEvent::LinesCleared {
            rows: vec![17, 18, 19],
            last_placed: Some(placed(vec![vec![0, 1], vec![1, 1]], 6)),
        };

        let bytes = event.to_bytes().unwrap();
        let decoded = GameEvent::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, event);
        assert_eq!(decoded.cleared_lines(), 3);
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(GameEvent::from_bytes(&[0xFF, 0x01, 0x02]).is_err());
    }
}
