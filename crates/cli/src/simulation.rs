use std::sync::atomic::{AtomicU32, Ordering};

use versus::event::BlockType;
use versus::{Attack, GameEvent, LocalBoard, PlacedBlock};

const BOARD_BOTTOM: i32 = 18;
const BAG: [BlockType; 7] = [
    BlockType::I,
    BlockType::O,
    BlockType::T,
    BlockType::S,
    BlockType::Z,
    BlockType::J,
    BlockType::L,
];

pub fn pattern(block: BlockType) -> Vec<Vec<u8>> {
    match block {
        BlockType::I => vec![vec![1, 1, 1, 1]],
        BlockType::O => vec![vec![1, 1], vec![1, 1]],
        BlockType::T => vec![vec![0, 1, 0], vec![1, 1, 1]],
        BlockType::S => vec![vec![0, 1, 1], vec![1, 1, 0]],
        BlockType::Z => vec![vec![1, 1, 0], vec![0, 1, 1]],
        BlockType::J => vec![vec![1, 0, 0], vec![1, 1, 1]],
        BlockType::L => vec![vec![0, 0, 1], vec![1, 1, 1]],
    }
}

/// Deterministic stand-in for a real game: drops a fixed sequence of blocks
/// and emits the events a board would.
#[derive(Debug)]
pub struct ScriptedGame {
    pieces: u32,
    placed: u32,
    frame: u64,
    score: u64,
    lines: u32,
    over: bool,
}

impl ScriptedGame {
    pub fn new(pieces: u32) -> Self {
        Self {
            pieces,
            placed: 0,
            frame: 0,
            score: 0,
            lines: 0,
            over: false,
        }
    }

    pub fn is_over(&self) -> bool {
        self.over
    }

    pub fn score(&self) -> u64 {
        self.score
    }

    /// Events for one dropped block.
    pub fn step(&mut self) -> Vec<GameEvent> {
        if self.over {
            return Vec::new();
        }
        if self.placed >= self.pieces {
            self.over = true;
            return vec![GameEvent::GameOver {
                final_score: self.score,
            }];
        }

        let block = BAG[self.placed as usize % BAG.len()];
        let x = (self.placed as i32 * 3) % 7;
        self.frame += 1;

        let mut events = vec![
            GameEvent::Tick { frame: self.frame },
            GameEvent::BlockSpawned {
                block,
                x: 3,
                y: 0,
                rotation: 0,
            },
            GameEvent::BlockMoved { x, y: 8 },
            GameEvent::BlockRotated {
                rotation: 1,
                x,
                y: 12,
            },
        ];
        let placed = PlacedBlock {
            block,
            pattern: pattern(block),
            x,
            y: BOARD_BOTTOM,
        };
        events.push(GameEvent::BlockPlaced(placed.clone()));
        self.placed += 1;

        let cleared = match self.placed {
            n if n % 5 == 0 => 3,
            n if n % 3 == 0 => 2,
            n if n % 2 == 0 => 1,
            _ => 0,
        };
        if cleared > 0 {
            events.push(GameEvent::LinesCleared {
                rows: (0..cleared).map(|i| 19 - i).collect(),
                last_placed: Some(placed),
            });
            self.lines += cleared;
            self.score += [0, 100, 300, 500, 800][cleared as usize];
            events.push(GameEvent::ScoreUpdated {
                score: self.score,
                level: 1 + self.lines / 10,
                lines: self.lines,
            });
        }
        events
    }
}

/// Counts garbage lines pushed onto the local board by the opponent.
#[derive(Debug, Default)]
pub struct GarbageBoard {
    pending: AtomicU32,
}

impl GarbageBoard {
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Relaxed)
    }
}

impl LocalBoard for GarbageBoard {
    fn apply_attack(&self, attack: &Attack) {
        self.pending.fetch_add(attack.lines, Ordering::Relaxed);
    }
}
