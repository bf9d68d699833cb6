mod bus;
mod filter;
mod types;

pub use bus::{EventBus, EventHandler, Priority, SubscriptionId};
pub use filter::EventFilter;
pub use types::{
    Attack, BlockType, EventKind, GameEvent, ItemKind, MIN_ATTACK_LINES, PlacedBlock,
};
