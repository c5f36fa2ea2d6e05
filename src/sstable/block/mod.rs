pub mod builder;
pub mod reader;

pub use builder::BlockBuilder;
pub use reader::{Block, BlockIterator};

/// Per-entry fixed header: key_len(2B) + val_len(4B) + sequence(8B) + type(1B).
pub const ENTRY_HEADER_SIZE: usize = 2 + 4 + 8 + 1;
