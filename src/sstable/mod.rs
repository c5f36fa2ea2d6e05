pub mod block;
pub mod builder;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::TableBuilder;
pub use footer::TableMeta;
pub use iterator::TableIterator;
pub use reader::Table;

use std::path::{Path, PathBuf};

/// Path of the SSTable with the given id.
pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id:06}.sst"))
}
