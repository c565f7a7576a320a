pub mod block;
pub mod iterators;
pub mod lsm_iterator;
pub mod lsm_storage;
pub mod mem_table;
pub mod skiplist;
pub mod table;

pub use lsm_storage::{LsmStorage, LsmStorageOptions};
