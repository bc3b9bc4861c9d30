//! Storage backends. The in-memory store is the reference implementation
//! of the sdk's store traits; relational backends adapt externally.

pub mod memory;

pub use memory::MemoryStores;
