//! Adapters for the storage ports

mod directory;
mod memory;

pub use directory::DirectoryFileRepository;
pub use memory::{MemoryFileRepository, MemorySeriesStore};
