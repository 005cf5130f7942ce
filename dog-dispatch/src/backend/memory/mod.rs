//! In-memory reference backend for single-process use and tests

mod storage;

pub use storage::MemoryBackend;
