//! Task store implementations for taskpilot.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileTaskStore;
pub use in_memory::InMemoryTaskStore;
