//! Chat history backends for opsdesk.

pub mod file_backend;
pub mod in_memory;

pub use file_backend::FileHistoryStore;
pub use in_memory::InMemoryHistoryStore;
