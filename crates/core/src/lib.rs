//! # opsdesk core
//!
//! Domain types, traits, and error definitions for the opsdesk assistant
//! pipeline. This crate does no I/O; it defines the model that the
//! provider, history, and agent crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`Provider`] for the hosted LLM API
//! - [`DomainStore`] for the read-only incident/ticket/dataset store
//! - [`ChatHistoryStore`] for per-user conversation persistence
//! - [`Clock`] for cooldown arithmetic
//!
//! Implementations live in their respective crates, and tests swap in stubs.

pub mod clock;
pub mod context;
pub mod domain;
pub mod error;
pub mod history;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{ContextBundle, LocalResponder, Mode, RecordDigest, TableSection};
pub use domain::{DomainRecord, DomainStore, DomainTable, TableSnapshot, UserRole};
pub use error::{Error, ErrorClass, HistoryError, ProviderError, Result, StoreError};
pub use history::ChatHistoryStore;
pub use message::{Message, MessageMetadata, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
