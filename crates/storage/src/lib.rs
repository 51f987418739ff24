//! Session and translation storage
//!
//! The broker persists session rows and (optionally) delivered
//! translations through the traits in this crate. The in-memory backends
//! are the bundled implementation; SQL or remote backends live outside the
//! workspace and plug in behind the same traits.
//!
//! Storage failures are logged by callers and never surface to clients.

pub mod memory;
pub mod session;
pub mod translation;

pub use memory::{InMemorySessionStore, InMemoryTranslationStore};
pub use session::{SessionQuality, SessionRecord, SessionStore};
pub use translation::{TranslationRecord, TranslationStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
