//! Bindings between external conversational surfaces and runtime sessions.
//!
//! Two layers: per-account thread bindings (a platform thread pinned to a
//! session, with idle/max-age expiry) and conversation-level session
//! bindings used as the fallback when no thread binding exists.

pub mod error;
pub mod session;
pub mod store;
pub mod surface;
pub mod thread;

pub use {
    error::{Error, Result},
    session::{ConversationKey, FileSessionBindingService, SessionBinding, SessionBindingService},
    surface::ThreadSurface,
    thread::{ThreadBindingConfig, ThreadBindingManager, ThreadBindingRecord},
};
