//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionStore`: login/register/logout and the current `Session` snapshot
//! - `SessionStorage`: durable key-value surface the session is persisted to,
//!   with file, OS keychain and in-memory backends
//!
//! Tokens are opaque and never expire client-side; a session ends on logout
//! or when the server rejects its token.

pub mod credentials;
pub mod session;
pub mod storage;

pub use credentials::KeyringStorage;
pub use session::{Session, SessionData, SessionEvent, SessionStore};
pub use storage::{FileStorage, MemoryStorage, SessionStorage, TOKEN_KEY, USERNAME_KEY};
