//! Core library for weatherdesk.
//!
//! Holds the client side of the weather service: the session store that
//! tracks who is logged in, the request pipeline every API call goes through,
//! and the city/weather models.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse};
pub use auth::{Session, SessionEvent, SessionStore};
pub use config::{Config, StorageBackend};
pub use context::AppContext;
