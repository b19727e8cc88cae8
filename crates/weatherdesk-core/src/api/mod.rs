//! REST API client module for the weather service.
//!
//! This module provides the `ApiClient` for city and weather calls. All of
//! them go through one request pipeline that attaches the session's bearer
//! token and reacts to authorization failures by logging the session out.

pub mod client;
pub mod error;

pub use client::{http_client, ApiClient, ApiRequest, ApiResponse, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
pub use error::ApiError;
