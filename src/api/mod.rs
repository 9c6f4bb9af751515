//! HTTP API Module
//!
//! Provides a REST API for creating, listing and revoking VPN users.

mod http;

pub use http::{AppState, HttpServer};
