//! # linkdrop-server
//!
//! HTTP and WebSocket front end for Linkdrop.
//!
//! - `POST /api/links` stores a link and pushes it to the target device
//! - `POST /api/devices`, `GET /api/devices` manage a user's devices
//! - `GET /ws?device_id=<n>` opens the delivery session for one device
//! - `GET /health` reports liveness
//!
//! Every route except `/health` needs a token, sent as
//! `Authorization: Bearer <token>` or `?token=<token>`.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod storage;

pub use config::Config;
pub use handlers::{build_router, run_server, serve, AppState};
pub use storage::SqliteStorage;
