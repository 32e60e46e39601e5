//! # Warden
//!
//! Authentication and access-control core for a self-hostable knowledge
//! workspace, usable both as a standalone binary and as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! warden = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden::config::AuthConfig;
//! use warden::server::{AppState, create_router};
//! use warden::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/warden.db").unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(
//!     Arc::new(store),
//!     AuthConfig::new("signing-secret"),
//! ));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the CLI binary. Disable with `default-features = false`.

pub mod auth;
pub mod config;
pub mod error;
pub mod groups;
pub mod policy;
pub mod server;
pub mod store;
pub mod types;
