mod access;
mod models;

pub use access::{AccessControl, AccessGrants, Action};
pub use models::*;
