mod admin;
pub mod dto;
mod groups;
mod knowledge;
pub mod response;
mod router;
pub mod validation;

pub use router::{AppState, create_router};
