mod auth;
mod server;

pub use auth::AuthConfig;
pub use server::ServerConfig;
