#![warn(clippy::unwrap_used)]

pub mod auth;
pub mod experiment_rest;
pub mod rest;
pub mod router;
pub mod server;

pub use rest::AppState;
pub use router::build_router;
pub use server::ApiServer;
