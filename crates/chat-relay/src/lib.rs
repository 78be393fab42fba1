pub mod app;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use app::{bind_listener, build_router};
pub use state::AppState;
