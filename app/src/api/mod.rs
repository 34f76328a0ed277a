pub mod capture;
pub mod error;
pub mod pointclouds;
pub mod routes;
pub mod server;
pub mod state;
pub mod stream;

pub use server::run_server;
pub use state::AppState;
