pub mod admission;
pub mod config;
pub mod handlers;
pub mod models;
pub mod projections;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;
pub mod verification;
