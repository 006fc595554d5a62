pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod spec;
pub mod state;
pub mod utils;
