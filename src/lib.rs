pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod gemini;
pub mod locale;
pub mod models;
pub mod pdf;
pub mod profiles;
pub mod prompt;
pub mod repository;
pub mod routes;
pub mod session;
pub mod store;
pub mod wire;
