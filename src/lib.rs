//! Festive postcard backend library
//!
//! Email OTP registration, photo upload, the AI postcard pipeline and the
//! admin dashboard API.

// Public modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod schemas;
pub mod server;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use config::Settings;
pub use error::ApiError;
pub use server::App;
