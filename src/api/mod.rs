//! API endpoint handlers module
//!
//! Contains all HTTP endpoint handler implementations.

pub mod admin;
pub mod generate;
pub mod health;
pub mod otp;
pub mod upload;
