//! Schema module
//!
//! Request and response bodies, validated with `validator` before they
//! reach the services.

pub mod admin;
pub mod generate;
pub mod otp;

pub use admin::{
    CloudinaryResourcesQuery, LoginRequest, PageQuery, SignatureQuery, StatsQuery, UploadResponse,
};
pub use generate::GenerateRequest;
pub use otp::{SendOtpRequest, SendOtpResponse, VerifyOtpRequest, VerifyOtpResponse};
