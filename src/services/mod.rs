//! Services module
//!
//! Contains business logic and external service integrations.

pub mod clipdrop;
pub mod cloudinary;
pub mod dashboard;
pub mod fal;
pub mod images;
pub mod mailer;
pub mod otp;
pub mod pipeline;

pub use clipdrop::{ClipdropClient, ClipdropError};
pub use cloudinary::{
    CloudinaryClient, CloudinaryError, CloudinaryResource, SearchPage, SignedUpload, UploadSource,
    UploadedAsset,
};
pub use dashboard::{CountSummary, DailyCount, DashboardService, DashboardStats, DateRange};
pub use fal::{FalClient, FalError};
pub use images::{ImageBytes, ImageError, ImageFetcher};
pub use mailer::{BrevoMailer, EmailMessage, LogMailer, MailError, Mailer};
pub use otp::{IssuedOtp, OtpError, OtpService};
pub use pipeline::{PipelineError, PostcardPipeline, PostcardRequest, PostcardResult, StageOutcome, StageReport};
