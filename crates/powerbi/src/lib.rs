//! Power BI REST client for rendering reports to files.
//!
//! Authenticates as a company's service principal (OAuth2 client credentials),
//! starts an `ExportTo` job, polls it until it finishes, and downloads the
//! resulting file.

pub mod client;
pub mod error;
pub mod types;

pub use client::PowerBiClient;
pub use error::PowerBiError;
pub use types::{ExportFormat, ExportJob, ExportStatus, ExportedFile, PowerBiCredentials};
