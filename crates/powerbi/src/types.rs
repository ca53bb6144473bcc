use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Service-principal credentials for one company's Power BI tenant.
#[derive(Clone, Serialize, Deserialize)]
pub struct PowerBiCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for PowerBiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerBiCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"********")
            .finish()
    }
}

/// File formats the export API can render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportFormat {
    Pdf,
    Png,
    Pptx,
}

impl ExportFormat {
    /// Value expected by the `ExportTo` request body.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "PDF",
            ExportFormat::Png => "PNG",
            ExportFormat::Pptx => "PPTX",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Png => "png",
            ExportFormat::Pptx => "pptx",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Png => "image/png",
            ExportFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PDF" => Ok(ExportFormat::Pdf),
            "PNG" => Ok(ExportFormat::Png),
            "PPTX" => Ok(ExportFormat::Pptx),
            other => Err(format!("unsupported export format: {other}")),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an export job as reported by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ExportStatus {
    Undefined,
    NotStarted,
    Running,
    Succeeded,
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Succeeded | ExportStatus::Failed)
    }
}

/// An export job returned by `ExportTo` and the status endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: String,
    pub status: ExportStatus,
    #[serde(default)]
    pub percent_complete: u8,
    #[serde(default)]
    pub report_name: Option<String>,
    #[serde(default)]
    pub resource_file_extension: Option<String>,
}

/// A rendered report file.
#[derive(Debug, Clone)]
pub struct ExportedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
}
