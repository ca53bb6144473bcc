use std::time::Duration;

use biportal_core::config::PowerBiConfig;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::PowerBiError;
use crate::types::{ExportFormat, ExportJob, ExportStatus, ExportedFile, PowerBiCredentials, TokenResponse};

/// Thin client over the Power BI export-to-file API.
pub struct PowerBiClient {
    client: reqwest::Client,
    api_base: String,
    authority: String,
    scope: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl PowerBiClient {
    pub fn new(config: &PowerBiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            authority: config.authority.trim_end_matches('/').to_string(),
            scope: config.scope.clone(),
            poll_interval: Duration::from_secs(u64::from(config.poll_interval_secs)),
            max_poll_attempts: config.max_poll_attempts.max(1),
        }
    }

    /// Acquire an app-only access token for the service principal.
    pub async fn access_token(&self, credentials: &PowerBiCredentials) -> Result<String, PowerBiError> {
        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, credentials.tenant_id);
        debug!(tenant_id = %credentials.tenant_id, "requesting Power BI token");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await?;

        let response = check_status(response).await?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PowerBiError::Parse(format!("token response: {e}")))?;
        Ok(token.access_token)
    }

    /// Start an `ExportTo` job for a report.
    pub async fn start_export(
        &self,
        token: &str,
        workspace_id: &str,
        report_id: &str,
        format: ExportFormat,
    ) -> Result<ExportJob, PowerBiError> {
        let url = format!(
            "{}/groups/{}/reports/{}/ExportTo",
            self.api_base, workspace_id, report_id
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "format": format.as_str() }))
            .send()
            .await?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PowerBiError::Parse(format!("export job: {e}")))
    }

    /// Fetch the current state of an export job.
    pub async fn export_status(
        &self,
        token: &str,
        workspace_id: &str,
        report_id: &str,
        export_id: &str,
    ) -> Result<ExportJob, PowerBiError> {
        let url = format!(
            "{}/groups/{}/reports/{}/exports/{}",
            self.api_base, workspace_id, report_id, export_id
        );
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PowerBiError::Parse(format!("export status: {e}")))
    }

    /// Download the file of a succeeded export job.
    pub async fn download_export(
        &self,
        token: &str,
        workspace_id: &str,
        report_id: &str,
        export_id: &str,
    ) -> Result<Vec<u8>, PowerBiError> {
        let url = format!(
            "{}/groups/{}/reports/{}/exports/{}/file",
            self.api_base, workspace_id, report_id, export_id
        );
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Render a report to a file: authenticate, start the export, poll until it
    /// finishes (bounded by the configured attempt ceiling), then download.
    pub async fn export_report(
        &self,
        credentials: &PowerBiCredentials,
        workspace_id: &str,
        report_id: &str,
        format: ExportFormat,
    ) -> Result<ExportedFile, PowerBiError> {
        let token = self.access_token(credentials).await?;
        let mut job = self.start_export(&token, workspace_id, report_id, format).await?;
        info!(report_id, export_id = %job.id, %format, "export started");

        let mut attempts = 0;
        while !job.status.is_terminal() {
            if attempts >= self.max_poll_attempts {
                warn!(report_id, export_id = %job.id, attempts, "export polling gave up");
                return Err(PowerBiError::Timeout {
                    export_id: job.id,
                    attempts,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
            attempts += 1;
            job = self
                .export_status(&token, workspace_id, report_id, &job.id)
                .await?;
            debug!(
                export_id = %job.id,
                status = ?job.status,
                percent = job.percent_complete,
                "export status"
            );
        }

        if job.status == ExportStatus::Failed {
            return Err(PowerBiError::ExportFailed { export_id: job.id });
        }

        let bytes = self
            .download_export(&token, workspace_id, report_id, &job.id)
            .await?;
        info!(report_id, export_id = %job.id, size = bytes.len(), "export downloaded");

        Ok(ExportedFile {
            file_name: file_name_for(&job, format),
            content_type: format.content_type().to_string(),
            bytes,
        })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, PowerBiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PowerBiError::Api {
        status: status.as_u16(),
        body,
    })
}

/// `<report name>.<ext>` with characters unsafe in attachment names replaced.
fn file_name_for(job: &ExportJob, format: ExportFormat) -> String {
    let stem: String = job
        .report_name
        .as_deref()
        .unwrap_or("report")
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' || c == ' ' { c } else { '_' })
        .collect();
    let stem = stem.trim();
    let stem = if stem.is_empty() { "report" } else { stem };
    let extension = job
        .resource_file_extension
        .as_deref()
        .map(|e| e.trim_start_matches('.'))
        .filter(|e| !e.is_empty())
        .unwrap_or(format.extension());
    format!("{stem}.{extension}")
}
