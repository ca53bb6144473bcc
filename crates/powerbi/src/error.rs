/// Errors returned by the Power BI client.
#[derive(Debug, thiserror::Error)]
pub enum PowerBiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("export {export_id} failed")]
    ExportFailed { export_id: String },

    #[error("export {export_id} did not finish after {attempts} polls")]
    Timeout { export_id: String, attempts: u32 },
}
