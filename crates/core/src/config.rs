use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub powerbi: PowerBiConfig,
    pub smtp: SmtpConfig,
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `BIPORTAL_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("BIPORTAL_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            powerbi: PowerBiConfig::from_env_profiled(p),
            smtp: SmtpConfig::from_env_profiled(p),
            dispatch: DispatchConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:      {}:{}", self.server.host, self.server.port);
        tracing::info!("  postgres:    host={}, db={}", self.postgres.host, self.postgres.database);
        tracing::info!(
            "  powerbi:     api={}, poll={}s x{}",
            self.powerbi.api_base,
            self.powerbi.poll_interval_secs,
            self.powerbi.max_poll_attempts
        );
        tracing::info!(
            "  smtp:        host={}, from={}",
            self.smtp.host.as_deref().unwrap_or("(none)"),
            self.smtp.from
        );
        tracing::info!(
            "  dispatch:    trigger_token={}",
            if self.dispatch.trigger_token.is_some() { "set" } else { "(none)" }
        );
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "powerbi": {
                "api_base": self.powerbi.api_base,
                "poll_interval_secs": self.powerbi.poll_interval_secs,
                "max_poll_attempts": self.powerbi.max_poll_attempts,
            },
            "smtp": {
                "host": self.smtp.host,
                "port": self.smtp.port,
                "configured": self.smtp.is_configured(),
            },
            "dispatch": { "trigger_token": self.dispatch.trigger_token.is_some() },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3001),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "biportal"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Power BI REST API ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerBiConfig {
    /// REST API root, e.g. `https://api.powerbi.com/v1.0/myorg`.
    pub api_base: String,
    /// Azure AD authority root used for the client-credentials token.
    pub authority: String,
    /// OAuth scope requested for the service principal.
    pub scope: String,
    /// Seconds between export status polls.
    pub poll_interval_secs: u32,
    /// Polls before an export is abandoned.
    pub max_poll_attempts: u32,
}

impl PowerBiConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_base: profiled_env_or(p, "POWERBI_API_BASE", "https://api.powerbi.com/v1.0/myorg"),
            authority: profiled_env_or(p, "POWERBI_AUTHORITY", "https://login.microsoftonline.com"),
            scope: profiled_env_or(
                p,
                "POWERBI_SCOPE",
                "https://analysis.windows.net/powerbi/api/.default",
            ),
            poll_interval_secs: profiled_env_u32(p, "POWERBI_POLL_INTERVAL_SECS", 5),
            max_poll_attempts: profiled_env_u32(p, "POWERBI_MAX_POLL_ATTEMPTS", 60),
        }
    }
}

impl Default for PowerBiConfig {
    fn default() -> Self {
        Self::from_env_profiled("")
    }
}

// ── SMTP (report delivery) ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `"Reports <reports@example.com>"`.
    pub from: String,
}

impl SmtpConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_opt(p, "SMTP_HOST"),
            port: profiled_env_u16(p, "SMTP_PORT", 587),
            tls: profiled_env_bool(p, "SMTP_TLS", true),
            username: profiled_env_opt(p, "SMTP_USERNAME"),
            password: profiled_env_opt(p, "SMTP_PASSWORD"),
            from: profiled_env_or(p, "SMTP_FROM", "Reports <reports@localhost>"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.host.is_some()
    }
}

// ── Dispatch ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Shared secret required on the HTTP trigger when set.
    pub trigger_token: Option<String>,
    /// Directory holding the credential encryption key file.
    pub data_dir: PathBuf,
}

impl DispatchConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            trigger_token: profiled_env_opt(p, "DISPATCH_TRIGGER_TOKEN"),
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
        }
    }
}
