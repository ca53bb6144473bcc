//! Minijinja template rendering for report emails.
//!
//! Renders the subject and body of a scheduled report email from the
//! subscription and export metadata. Templates are arbitrary strings (not
//! pre-registered), so a fresh [`minijinja::Environment`] is created per
//! render call.

use minijinja::AutoEscape;

use crate::traits::NotifyError;

/// Subject used when a subscription has no custom subject template.
pub const DEFAULT_SUBJECT_TEMPLATE: &str =
    "{{ subscription.name }}: {{ report.name }} ({{ generated_date }})";

/// Body used when a subscription has no custom body template.
pub const DEFAULT_BODY_TEMPLATE: &str = r#"<p>Hello,</p>
<p>Attached is the latest <strong>{{ report.name }}</strong> report{% if company %} for {{ company }}{% endif %}, generated {{ generated_at }} UTC.</p>
<p>File: {{ report.file_name }} ({{ report.size_bytes | filesize }})</p>
<p style="color:#888">You receive this email as a recipient of the {{ subscription.frequency }} subscription "{{ subscription.name }}".</p>"#;

/// Context data available to report email templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportEmailContext {
    pub subscription: SubscriptionContext,
    pub report: ReportContext,
    /// Owning company name, if known.
    pub company: Option<String>,
    /// Export completion time, `YYYY-MM-DD HH:MM`.
    pub generated_at: String,
    /// Export completion date, `YYYY-MM-DD`.
    pub generated_date: String,
}

/// Subscription metadata exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionContext {
    pub id: String,
    pub name: String,
    /// `once`, `daily`, `weekly`, `monthly` or `interval`.
    pub frequency: String,
}

/// Exported file metadata exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReportContext {
    pub name: String,
    pub file_name: String,
    pub format: String,
    pub size_bytes: u64,
}

/// Renders report email templates using minijinja.
#[derive(Debug)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn build_env(escape: AutoEscape) -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.set_auto_escape_callback(move |_| escape);
        env.add_filter("filesize", filesize_filter);
        env
    }

    /// Render a plain-text template (subject lines).
    pub fn render(&self, template_str: &str, ctx: &ReportEmailContext) -> Result<String, NotifyError> {
        Self::build_env(AutoEscape::None)
            .render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Render an HTML template; interpolated values are HTML-escaped.
    pub fn render_html(&self, template_str: &str, ctx: &ReportEmailContext) -> Result<String, NotifyError> {
        Self::build_env(AutoEscape::Html)
            .render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable byte count: `512 B`, `12.3 KB`, `4.0 MB`.
fn filesize_filter(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> ReportEmailContext {
        ReportEmailContext {
            subscription: SubscriptionContext {
                id: "6f1c".to_string(),
                name: "Monday sales".to_string(),
                frequency: "weekly".to_string(),
            },
            report: ReportContext {
                name: "Sales & Margin".to_string(),
                file_name: "Sales & Margin.pdf".to_string(),
                format: "PDF".to_string(),
                size_bytes: 12_595,
            },
            company: Some("Acme".to_string()),
            generated_at: "2025-06-02 08:03".to_string(),
            generated_date: "2025-06-02".to_string(),
        }
    }

    #[test]
    fn default_subject_renders() {
        let renderer = TemplateRenderer::new();
        let subject = renderer
            .render(DEFAULT_SUBJECT_TEMPLATE, &sample_context())
            .unwrap();
        assert_eq!(subject, "Monday sales: Sales & Margin (2025-06-02)");
    }

    #[test]
    fn default_body_escapes_and_formats_size() {
        let renderer = TemplateRenderer::new();
        let body = renderer
            .render_html(DEFAULT_BODY_TEMPLATE, &sample_context())
            .unwrap();
        assert!(body.contains("<strong>Sales &amp; Margin</strong>"), "got: {body}");
        assert!(body.contains(" for Acme,"));
        assert!(body.contains("(12.3 KB)"));
        assert!(body.contains("weekly subscription"));
    }

    #[test]
    fn body_without_company_omits_clause() {
        let renderer = TemplateRenderer::new();
        let mut ctx = sample_context();
        ctx.company = None;
        let body = renderer.render_html(DEFAULT_BODY_TEMPLATE, &ctx).unwrap();
        assert!(body.contains("report, generated"), "got: {body}");
    }

    #[test]
    fn filesize_units() {
        assert_eq!(filesize_filter(512), "512 B");
        assert_eq!(filesize_filter(2048), "2.0 KB");
        assert_eq!(filesize_filter(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn invalid_template_produces_error() {
        let renderer = TemplateRenderer::new();
        match renderer.render("{{ unclosed", &sample_context()) {
            Err(NotifyError::Template(msg)) => assert!(!msg.is_empty()),
            other => panic!("Expected Template error, got: {:?}", other),
        }
    }
}
