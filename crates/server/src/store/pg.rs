use std::collections::HashMap;

use async_trait::async_trait;
use biportal_schedule::{DispatchState, Frequency, ReportTarget, ScheduleSpec, Subscription};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    DeliveryLog, DeliveryStatus, NewDeliveryLog, Recipient, StoreError, StoredCredentials,
    SubscriptionDetail, SubscriptionInput, SubscriptionStore,
};

const SUBSCRIPTION_COLUMNS: &str = "id, company_id, name, workspace_id, report_id, export_format, \
     frequency, time_of_day, days_of_week, day_of_month, interval_hours, \
     is_active, last_sent_at, created_at, updated_at";

// ── Rows ─────────────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    company_id: Uuid,
    name: String,
    workspace_id: String,
    report_id: String,
    export_format: String,
    frequency: String,
    time_of_day: Option<String>,
    days_of_week: Vec<i32>,
    day_of_month: Option<i32>,
    interval_hours: Option<i32>,
    is_active: bool,
    last_sent_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SubscriptionRow {
    /// Stored values that do not fit the schedule types are dropped rather
    /// than rejected, so a bad row is simply never due.
    fn into_subscription(self) -> (Subscription, DateTime<Utc>, DateTime<Utc>) {
        let spec = ScheduleSpec {
            frequency: Frequency::parse_lenient(&self.frequency),
            time_of_day: self.time_of_day.and_then(|t| t.parse().ok()),
            days_of_week: self
                .days_of_week
                .into_iter()
                .filter_map(|d| u8::try_from(d).ok())
                .collect(),
            day_of_month: self.day_of_month.and_then(|d| u32::try_from(d).ok()),
            interval_hours: self.interval_hours.and_then(|h| u32::try_from(h).ok()),
        };
        let subscription = Subscription {
            id: self.id,
            company_id: self.company_id,
            name: self.name,
            spec,
            state: DispatchState {
                last_fired_at: self.last_sent_at,
                is_active: self.is_active,
            },
            report: ReportTarget {
                workspace_id: self.workspace_id,
                report_id: self.report_id,
                export_format: self.export_format,
            },
        };
        (subscription, self.created_at, self.updated_at)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecipientRow {
    subscription_id: Uuid,
    email: String,
    is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryLogRow {
    id: Uuid,
    subscription_id: Uuid,
    status: String,
    error_message: Option<String>,
    recipient_count: i32,
    file_size_bytes: Option<i64>,
    duration_ms: i64,
    created_at: DateTime<Utc>,
}

impl From<DeliveryLogRow> for DeliveryLog {
    fn from(row: DeliveryLogRow) -> Self {
        Self {
            id: row.id,
            subscription_id: row.subscription_id,
            status: DeliveryStatus::parse(&row.status),
            error_message: row.error_message,
            recipient_count: u32::try_from(row.recipient_count).unwrap_or(0),
            file_size_bytes: row.file_size_bytes.and_then(|s| u64::try_from(s).ok()),
            duration_ms: u64::try_from(row.duration_ms).unwrap_or(0),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialsRow {
    company_id: Uuid,
    tenant_id: String,
    client_id: String,
    client_secret_encrypted: String,
    updated_at: DateTime<Utc>,
}

/// Column values for an input spec, in bind order.
struct SpecColumns {
    frequency: &'static str,
    time_of_day: Option<String>,
    days_of_week: Vec<i32>,
    day_of_month: Option<i32>,
    interval_hours: Option<i32>,
}

impl SpecColumns {
    fn from_spec(spec: &ScheduleSpec) -> Self {
        Self {
            frequency: spec.frequency.as_str(),
            time_of_day: spec.time_of_day.map(|t| t.to_string()),
            days_of_week: spec.days_of_week.iter().map(|d| i32::from(*d)).collect(),
            day_of_month: spec.day_of_month.and_then(|d| i32::try_from(d).ok()),
            interval_hours: spec.interval_hours.and_then(|h| i32::try_from(h).ok()),
        }
    }
}

fn map_company_fk(e: sqlx::Error, company_id: Uuid) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StoreError::UnknownCompany(company_id)
        }
        _ => StoreError::Database(e),
    }
}

// ── Store ────────────────────────────────────────────────────────

/// PostgreSQL-backed store over the `report_subscriptions` schema.
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn recipients_for(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Recipient>>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, RecipientRow>(
            r#"SELECT subscription_id, email, is_active
               FROM subscription_recipients
               WHERE subscription_id = ANY($1)
               ORDER BY created_at, email"#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Recipient>> = HashMap::new();
        for row in rows {
            grouped.entry(row.subscription_id).or_default().push(Recipient {
                email: row.email,
                is_active: row.is_active,
            });
        }
        Ok(grouped)
    }

    async fn with_recipients(&self, rows: Vec<SubscriptionRow>) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut recipients = self.recipients_for(&ids).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let (subscription, created_at, updated_at) = row.into_subscription();
                SubscriptionDetail {
                    recipients: recipients.remove(&subscription.id).unwrap_or_default(),
                    subscription,
                    created_at,
                    updated_at,
                }
            })
            .collect())
    }

    async fn replace_recipients(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        id: Uuid,
        emails: &[String],
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM subscription_recipients WHERE subscription_id = $1")
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if emails.is_empty() {
            return Ok(());
        }
        sqlx::query(
            r#"INSERT INTO subscription_recipients (subscription_id, email)
               SELECT $1, e FROM UNNEST($2::text[]) AS e
               ON CONFLICT (subscription_id, email) DO NOTHING"#,
        )
        .bind(id)
        .bind(emails)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM report_subscriptions \
             WHERE is_active = TRUE ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.into_subscription().0).collect())
    }

    async fn list(&self, company_id: Option<Uuid>) -> Result<Vec<SubscriptionDetail>, StoreError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM report_subscriptions \
             WHERE ($1::uuid IS NULL OR company_id = $1) ORDER BY created_at DESC"
        ))
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        self.with_recipients(rows).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<SubscriptionDetail>, StoreError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM report_subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(self.with_recipients(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create(&self, input: &SubscriptionInput) -> Result<SubscriptionDetail, StoreError> {
        let cols = SpecColumns::from_spec(&input.spec);
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, SubscriptionRow>(&format!(
            r#"INSERT INTO report_subscriptions
                   (company_id, name, workspace_id, report_id, export_format,
                    frequency, time_of_day, days_of_week, day_of_month, interval_hours, is_active)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
               RETURNING {SUBSCRIPTION_COLUMNS}"#
        ))
        .bind(input.company_id)
        .bind(&input.name)
        .bind(&input.report.workspace_id)
        .bind(&input.report.report_id)
        .bind(&input.report.export_format)
        .bind(cols.frequency)
        .bind(cols.time_of_day)
        .bind(cols.days_of_week)
        .bind(cols.day_of_month)
        .bind(cols.interval_hours)
        .bind(input.is_active)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_company_fk(e, input.company_id))?;

        Self::replace_recipients(&mut tx, row.id, &input.recipients).await?;
        tx.commit().await?;

        let id = row.id;
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::Unavailable(format!("subscription {id} vanished after insert")))
    }

    async fn replace(
        &self,
        id: Uuid,
        input: &SubscriptionInput,
    ) -> Result<Option<SubscriptionDetail>, StoreError> {
        let cols = SpecColumns::from_spec(&input.spec);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"UPDATE report_subscriptions
               SET company_id = $2, name = $3, workspace_id = $4, report_id = $5,
                   export_format = $6, frequency = $7, time_of_day = $8,
                   days_of_week = $9, day_of_month = $10, interval_hours = $11,
                   is_active = $12, updated_at = now()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(input.company_id)
        .bind(&input.name)
        .bind(&input.report.workspace_id)
        .bind(&input.report.report_id)
        .bind(&input.report.export_format)
        .bind(cols.frequency)
        .bind(cols.time_of_day)
        .bind(cols.days_of_week)
        .bind(cols.day_of_month)
        .bind(cols.interval_hours)
        .bind(input.is_active)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_company_fk(e, input.company_id))?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        Self::replace_recipients(&mut tx, id, &input.recipients).await?;
        tx.commit().await?;
        self.get(id).await
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Option<SubscriptionDetail>, StoreError> {
        let updated = sqlx::query(
            "UPDATE report_subscriptions SET is_active = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(active)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM report_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE report_subscriptions SET last_sent_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_delivery(&self, log: &NewDeliveryLog) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO delivery_logs
                   (subscription_id, status, error_message, recipient_count, file_size_bytes, duration_ms)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(log.subscription_id)
        .bind(log.status.as_str())
        .bind(&log.error_message)
        .bind(i32::try_from(log.recipient_count).unwrap_or(i32::MAX))
        .bind(log.file_size_bytes.and_then(|s| i64::try_from(s).ok()))
        .bind(i64::try_from(log.duration_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delivery_logs(&self, id: Uuid, limit: u32) -> Result<Vec<DeliveryLog>, StoreError> {
        let rows = sqlx::query_as::<_, DeliveryLogRow>(
            r#"SELECT id, subscription_id, status, error_message, recipient_count,
                      file_size_bytes, duration_ms, created_at
               FROM delivery_logs
               WHERE subscription_id = $1
               ORDER BY created_at DESC
               LIMIT $2"#,
        )
        .bind(id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DeliveryLog::from).collect())
    }

    async fn company_name(&self, company_id: Uuid) -> Result<Option<String>, StoreError> {
        let name = sqlx::query_scalar::<_, String>("SELECT name FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(name)
    }

    async fn save_credentials(&self, credentials: &StoredCredentials) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO powerbi_credentials
                   (company_id, tenant_id, client_id, client_secret_encrypted, updated_at)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (company_id) DO UPDATE
               SET tenant_id = EXCLUDED.tenant_id,
                   client_id = EXCLUDED.client_id,
                   client_secret_encrypted = EXCLUDED.client_secret_encrypted,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(credentials.company_id)
        .bind(&credentials.tenant_id)
        .bind(&credentials.client_id)
        .bind(&credentials.client_secret_encrypted)
        .bind(credentials.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_company_fk(e, credentials.company_id))?;
        Ok(())
    }

    async fn credentials(&self, company_id: Uuid) -> Result<Option<StoredCredentials>, StoreError> {
        let row = sqlx::query_as::<_, CredentialsRow>(
            r#"SELECT company_id, tenant_id, client_id, client_secret_encrypted, updated_at
               FROM powerbi_credentials WHERE company_id = $1"#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| StoredCredentials {
            company_id: r.company_id,
            tenant_id: r.tenant_id,
            client_id: r.client_id,
            client_secret_encrypted: r.client_secret_encrypted,
            updated_at: r.updated_at,
        }))
    }
}
