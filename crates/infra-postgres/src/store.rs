// Job store: every SQL statement the engine issues
//
// Table names are qualified with a schema that passed
// `validate_schema_name`, so format! interpolation is safe.

use crate::error::map_sqlx_error;
use chrono::{DateTime, Utc};
use queue_sdk_core::domain::{JobInfo, JobOptions, JobState, QueueInfo};
use queue_sdk_core::port::EngineError;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::warn;

/// Expiration applied when a job does not set one (15 minutes)
pub const DEFAULT_EXPIRE_IN_SECONDS: i32 = 900;

const JOB_COLUMNS: &str = "id, name, data, state, priority, retry_limit, retry_count, \
    retry_delay_ms, retry_backoff, singleton_key, created_on, started_on, completed_on, output";

/// Recorded schedule row
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub name: String,
    /// '' for the queue's default schedule
    pub key: String,
    pub cron: String,
    pub data: serde_json::Value,
    pub options: JobOptions,
    pub last_run_on: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

/// New job as written by `insert_job`
pub struct NewJob<'a> {
    pub id: &'a str,
    pub queue: &'a str,
    pub data: &'a serde_json::Value,
    pub options: &'a JobOptions,
}

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
    schema: String,
}

impl JobStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.schema, name)
    }

    pub async fn create_queue(&self, queue: &str) -> Result<(), EngineError> {
        sqlx::query(&format!(
            "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
            self.table("queue")
        ))
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Insert a job. `None` when a singleton with the same key is unfinished.
    pub async fn insert_job(&self, job: NewJob<'_>) -> Result<Option<String>, EngineError> {
        let options = job.options;
        let start_after_secs = options.start_after_seconds.unwrap_or(0) as f64;
        let expire_in = options
            .expire_in_seconds
            .and_then(|secs| i32::try_from(secs).ok())
            .unwrap_or(DEFAULT_EXPIRE_IN_SECONDS);

        let id: Option<String> = sqlx::query_scalar(&format!(
            r#"
            INSERT INTO {} (
                id, name, data, priority, retry_limit, retry_delay_ms, retry_backoff,
                singleton_key, expire_in_seconds, start_after
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now() + make_interval(secs => $10))
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
            self.table("job")
        ))
        .bind(job.id)
        .bind(job.queue)
        .bind(job.data)
        .bind(options.priority.unwrap_or(0))
        .bind(to_i32(options.retry_limit.unwrap_or(0)))
        .bind(to_i64(options.retry_delay.unwrap_or(0)))
        .bind(options.retry_backoff.unwrap_or(false))
        .bind(options.singleton_key.as_deref())
        .bind(expire_in)
        .bind(start_after_secs)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(id)
    }

    /// Claim up to `limit` waiting jobs. Rows locked by other fetchers are skipped.
    pub async fn fetch_jobs(&self, queue: &str, limit: u32) -> Result<Vec<JobInfo>, EngineError> {
        let job = self.table("job");
        let rows = sqlx::query(&format!(
            r#"
            WITH next AS (
                SELECT id FROM {job}
                WHERE name = $1
                  AND state IN ('created', 'retry')
                  AND start_after <= now()
                ORDER BY priority DESC, created_on, id
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE {job} j SET
                state = 'active',
                started_on = now()
            FROM next
            WHERE j.id = next.id
            RETURNING {columns}
            "#,
            job = job,
            columns = prefixed_columns("j"),
        ))
        .bind(queue)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter().map(job_from_row).collect()
    }

    /// Worker success
    pub async fn mark_completed(&self, queue: &str, id: &str) -> Result<bool, EngineError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET state = 'completed', completed_on = now()
            WHERE name = $1 AND id = $2 AND state = 'active'
            "#,
            self.table("job")
        ))
        .bind(queue)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Worker failure: back to `retry` while attempts remain, else `failed`.
    /// The retry delay doubles per attempt when backoff is enabled.
    pub async fn mark_failed(
        &self,
        queue: &str,
        id: &str,
        error: &str,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET {}
            WHERE name = $1 AND id = $2 AND state = 'active'
            "#,
            self.table("job"),
            FAILURE_ASSIGNMENTS
        ))
        .bind(queue)
        .bind(id)
        .bind(serde_json::json!({ "message": error }))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Fail active jobs that outlived their expiration
    pub async fn expire_jobs(&self) -> Result<u64, EngineError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET {}
            WHERE state = 'active'
              AND started_on + make_interval(secs => expire_in_seconds) < now()
            "#,
            self.table("job"),
            FAILURE_ASSIGNMENTS.replace("$3", "'{\"message\": \"job expired\"}'::jsonb")
        ))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Out-of-band transition of an unfinished job
    pub async fn transition(
        &self,
        queue: &str,
        id: &str,
        target: JobState,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET state = $3, completed_on = now()
            WHERE name = $1 AND id = $2 AND state IN ('created', 'retry', 'active')
            "#,
            self.table("job")
        ))
        .bind(queue)
        .bind(id)
        .bind(target.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_job(&self, queue: &str, id: &str) -> Result<Option<JobInfo>, EngineError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE name = $1 AND id = $2",
            JOB_COLUMNS,
            self.table("job")
        ))
        .bind(queue)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn list_queues(&self) -> Result<Vec<QueueInfo>, EngineError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT q.name, q.created_on,
                COUNT(j.id) FILTER (WHERE j.state IN ('created', 'retry')) AS queued_count,
                COUNT(j.id) FILTER (WHERE j.state = 'active') AS active_count,
                COUNT(j.id) AS total_count
            FROM {} q
            LEFT JOIN {} j ON j.name = q.name
            GROUP BY q.name, q.created_on
            ORDER BY q.name
            "#,
            self.table("queue"),
            self.table("job")
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(QueueInfo {
                    name: row.try_get("name").map_err(map_sqlx_error)?,
                    created_on: row.try_get("created_on").map_err(map_sqlx_error)?,
                    queued_count: count(row, "queued_count")?,
                    active_count: count(row, "active_count")?,
                    total_count: count(row, "total_count")?,
                })
            })
            .collect()
    }

    /// Insert or replace the schedule `(queue, key)`. A changed cron
    /// expression restarts the schedule from now.
    pub async fn upsert_schedule(
        &self,
        queue: &str,
        key: &str,
        cron: &str,
        timezone: &str,
        data: &serde_json::Value,
        options: &JobOptions,
    ) -> Result<(), EngineError> {
        let options = serde_json::to_value(options)
            .map_err(|e| EngineError::Validation(format!("Invalid schedule options: {}", e)))?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} AS s (name, key, cron, timezone, data, options)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name, key) DO UPDATE SET
                cron = EXCLUDED.cron,
                timezone = EXCLUDED.timezone,
                data = EXCLUDED.data,
                options = EXCLUDED.options,
                last_run_on = CASE WHEN s.cron IS DISTINCT FROM EXCLUDED.cron
                    THEN now() ELSE s.last_run_on END,
                updated_on = now()
            "#,
            self.table("schedule")
        ))
        .bind(queue)
        .bind(key)
        .bind(cron)
        .bind(timezone)
        .bind(data)
        .bind(options)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRow>, EngineError> {
        let rows = sqlx::query(&format!(
            "SELECT name, key, cron, data, options, last_run_on, created_on FROM {} \
             ORDER BY name, key",
            self.table("schedule")
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                let name: String = row.try_get("name").map_err(map_sqlx_error)?;
                let options = decode_schedule_options(
                    &name,
                    row.try_get("options").map_err(map_sqlx_error)?,
                );
                Ok(ScheduleRow {
                    key: row.try_get("key").map_err(map_sqlx_error)?,
                    cron: row.try_get("cron").map_err(map_sqlx_error)?,
                    data: row.try_get("data").map_err(map_sqlx_error)?,
                    options,
                    last_run_on: row.try_get("last_run_on").map_err(map_sqlx_error)?,
                    created_on: row.try_get("created_on").map_err(map_sqlx_error)?,
                    name,
                })
            })
            .collect()
    }

    /// Record a firing. Only one process wins for a given previous run.
    pub async fn claim_schedule_run(
        &self,
        queue: &str,
        key: &str,
        previous: Option<DateTime<Utc>>,
        fired_at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let result = sqlx::query(&format!(
            r#"
            UPDATE {} SET last_run_on = $4
            WHERE name = $1 AND key = $2 AND last_run_on IS NOT DISTINCT FROM $3
            "#,
            self.table("schedule")
        ))
        .bind(queue)
        .bind(key)
        .bind(previous)
        .bind(fired_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}

/// Stored options that no longer deserialize fall back to the defaults
fn decode_schedule_options(queue: &str, options: serde_json::Value) -> JobOptions {
    match serde_json::from_value(options) {
        Ok(options) => options,
        Err(e) => {
            warn!(queue = %queue, error = %e, "Ignoring unreadable schedule options");
            JobOptions::default()
        }
    }
}

/// SET clause shared by worker failures and expiration; `$3` is the output
const FAILURE_ASSIGNMENTS: &str = r#"
    state = CASE WHEN retry_count < retry_limit THEN 'retry' ELSE 'failed' END,
    start_after = CASE WHEN retry_count < retry_limit
        THEN now() + make_interval(secs => (
            CASE WHEN retry_backoff THEN retry_delay_ms * power(2, retry_count)
            ELSE retry_delay_ms END
        ) / 1000.0)
        ELSE start_after END,
    retry_count = CASE WHEN retry_count < retry_limit THEN retry_count + 1 ELSE retry_count END,
    completed_on = CASE WHEN retry_count < retry_limit THEN NULL ELSE now() END,
    output = $3
"#;

fn prefixed_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(',')
        .map(|column| format!("{}.{}", alias, column.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count(row: &PgRow, column: &str) -> Result<u64, EngineError> {
    let value: i64 = row.try_get(column).map_err(map_sqlx_error)?;
    Ok(u64::try_from(value).unwrap_or(0))
}

fn job_from_row(row: &PgRow) -> Result<JobInfo, EngineError> {
    let state: String = row.try_get("state").map_err(map_sqlx_error)?;
    let state = state
        .parse::<JobState>()
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    let retry_limit: i32 = row.try_get("retry_limit").map_err(map_sqlx_error)?;
    let retry_count: i32 = row.try_get("retry_count").map_err(map_sqlx_error)?;
    let retry_delay_ms: i64 = row.try_get("retry_delay_ms").map_err(map_sqlx_error)?;

    Ok(JobInfo {
        id: row.try_get("id").map_err(map_sqlx_error)?,
        name: row.try_get("name").map_err(map_sqlx_error)?,
        data: row.try_get("data").map_err(map_sqlx_error)?,
        state,
        priority: row.try_get("priority").map_err(map_sqlx_error)?,
        retry_limit: u32::try_from(retry_limit).unwrap_or(0),
        retry_count: u32::try_from(retry_count).unwrap_or(0),
        retry_delay_ms: u64::try_from(retry_delay_ms).unwrap_or(0),
        retry_backoff: row.try_get("retry_backoff").map_err(map_sqlx_error)?,
        singleton_key: row.try_get("singleton_key").map_err(map_sqlx_error)?,
        created_on: row.try_get("created_on").map_err(map_sqlx_error)?,
        started_on: row.try_get("started_on").map_err(map_sqlx_error)?,
        completed_on: row.try_get("completed_on").map_err(map_sqlx_error)?,
        output: row.try_get("output").map_err(map_sqlx_error)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_options_decoding() {
        let options = decode_schedule_options(
            "maintenance-queue",
            serde_json::json!({"retryLimit": 2, "priority": 1}),
        );
        assert_eq!(options.retry_limit, Some(2));
        assert_eq!(options.priority, Some(1));

        let corrupt = decode_schedule_options(
            "maintenance-queue",
            serde_json::json!({"retryLimit": "three"}),
        );
        assert_eq!(corrupt, JobOptions::default());
    }

    #[test]
    fn test_prefixed_columns() {
        let columns = prefixed_columns("j");
        assert!(columns.starts_with("j.id, j.name, j.data"));
        assert!(columns.ends_with("j.output"));
        assert!(!columns.contains("j. "));
    }

    #[test]
    fn test_failure_assignments_reference_output_param() {
        assert!(FAILURE_ASSIGNMENTS.contains("output = $3"));
        let expired = FAILURE_ASSIGNMENTS.replace("$3", "'{}'::jsonb");
        assert!(!expired.contains('$'));
    }

    #[test]
    fn test_numeric_conversions_saturate() {
        assert_eq!(to_i32(u32::MAX), i32::MAX);
        assert_eq!(to_i64(42), 42);
    }
}
