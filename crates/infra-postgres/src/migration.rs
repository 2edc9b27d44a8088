// Migration Runner
//
// Migrations are rendered for the configured schema and applied inside one
// transaction holding an advisory lock, so concurrent starters serialize.

use crate::error::map_sqlx_error;
use queue_sdk_core::port::EngineError;
use sqlx::PgPool;
use tracing::info;

const SCHEMA_PLACEHOLDER: &str = "{schema}";

/// Ordered list of (version, description, sql)
const MIGRATIONS: &[(i32, &str, &str)] = &[
    (
        1,
        "Initial schema",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    (
        2,
        "Schedule keys",
        include_str!("../migrations/002_schedule_key.sql"),
    ),
];

/// Latest schema version this build knows about
pub const SCHEMA_VERSION: i32 = 2;

/// Schema names are interpolated into SQL, so only plain identifiers pass
pub fn validate_schema_name(schema: &str) -> Result<(), EngineError> {
    let mut chars = schema.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c == '_')
        .unwrap_or(false);
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && schema.len() <= 63 {
        Ok(())
    } else {
        Err(EngineError::Validation(format!(
            "Invalid schema name '{}': use lowercase letters, digits and underscores",
            schema
        )))
    }
}

/// Split a migration into executable statements, dropping comment lines
pub(crate) fn render_statements(sql: &str, schema: &str) -> Vec<String> {
    sql.replace(SCHEMA_PLACEHOLDER, schema)
        .split(';')
        .map(|statement| {
            statement
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_string()
        })
        .filter(|statement| !statement.is_empty())
        .collect()
}

/// Run database migrations for `schema`
pub async fn run_migrations(pool: &PgPool, schema: &str) -> Result<(), EngineError> {
    validate_schema_name(schema)?;
    info!(schema = %schema, "Running database migrations...");

    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;

    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(format!("queue-sdk:{}", schema))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {}.version (
            version INTEGER PRIMARY KEY,
            applied_on TIMESTAMPTZ NOT NULL DEFAULT now()
        )",
        schema
    ))
    .execute(&mut *tx)
    .await
    .map_err(map_sqlx_error)?;

    let current_version: i32 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(MAX(version), 0) FROM {}.version",
        schema
    ))
    .fetch_one(&mut *tx)
    .await
    .map_err(map_sqlx_error)?;

    info!(current_version, latest = SCHEMA_VERSION, "Current schema version");

    for (version, description, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }
        info!(version, description, "Applying migration");

        for statement in render_statements(sql, schema) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        sqlx::query(&format!("INSERT INTO {}.version (version) VALUES ($1)", schema))
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }

    tx.commit().await.map_err(map_sqlx_error)?;
    info!("All migrations applied successfully");
    Ok(())
}
