// PostgreSQL Connection Pool Setup

use crate::error::map_sqlx_error;
use queue_sdk_core::config::{DatabaseConfig, TlsMode};
use queue_sdk_core::port::EngineError;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;
use tracing::info;

/// Build connect options from the SDK database section
pub fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
    let ssl_mode = match config.ssl_mode {
        TlsMode::Disable => PgSslMode::Disable,
        TlsMode::Prefer => PgSslMode::Prefer,
        TlsMode::Require => PgSslMode::Require,
    };

    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password)
        .application_name(config.application_name())
        .ssl_mode(ssl_mode)
}

/// Create the connection pool and check that the server answers
pub async fn create_pool(
    config: &DatabaseConfig,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, EngineError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_with(connect_options(config))
        .await
        .map_err(map_sqlx_error)?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        max_connections,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 6543,
            database: "jobs".to_string(),
            user: "worker".to_string(),
            password: "secret".to_string(),
            ssl_mode: TlsMode::Require,
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_options_follow_config() {
        let options = connect_options(&database());
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("jobs"));
        assert_eq!(options.get_username(), "worker");
        assert_eq!(options.get_application_name(), Some("queue-sdk"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Require));
    }

    #[test]
    fn test_custom_application_name() {
        let mut config = database();
        config.application_name = Some("billing".to_string());
        config.ssl_mode = TlsMode::Disable;

        let options = connect_options(&config);
        assert_eq!(options.get_application_name(), Some("billing"));
        assert!(matches!(options.get_ssl_mode(), PgSslMode::Disable));
    }
}
