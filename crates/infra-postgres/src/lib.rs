// Queue SDK Infrastructure - PostgreSQL Adapter
// Implements: QueueEngine (send/fetch with SKIP LOCKED, retries, expiry, cron schedules)

mod connection;
mod cron;
mod engine;
mod error;
mod migration;
mod store;
mod worker;

pub use connection::{connect_options, create_pool};
pub use cron::{due_run, next_occurrence, parse_cron, validate_timezone};
pub use engine::{EngineOptions, PgQueueEngine};
pub use migration::{run_migrations, validate_schema_name, SCHEMA_VERSION};
pub use store::{JobStore, DEFAULT_EXPIRE_IN_SECONDS};
