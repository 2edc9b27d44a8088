// Queue SDK Core - Queue Manager, Domain Model & Ports
// NO infrastructure dependencies: engines plug in through port::QueueEngine

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;
mod sync;

pub use application::{JobHandler, QueueManager, QueueManagerBuilder, WorkerRegistry};
pub use config::{ConfigLoader, QueueSdkConfig};
pub use error::{QueueError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
