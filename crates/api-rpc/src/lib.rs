//! JSON-RPC Monitoring Surface
//!
//! Read-only JSON-RPC 2.0 view of a running Queue Manager: health,
//! metrics, queue listing and job lookups.

pub mod error;
pub mod handler;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
