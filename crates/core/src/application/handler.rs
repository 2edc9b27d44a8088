// Job handler abstraction

use crate::port::HandlerError;
use async_trait::async_trait;
use std::future::Future;

/// User code run for each delivered job payload.
///
/// Any `Fn(Value) -> Future<Output = Result<(), HandlerError>>` closure
/// implements it, so most callers never name the trait.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, payload: serde_json::Value) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, payload: serde_json::Value) -> Result<(), HandlerError> {
        (self)(payload).await
    }
}
