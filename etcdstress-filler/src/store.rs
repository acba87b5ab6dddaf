//! The write capability the filler populates.

use std::fmt::Debug;
use std::sync::Arc;

/// A key-value store that accepts single writes.
///
/// Implementations are shared across all concurrently running write tasks and must not require
/// exclusive access. Connection handling, TLS and consistency are entirely the implementor's
/// concern.
#[async_trait::async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// Stores `value` under `key`, overwriting any existing value.
    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

#[async_trait::async_trait]
impl<S: Store> Store for Arc<S> {
    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).write(key, value).await
    }
}
