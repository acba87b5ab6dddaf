//! Removal of data left behind by previous runs.

use anyhow::{Context, Result};

use crate::etcd::EtcdClient;

/// Recursively deletes everything under `prefix`.
///
/// A missing prefix means there is nothing to purge and is not an error.
pub async fn purge(client: &EtcdClient, prefix: &str) -> Result<()> {
    anyhow::ensure!(
        !prefix.trim_matches('/').is_empty(),
        "refusing to purge the root of the key space"
    );

    match client.delete(prefix, true).await {
        Ok(()) => {
            tracing::info!(prefix, "purged existing data");
            Ok(())
        }
        Err(err) if err.is_key_not_found() => {
            tracing::info!(prefix, "no data to purge");
            Ok(())
        }
        Err(err) => Err(err).with_context(|| format!("failed to purge `{prefix}`")),
    }
}
