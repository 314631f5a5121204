//! Bootstrap port - ログと consumer group の冪等な初期化

use async_trait::async_trait;
use tracing::info;

use crate::domain::QueueError;

#[async_trait]
pub trait Bootstrap: Send + Sync {
    /// Create the live log and its consumer group.
    ///
    /// Adapters report an existing group as `QueueError::SetupConflict`.
    async fn create_group(&self) -> Result<(), QueueError>;

    /// Idempotent setup: an existing group counts as success.
    async fn ensure_group(&self) -> Result<(), QueueError> {
        match self.create_group().await {
            Ok(()) => Ok(()),
            Err(QueueError::SetupConflict { stream, group }) => {
                info!(%stream, %group, "consumer group already exists, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
