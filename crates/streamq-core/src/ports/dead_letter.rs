use async_trait::async_trait;

use crate::domain::{DeadLetter, QueueError};

/// Read access to the dead-letter log.
#[async_trait]
pub trait DeadLetterLog: Send + Sync {
    /// Newest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError>;
}
