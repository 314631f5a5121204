//! One lazily opened resource per consumer identity.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::Mutex;

pub(crate) struct PerConsumer<T> {
    slots: Mutex<HashMap<String, T>>,
}

impl<T> Default for PerConsumer<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T: Clone> PerConsumer<T> {
    /// The value for `consumer`, created by `init` on first use. A failed `init`
    /// stores nothing, so the next call tries again.
    pub(crate) async fn get_or_try_init<F, Fut, E>(&self, consumer: &str, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slots = self.slots.lock().await;
        if let Some(value) = slots.get(consumer) {
            return Ok(value.clone());
        }
        let value = init().await?;
        slots.insert(consumer.to_string(), value.clone());
        Ok(value)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}
