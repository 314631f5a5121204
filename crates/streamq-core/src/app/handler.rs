//! Handlers and the registry that dispatches to them by task type.
//!
//! Handlers must tolerate running more than once for the same task: delivery is
//! at-least-once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{HandlerError, Task};

/// Business logic for one kind of task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`TaskHandler`]. The closure receives an owned
/// snapshot of the task.
pub struct FnHandler<F> {
    f: F,
}

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        (self.f)(task.clone()).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for task type '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Registry of handlers (task_type -> handler).
///
/// - 初期化時に組み立て（mutable）
/// - 実行時は immutable に共有（ロック不要）
/// - 未登録の task_type は fallback へ。fallback もなければ `HandlerError`
///   （retry / DLQ の対象になる）
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), RegistryError> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Handler for task types nobody registered.
    pub fn set_fallback(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = Some(handler);
    }

    pub fn get(&self, task_type: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).or(self.fallback.as_ref())
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl TaskHandler for HandlerRegistry {
    async fn handle(&self, task: &Task) -> Result<(), HandlerError> {
        let handler = self.get(&task.task_type).ok_or_else(|| {
            HandlerError::new(format!(
                "no handler registered for task type '{}'",
                task.task_type
            ))
        })?;
        handler.handle(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ok_handler() -> Arc<dyn TaskHandler> {
        Arc::new(handler_fn(|_task| async { Ok::<(), HandlerError>(()) }))
    }

    #[tokio::test]
    async fn registry_dispatches_by_task_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);

        let mut registry = HandlerRegistry::new();
        registry
            .register(
                "count",
                Arc::new(handler_fn(move |_task| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok::<(), HandlerError>(())
                    }
                })),
            )
            .unwrap();

        registry.handle(&Task::new("count")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_handler_is_a_handler_error() {
        let registry = HandlerRegistry::new();
        let err = registry.handle(&Task::new("nobody")).await.unwrap_err();
        assert!(err.message().contains("nobody"));
    }

    #[tokio::test]
    async fn fallback_catches_unregistered_types() {
        let mut registry = HandlerRegistry::new();
        registry.set_fallback(ok_handler());
        registry.handle(&Task::new("anything")).await.unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", ok_handler()).unwrap();
        let err = registry.register("a", ok_handler()).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(t) if t == "a"));
        assert_eq!(registry.registered_types(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn fn_handler_reports_failures() {
        let handler = handler_fn(|task: Task| async move {
            Err::<(), _>(HandlerError::new(format!("{} failed", task.task_type)))
        });
        let err = handler.handle(&Task::new("x")).await.unwrap_err();
        assert_eq!(err.message(), "x failed");
    }
}
