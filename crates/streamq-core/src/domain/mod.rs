//! Domain model: ids, the task record, errors.

pub mod errors;
pub mod ids;
pub mod record;
pub mod task;

pub use self::errors::{ErrorKind, HandlerError, QueueError, StreamqError};
pub use self::ids::{EntryId, TaskId};
pub use self::task::{DEFAULT_MAX_ATTEMPTS, DeadLetter, Task, TaskStatus};
