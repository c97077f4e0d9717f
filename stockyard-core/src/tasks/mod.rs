//! Task queue, executor, handlers and the auto-mode processor loop.

mod executor;
pub mod handlers;
mod processor;
mod queue;

pub use executor::{ExecutionOutcome, TaskExecutor};
pub use handlers::{HandlerContext, HandlerRegistry, TaskHandler};
pub use processor::TaskProcessor;
pub use queue::{MemoryTaskStore, TaskStore};
