pub mod scheduler;
pub mod soft_timer;
pub mod task;

pub use scheduler::{Scheduler, TaskId};
pub use soft_timer::{SoftTimers, TimerId};
pub use task::{Task, TaskPriority, TaskState};
