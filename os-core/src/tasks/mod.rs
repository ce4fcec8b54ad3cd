//! Persistent tasks with a daily 06:00 reminder.

mod scheduler;
mod service;
mod store;

pub use scheduler::{format_reminder_message, Scheduler};
pub use service::{CompleteStatus, TaskError, TaskService};
pub use store::{Task, TaskState, TaskStatus, TaskStore, DATE_FORMAT};
