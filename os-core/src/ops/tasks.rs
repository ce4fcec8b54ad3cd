use super::{Op, RiskLevel};
use crate::tasks::{CompleteStatus, TaskError, TaskService};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Write;
use std::sync::Arc;

/// Creates a task that starts tomorrow.
pub struct TaskTomorrowOp {
    service: Arc<TaskService>,
}

impl TaskTomorrowOp {
    pub fn new(service: Arc<TaskService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Op for TaskTomorrowOp {
    fn name(&self) -> &str {
        "tomorrow"
    }

    fn description(&self) -> &str {
        "Create a task that starts tomorrow"
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &str) -> Result<String> {
        match self.service.create_tomorrow(args) {
            Ok(task) => Ok(format!("{}: {}", task.id, task.text)),
            Err(TaskError::EmptyText) => Ok("Usage: /tomorrow <task description>".to_string()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lists all open tasks.
pub struct TaskListOp {
    service: Arc<TaskService>,
}

impl TaskListOp {
    pub fn new(service: Arc<TaskService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Op for TaskListOp {
    fn name(&self) -> &str {
        "tasks"
    }

    fn description(&self) -> &str {
        "List open tasks"
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &str) -> Result<String> {
        if !args.trim().is_empty() {
            return Ok("Usage: /tasks".to_string());
        }

        let tasks = self.service.list_open()?;
        if tasks.is_empty() {
            return Ok("No open tasks.".to_string());
        }

        let mut out = String::new();
        for (i, task) in tasks.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = write!(out, "{}: {}", task.id, task.text);
        }
        Ok(out)
    }
}

/// Marks a task done.
pub struct TaskDoneOp {
    service: Arc<TaskService>,
}

impl TaskDoneOp {
    pub fn new(service: Arc<TaskService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Op for TaskDoneOp {
    fn name(&self) -> &str {
        "done"
    }

    fn description(&self) -> &str {
        "Mark a task as done"
    }

    fn risk(&self) -> RiskLevel {
        RiskLevel::None
    }

    async fn execute(&self, args: &str) -> Result<String> {
        let Some(id) = parse_done_id(args) else {
            return Ok("Usage: /done <id>".to_string());
        };

        match self.service.complete(id)? {
            CompleteStatus::Updated => Ok(format!("Done: {id}")),
            CompleteStatus::AlreadyDone => Ok(format!("Already done: {id}")),
            CompleteStatus::Unknown => Ok(format!("Unknown task: {id}")),
        }
    }
}

fn parse_done_id(args: &str) -> Option<u32> {
    let mut parts = args.split_whitespace();
    let raw = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    match raw.parse::<u32>() {
        Ok(id) if id > 0 => Some(id),
        _ => None,
    }
}
