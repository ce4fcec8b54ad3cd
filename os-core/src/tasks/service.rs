use super::store::{next_id_from_tasks, Task, TaskStatus, TaskStore, DATE_FORMAT, SCHEDULE_DAILY_6AM};
use chrono::{DateTime, Days, Local, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task text is empty")]
    EmptyText,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of marking a task as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteStatus {
    Updated,
    AlreadyDone,
    Unknown,
}

/// Task CRUD and reminder selection over the JSON store. Load-modify-save
/// cycles are serialized by a single mutex.
pub struct TaskService {
    store: TaskStore,
    lock: Mutex<()>,
    now: Clock,
}

impl TaskService {
    pub fn new(store: TaskStore) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            now: Arc::new(Utc::now),
        }
    }

    /// Creates an open task that starts tomorrow (local time).
    pub fn create_tomorrow(&self, text: &str) -> Result<Task, TaskError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TaskError::EmptyText);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.store.load()?;

        let now = (self.now)().with_timezone(&Local);
        let tomorrow = now
            .date_naive()
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| now.date_naive());

        let id = if state.next_id < 1 {
            next_id_from_tasks(&state.tasks)
        } else {
            state.next_id
        };

        let task = Task {
            id,
            text: text.to_string(),
            created_at: now.to_rfc3339(),
            start_date: tomorrow.format(DATE_FORMAT).to_string(),
            status: TaskStatus::Open,
            schedule: SCHEDULE_DAILY_6AM.to_string(),
            last_reminded_date: None,
        };

        state.next_id = id + 1;
        state.tasks.push(task.clone());
        self.store.save(state)?;
        Ok(task)
    }

    /// All open tasks, sorted by id.
    pub fn list_open(&self) -> Result<Vec<Task>, TaskError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self.store.load()?;

        let mut open: Vec<Task> = state
            .tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Open)
            .collect();
        open.sort_by_key(|t| t.id);
        Ok(open)
    }

    pub fn complete(&self, id: u32) -> Result<CompleteStatus, TaskError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.store.load()?;

        let Some(task) = state.tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(CompleteStatus::Unknown);
        };
        if task.status == TaskStatus::Done {
            return Ok(CompleteStatus::AlreadyDone);
        }

        task.status = TaskStatus::Done;
        self.store.save(state)?;
        Ok(CompleteStatus::Updated)
    }

    /// Returns the open tasks due for a reminder on `today` (a `%Y-%m-%d`
    /// date), marking each as reminded before returning. Tasks already
    /// reminded today are skipped.
    pub fn prepare_daily_reminder(&self, today: &str) -> Result<Vec<Task>, TaskError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.store.load()?;

        let mut selected = Vec::new();
        for task in state.tasks.iter_mut() {
            if task.status != TaskStatus::Open {
                continue;
            }
            if task.start_date.as_str() > today {
                continue;
            }
            if task.last_reminded_date.as_deref() == Some(today) {
                continue;
            }

            task.last_reminded_date = Some(today.to_string());
            selected.push(task.clone());
        }

        if selected.is_empty() {
            return Ok(Vec::new());
        }

        self.store.save(state)?;
        selected.sort_by_key(|t| t.id);
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, TaskService) {
        let dir = tempfile::tempdir().unwrap();
        let svc = TaskService::new(TaskStore::new(dir.path().join("tasks.json")));
        (dir, svc)
    }

    #[test]
    fn create_tomorrow_assigns_ids_and_start_date() {
        let (_dir, svc) = service();

        let a = svc.create_tomorrow("water plants").unwrap();
        let b = svc.create_tomorrow("file taxes").unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);

        let expected = (Local::now().date_naive() + Days::new(1))
            .format(DATE_FORMAT)
            .to_string();
        assert_eq!(a.start_date, expected);
        assert_eq!(a.status, TaskStatus::Open);
    }

    #[test]
    fn create_rejects_empty_text() {
        let (_dir, svc) = service();
        assert!(matches!(
            svc.create_tomorrow("   "),
            Err(TaskError::EmptyText)
        ));
    }

    #[test]
    fn list_open_excludes_done_tasks() {
        let (_dir, svc) = service();
        let a = svc.create_tomorrow("a").unwrap();
        svc.create_tomorrow("b").unwrap();
        svc.complete(a.id).unwrap();

        let open = svc.list_open().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].text, "b");
    }

    #[test]
    fn complete_reports_each_state() {
        let (_dir, svc) = service();
        let task = svc.create_tomorrow("x").unwrap();

        assert_eq!(svc.complete(task.id).unwrap(), CompleteStatus::Updated);
        assert_eq!(svc.complete(task.id).unwrap(), CompleteStatus::AlreadyDone);
        assert_eq!(svc.complete(999).unwrap(), CompleteStatus::Unknown);
    }

    #[test]
    fn reminder_selects_started_tasks_once_per_day() {
        let (_dir, svc) = service();
        svc.create_tomorrow("due").unwrap();

        // Not yet started today.
        let today = Local::now().date_naive().format(DATE_FORMAT).to_string();
        assert!(svc.prepare_daily_reminder(&today).unwrap().is_empty());

        // Due the day it starts, but only once.
        let start = (Local::now().date_naive() + Days::new(1))
            .format(DATE_FORMAT)
            .to_string();
        let due = svc.prepare_daily_reminder(&start).unwrap();
        assert_eq!(due.len(), 1);
        assert!(svc.prepare_daily_reminder(&start).unwrap().is_empty());

        // Due again the following day.
        let next = (Local::now().date_naive() + Days::new(2))
            .format(DATE_FORMAT)
            .to_string();
        assert_eq!(svc.prepare_daily_reminder(&next).unwrap().len(), 1);
    }

    #[test]
    fn reminder_skips_done_tasks() {
        let (_dir, svc) = service();
        let task = svc.create_tomorrow("done soon").unwrap();
        svc.complete(task.id).unwrap();

        let day = (Local::now().date_naive() + Days::new(1))
            .format(DATE_FORMAT)
            .to_string();
        assert!(svc.prepare_daily_reminder(&day).unwrap().is_empty());
    }
}
