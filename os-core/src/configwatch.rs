use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

type Callback = Box<dyn Fn(&Path) + Send + Sync>;

/// Polls files for modification-time changes and invokes callbacks. Files
/// that do not exist yet are watched for appearance.
pub struct Watcher {
    interval: Duration,
    entries: Mutex<Vec<WatchEntry>>,
}

struct WatchEntry {
    path: PathBuf,
    mod_time: Option<SystemTime>,
    cb: Callback,
}

impl Watcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Adds a file to be watched. The callback runs on the watcher's poll
    /// loop, so it should hand slow work off to a task.
    pub fn watch(&self, path: impl Into<PathBuf>, cb: impl Fn(&Path) + Send + Sync + 'static) {
        let path = path.into();
        let mod_time = file_mod_time(&path);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(WatchEntry {
                path,
                mod_time,
                cb: Box::new(cb),
            });
    }

    /// Polls until the shutdown signal changes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => self.poll(),
            }
        }
    }

    fn poll(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.iter_mut() {
            // A missing file (possibly mid-save) counts as unchanged.
            let Some(current) = file_mod_time(&entry.path) else {
                continue;
            };
            if entry.mod_time == Some(current) {
                continue;
            }

            entry.mod_time = Some(current);
            tracing::info!(path = %entry.path.display(), "config file changed");
            (entry.cb)(&entry.path);
        }
    }
}

fn file_mod_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bump_mtime(path: &Path, offset_secs: u64) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(offset_secs))
            .unwrap();
    }

    #[test]
    fn fires_when_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.json");
        fs::write(&path, "[]").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let watcher = Watcher::new(Duration::from_millis(10));
        let counter = fired.clone();
        watcher.watch(&path, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        // Unchanged file: no callback.
        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        bump_mtime(&path, 2);
        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Stable after the change: no further callback.
        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fires_when_a_missing_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.json");

        let fired = Arc::new(AtomicUsize::new(0));
        let watcher = Watcher::new(Duration::from_millis(10));
        let counter = fired.clone();
        watcher.watch(&path, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        fs::write(&path, "{}").unwrap();
        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn deleted_files_count_as_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        fs::write(&path, "{}").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let watcher = Watcher::new(Duration::from_millis(10));
        let counter = fired.clone();
        watcher.watch(&path, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fs::remove_file(&path).unwrap();
        watcher.poll();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn callback_receives_the_changed_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, "{}").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let watcher = Watcher::new(Duration::from_millis(10));
        let sink = seen.clone();
        watcher.watch(&path, move |p| {
            sink.lock().unwrap().push(p.to_path_buf());
        });

        bump_mtime(&path, 2);
        watcher.poll();
        assert_eq!(seen.lock().unwrap().as_slice(), &[path]);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let watcher = Arc::new(Watcher::new(Duration::from_millis(5)));
        let (tx, rx) = watch::channel(false);

        let w = watcher.clone();
        let handle = tokio::spawn(async move { w.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watcher loop should exit")
            .unwrap();
    }
}
