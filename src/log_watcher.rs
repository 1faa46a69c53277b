//! Change detection for the scheduler user log.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Sent whenever the watched file changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChanged {
    pub path: PathBuf,
}

/// Size and modification time of the watched file
#[derive(Debug, Default)]
struct FileState {
    path: PathBuf,
    last_seen: Option<(u64, Option<SystemTime>)>,
}

impl FileState {
    fn new(path: PathBuf) -> Self {
        let mut state = Self {
            path,
            last_seen: None,
        };
        state.last_seen = state.snapshot();
        state
    }

    fn snapshot(&self) -> Option<(u64, Option<SystemTime>)> {
        let metadata = std::fs::metadata(&self.path).ok()?;
        Some((metadata.len(), metadata.modified().ok()))
    }

    /// True if the file appeared, vanished, grew, shrank or was touched since the last call.
    fn changed(&mut self) -> bool {
        let now = self.snapshot();
        if now == self.last_seen {
            return false;
        }
        self.last_seen = now;
        true
    }
}

/// Watches one file from a background thread, using filesystem events when
/// available and polling otherwise.
pub struct LogWatcher {
    /// Polling interval for fallback mode
    poll_interval: Duration,
    /// Sender used to stop the watcher thread
    stop_tx: Option<Sender<()>>,
    /// Watcher thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl LogWatcher {
    /// Create a new LogWatcher.
    ///
    /// # Arguments
    /// * `poll_interval_secs` - Polling interval in seconds
    pub fn new(poll_interval_secs: f64) -> Self {
        Self {
            poll_interval: Duration::from_secs_f64(poll_interval_secs),
            stop_tx: None,
            thread_handle: None,
        }
    }

    /// Start watching `path`, reporting changes on `update_tx`.
    pub fn start(&mut self, path: &Path, update_tx: Sender<LogChanged>) {
        self.stop();

        let (stop_tx, stop_rx) = mpsc::channel();
        self.stop_tx = Some(stop_tx);

        let path = path.to_path_buf();
        let poll_interval = self.poll_interval;
        let handle = thread::spawn(move || {
            Self::watch_loop(path, stop_rx, update_tx, poll_interval);
        });

        self.thread_handle = Some(handle);
    }

    fn watch_loop(
        path: PathBuf,
        stop_rx: Receiver<()>,
        update_tx: Sender<LogChanged>,
        poll_interval: Duration,
    ) {
        let mut state = FileState::new(path.clone());
        let (notify_tx, notify_rx) = mpsc::channel();

        // Kept alive for the lifetime of the loop; events stop when it drops.
        let _watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            Config::default(),
        )
        .and_then(|mut w| {
            // The log may not exist yet, so watch its directory.
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            w.watch(&dir, RecursiveMode::NonRecursive).map(|_| w)
        })
        .map_err(|e| debug!("file watcher unavailable, polling only: {}", e))
        .ok();

        let check_interval = Duration::from_millis(100);
        let mut elapsed = Duration::ZERO;
        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }

            let mut poke = false;
            while let Ok(event) = notify_rx.try_recv() {
                if event.paths.iter().any(|p| p.ends_with(&path) || p == &path) {
                    poke = true;
                }
            }
            if elapsed >= poll_interval {
                poke = true;
                elapsed = Duration::ZERO;
            }

            if poke && state.changed() {
                let update = LogChanged {
                    path: state.path.clone(),
                };
                if update_tx.send(update).is_err() {
                    // Receiver dropped
                    return;
                }
            }

            thread::sleep(check_interval);
            elapsed += check_interval;
        }
    }

    /// Stop the watcher thread.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_file_state_detects_append() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "000 (100.000.000) submitted").unwrap();
        temp_file.flush().unwrap();

        let mut state = FileState::new(temp_file.path().to_path_buf());
        assert!(!state.changed());

        writeln!(temp_file, "001 (100.000.000) executing").unwrap();
        temp_file.flush().unwrap();
        assert!(state.changed());
        assert!(!state.changed());
    }

    #[test]
    fn test_file_state_detects_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.log");
        let mut state = FileState::new(path.clone());
        assert!(!state.changed());

        std::fs::write(&path, "000\n").unwrap();
        assert!(state.changed());
    }

    #[test]
    fn test_watcher_reports_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.log");

        let (tx, rx) = mpsc::channel();
        let mut watcher = LogWatcher::new(0.2);
        watcher.start(&path, tx);

        // Give the thread time to take its initial snapshot.
        thread::sleep(Duration::from_millis(300));
        std::fs::write(&path, "000 (100.000.000) submitted\n").unwrap();

        let update = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(update.path, path);
        watcher.stop();
    }
}
