//! Watching the input folder for new videos.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::config::StabilityConfig;
use crate::error::WorkerResult;
use crate::video::is_video_file;

/// Non-recursive watcher delivering paths of videos that appeared or changed.
pub struct DirectoryWatcher {
    // Dropping the watcher stops event delivery.
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<PathBuf>,
}

impl DirectoryWatcher {
    /// Watch `dir`. Event paths are absolute, so `dir` is resolved first.
    pub fn start(dir: &Path) -> WorkerResult<Self> {
        let (tx, events) = mpsc::unbounded_channel();
        let root = dir.canonicalize()?;
        let watched = root.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for path in candidate_paths(&event, &root) {
                        if tx.send(path).is_err() {
                            debug!("Watch event receiver dropped");
                            return;
                        }
                    }
                }
                Err(e) => error!("Watch error: {}", e),
            }
        })?;
        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Next candidate path; `None` once the watcher is gone.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.events.recv().await
    }
}

/// Video paths directly inside `root` that an event created, renamed into
/// place or wrote to.
fn candidate_paths(event: &Event, root: &Path) -> Vec<PathBuf> {
    let paths: Vec<&PathBuf> = match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => event.paths.iter().collect(),
        // Paths are [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.last().into_iter().collect(),
        _ => Vec::new(),
    };

    paths
        .into_iter()
        .filter(|p| p.parent() == Some(root) && is_video_file(p))
        .cloned()
        .collect()
}

/// Result of waiting for a file to stop changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    Stable { size: u64 },
    Vanished,
    TimedOut,
}

/// Poll the size of `path` until it is non-zero and unchanged for
/// `config.checks` consecutive polls.
pub async fn wait_until_stable(path: &Path, config: &StabilityConfig) -> Stability {
    let deadline = Instant::now() + config.timeout;
    let mut last_size = None;
    let mut unchanged = 0;

    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let size = meta.len();
                if size > 0 && last_size == Some(size) {
                    unchanged += 1;
                    if unchanged >= config.checks {
                        return Stability::Stable { size };
                    }
                } else {
                    unchanged = 0;
                    last_size = Some(size);
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Stability::Vanished,
            Err(e) => {
                warn!(path = %path.display(), "Cannot stat file: {}", e);
                return Stability::Vanished;
            }
        }

        if Instant::now() >= deadline {
            return Stability::TimedOut;
        }
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;
    use std::io::Write;
    use std::time::Duration;

    fn fast() -> StabilityConfig {
        StabilityConfig {
            interval: Duration::from_millis(5),
            checks: 2,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_candidate_paths_filters_events() {
        let root = Path::new("/watch");
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(root.join("a.mp4"))
            .add_path(root.join("notes.txt"))
            .add_path(root.join("sub").join("b.mp4"));
        assert_eq!(candidate_paths(&create, root), vec![root.join("a.mp4")]);

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("a.mp4.part"))
            .add_path(root.join("a.mp4"));
        assert_eq!(candidate_paths(&rename, root), vec![root.join("a.mp4")]);

        let rename_from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root.join("a.mp4"));
        assert!(candidate_paths(&rename_from, root).is_empty());
    }

    #[tokio::test]
    async fn test_stable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"complete").unwrap();

        assert_eq!(
            wait_until_stable(&path, &fast()).await,
            Stability::Stable { size: 8 }
        );
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            wait_until_stable(&dir.path().join("gone.mp4"), &fast()).await,
            Stability::Vanished
        );
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp4");
        std::fs::write(&path, b"x").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..200 {
                let mut f = std::fs::OpenOptions::new().append(true).open(&writer_path).unwrap();
                f.write_all(b"more").unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let config = StabilityConfig {
            interval: Duration::from_millis(5),
            checks: 3,
            timeout: Duration::from_millis(60),
        };
        assert_eq!(wait_until_stable(&path, &config).await, Stability::TimedOut);
        writer.abort();
    }

    #[tokio::test]
    async fn test_watcher_reports_new_video() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut watcher = DirectoryWatcher::start(&root).unwrap();

        std::fs::write(root.join("notes.txt"), b"x").unwrap();
        std::fs::write(root.join("new.mp4"), b"x").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path, root.join("new.mp4"));
    }

    #[tokio::test]
    async fn test_watcher_accepts_relative_dir() {
        let dir = tempfile::tempdir_in(".").unwrap();
        let relative = dir.path().strip_prefix(".").unwrap_or(dir.path()).to_path_buf();
        assert!(relative.is_relative());
        let mut watcher = DirectoryWatcher::start(&relative).unwrap();

        std::fs::write(relative.join("new.mp4"), b"x").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(5), watcher.next())
            .await
            .expect("no event for a file in a relative watch dir")
            .unwrap();
        assert_eq!(path, dir.path().canonicalize().unwrap().join("new.mp4"));
    }
}
