//! Long-running executor behind `start`.
//!
//! Reconciles the watched folder on startup, then feeds newly settled files
//! from the [`DirectoryWatcher`] into the bounded [`WorkQueue`]. A file is
//! queued at most once while it is queued or running.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reel_queue::WorkQueue;
use reel_store::StoreError;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::StabilityConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::Pipeline;
use crate::reconciler::pending_files;
use crate::watcher::{wait_until_stable, DirectoryWatcher, Stability};

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub watch_dir: PathBuf,
    pub stability: StabilityConfig,
    /// How long shutdown waits for queued and running files
    pub shutdown_timeout: Duration,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Removes a file from the in-flight set when its task ends or is dropped.
struct InFlightGuard {
    in_flight: InFlight,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.name);
    }
}

pub struct Executor {
    pipeline: Arc<Pipeline>,
    queue: WorkQueue,
    options: ExecutorOptions,
    in_flight: InFlight,
    fatal_tx: mpsc::UnboundedSender<StoreError>,
    fatal_rx: mpsc::UnboundedReceiver<StoreError>,
}

impl Executor {
    pub fn new(pipeline: Arc<Pipeline>, queue: WorkQueue, options: ExecutorOptions) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            pipeline,
            queue,
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            fatal_tx,
            fatal_rx,
        }
    }

    /// Queue `name` unless it is already queued or running.
    ///
    /// Returns whether the file was queued.
    pub fn submit(&self, name: &str) -> WorkerResult<bool> {
        {
            let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if !set.insert(name.to_string()) {
                debug!(file = %name, "Already queued, ignoring");
                return Ok(false);
            }
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            name: name.to_string(),
        };
        let pipeline = Arc::clone(&self.pipeline);
        let fatal_tx = self.fatal_tx.clone();

        // On failure the task is dropped and the guard frees the name.
        self.queue.enqueue(async move {
            let guard = guard;
            match pipeline.process(&guard.name).await {
                Ok(outcome) => debug!(file = %guard.name, status = %outcome.status(), "File done"),
                Err(e) => {
                    error!(file = %guard.name, "State store failure: {}", e);
                    let _ = fatal_tx.send(e);
                }
            }
        })?;

        info!(file = %name, queued = self.queue.queued(), "Queued file");
        Ok(true)
    }

    /// Number of files queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run until `shutdown` resolves or the state store fails.
    ///
    /// On exit the queue stops accepting files and running ones get
    /// `shutdown_timeout` to finish. A store failure is returned as an error.
    pub async fn run<S>(mut self, shutdown: S) -> WorkerResult<()>
    where
        S: Future<Output = ()>,
    {
        info!(
            watch_dir = %self.options.watch_dir.display(),
            max_concurrent = self.queue.max_concurrent(),
            "Starting executor"
        );

        // Watch before scanning so files landing mid-scan are not missed.
        let mut watcher = DirectoryWatcher::start(&self.options.watch_dir)?;

        for name in pending_files(self.pipeline.store(), &self.options.watch_dir).await? {
            self.submit(&name)?;
        }

        let mut settling: HashSet<PathBuf> = HashSet::new();
        let mut checks: JoinSet<(PathBuf, Stability)> = JoinSet::new();

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping executor");
                    break Ok(());
                }
                Some(e) = self.fatal_rx.recv() => {
                    break Err(WorkerError::Store(e));
                }
                event = watcher.next() => {
                    let Some(path) = event else {
                        break Err(WorkerError::Io(std::io::Error::other("directory watcher stopped")));
                    };
                    if settling.insert(path.clone()) {
                        let stability = self.options.stability.clone();
                        checks.spawn(async move {
                            let outcome = wait_until_stable(&path, &stability).await;
                            (path, outcome)
                        });
                    }
                }
                Some(joined) = checks.join_next() => {
                    let (path, outcome) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            error!("Stability check task failed: {}", e);
                            continue;
                        }
                    };
                    settling.remove(&path);
                    if let Err(e) = self.on_settled(&path, outcome) {
                        break Err(e);
                    }
                }
            }
        };

        drop(watcher);
        checks.abort_all();
        self.stop().await;

        // A store failure during drain still fails the run.
        match (result, self.fatal_rx.try_recv()) {
            (Ok(()), Ok(e)) => Err(WorkerError::Store(e)),
            (result, _) => result,
        }
    }

    fn on_settled(&self, path: &Path, outcome: Stability) -> WorkerResult<()> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping file with non UTF-8 name");
            return Ok(());
        };
        match outcome {
            Stability::Stable { size } => {
                debug!(file = %name, size, "File settled");
                self.submit(name)?;
            }
            Stability::Vanished => warn!(file = %name, "File disappeared before settling, dropped"),
            Stability::TimedOut => warn!(
                file = %name,
                timeout_secs = self.options.stability.timeout.as_secs(),
                "File never settled, dropped"
            ),
        }
        Ok(())
    }

    async fn stop(&self) {
        self.queue.close();
        let pending = self.queue.queued() + self.queue.running();
        if pending > 0 {
            info!(pending, "Waiting for in-flight files to complete...");
        }
        if tokio::time::timeout(self.options.shutdown_timeout, self.queue.drain())
            .await
            .is_err()
        {
            warn!(
                remaining = self.in_flight(),
                "Shutdown timeout elapsed; remaining files resume on next start"
            );
        }
        info!("Executor stopped");
    }
}
