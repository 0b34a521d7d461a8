//! File watcher: filesystem events to incremental index updates.
//!
//! Events flow through a bounded queue with a blocking producer, then a
//! coalescing window per path. A burst of create/modify/delete for one
//! path collapses into a single action decided by the file's final state
//! on disk. The worker thread also drives stale-path retries.

use crossbeam_channel::{Receiver, Sender, bounded};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::IndexerResult;
use crate::indexing::indexer::Indexer;

/// How often the worker wakes to flush the coalescing window.
const TICK: Duration = Duration::from_millis(50);

/// Callback invoked after any write, used for cache invalidation.
pub type WriteListener = Arc<dyn Fn() + Send + Sync>;

/// Coalesces per-path event bursts. A path becomes ready once no new
/// event has arrived for the window duration.
struct Coalescer {
    pending: HashMap<PathBuf, Instant>,
    window: Duration,
}

impl Coalescer {
    fn new(window: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            window,
        }
    }

    fn record(&mut self, path: PathBuf) {
        self.pending.insert(path, Instant::now());
    }

    fn take_ready(&mut self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut ready = Vec::new();
        self.pending.retain(|path, last| {
            if now.duration_since(*last) >= self.window {
                ready.push(path.clone());
                false
            } else {
                true
            }
        });
        ready
    }
}

/// Watches one workspace and applies changes through its indexer.
pub struct WatchService {
    _watcher: RecommendedWatcher,
    shutdown: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl WatchService {
    /// Start watching. Events are applied on a dedicated worker thread;
    /// `on_write` fires after each effective update (for cache
    /// invalidation).
    pub fn start(
        settings: Arc<Settings>,
        indexer: Arc<Indexer>,
        on_write: WriteListener,
    ) -> IndexerResult<Self> {
        let (tx, rx): (Sender<PathBuf>, Receiver<PathBuf>) =
            bounded(settings.indexing.queue_capacity);

        let root = indexer.layout().canonical_path.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(e) => e,
                Err(e) => {
                    warn!("watch error: {e}");
                    return;
                }
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                // blocking send: producer stalls when the queue is full
                if tx.send(path).is_err() {
                    return;
                }
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!("watching {}", root.display());

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = shutdown.clone();
        let window = Duration::from_millis(settings.indexing.debounce_ms);

        let worker = std::thread::Builder::new()
            .name("codesearch-watcher".to_string())
            .spawn(move || {
                let mut coalescer = Coalescer::new(window);
                let mut last_retry = Instant::now();
                while !shutdown_flag.load(Ordering::Relaxed) {
                    // drain without blocking longer than one tick
                    while let Ok(path) = rx.recv_timeout(TICK) {
                        coalescer.record(path);
                        if rx.is_empty() {
                            break;
                        }
                    }

                    let ready = coalescer.take_ready();
                    let had_work = !ready.is_empty();
                    for path in ready {
                        apply(&indexer, &path);
                    }
                    if had_work {
                        on_write();
                    }

                    if last_retry.elapsed() >= Duration::from_secs(5) {
                        last_retry = Instant::now();
                        let repaired = indexer.retry_stale();
                        if repaired > 0 {
                            debug!("repaired {repaired} stale paths");
                            on_write();
                        }
                    }
                }
            })
            .expect("spawn watcher thread");

        Ok(Self {
            _watcher: watcher,
            shutdown,
            worker: Some(worker),
        })
    }
}

/// Final-state dispatch: the path's existence on disk decides between
/// upsert and delete, which is what makes burst coalescing safe.
fn apply(indexer: &Indexer, path: &std::path::Path) {
    let result = if path.is_file() {
        indexer.index_file(path, false).map(|_| ())
    } else if path.exists() {
        // directory events carry no indexable content
        return;
    } else {
        indexer.remove_file(path).map(|_| ())
    };
    if let Err(e) = result {
        warn!("watcher update failed for {}: {e}", path.display());
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalescer_waits_for_quiet_window() {
        let mut c = Coalescer::new(Duration::from_millis(40));
        c.record(PathBuf::from("/a"));
        assert!(c.take_ready().is_empty());

        std::thread::sleep(Duration::from_millis(50));
        let ready = c.take_ready();
        assert_eq!(ready, vec![PathBuf::from("/a")]);
        assert!(c.take_ready().is_empty());
    }

    #[test]
    fn coalescer_resets_timer_on_new_event() {
        let mut c = Coalescer::new(Duration::from_millis(60));
        c.record(PathBuf::from("/a"));
        std::thread::sleep(Duration::from_millis(35));
        c.record(PathBuf::from("/a"));
        std::thread::sleep(Duration::from_millis(35));
        // 70ms since first event but only 35ms since the last one
        assert!(c.take_ready().is_empty());
        std::thread::sleep(Duration::from_millis(35));
        assert_eq!(c.take_ready().len(), 1);
    }

    #[test]
    fn coalescer_tracks_paths_independently() {
        let mut c = Coalescer::new(Duration::from_millis(30));
        c.record(PathBuf::from("/a"));
        std::thread::sleep(Duration::from_millis(20));
        c.record(PathBuf::from("/b"));
        std::thread::sleep(Duration::from_millis(15));
        let ready = c.take_ready();
        assert_eq!(ready, vec![PathBuf::from("/a")]);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(c.take_ready(), vec![PathBuf::from("/b")]);
    }
}
