use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

const HEARTBEAT_TICK: Duration = Duration::from_millis(50);

/// Pages processed so far, shared between the task and whoever observes it.
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    state: Arc<ProgressState>,
}

#[derive(Debug)]
struct ProgressState {
    processed: AtomicUsize,
    failed: AtomicUsize,
    total: AtomicUsize,
    started: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub failed: usize,
    pub total: Option<usize>,
    pub elapsed_ms: u128,
}

impl Default for ProgressCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(ProgressState {
                processed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                total: AtomicUsize::new(0),
                started: Instant::now(),
            }),
        }
    }

    pub fn set_total(&self, total: usize) {
        self.state.total.store(total, Ordering::Relaxed);
    }

    pub fn record_page(&self) {
        self.state.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.state.processed.fetch_add(1, Ordering::Relaxed);
        self.state.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total = self.state.total.load(Ordering::Relaxed);
        ProgressSnapshot {
            processed: self.state.processed.load(Ordering::Relaxed),
            failed: self.state.failed.load(Ordering::Relaxed),
            total: (total > 0).then_some(total),
            elapsed_ms: self.state.started.elapsed().as_millis(),
        }
    }
}

/// Background thread logging a progress snapshot every `interval`. Stops when dropped.
pub struct Heartbeat {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn spawn(counter: ProgressCounter, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut waited = Duration::ZERO;
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(HEARTBEAT_TICK);
                waited += HEARTBEAT_TICK;
                if waited < interval {
                    continue;
                }
                waited = Duration::ZERO;
                let snapshot = counter.snapshot();
                tracing::info!(
                    processed = snapshot.processed,
                    failed = snapshot.failed,
                    total = snapshot.total,
                    elapsed_ms = snapshot.elapsed_ms as u64,
                    "progress"
                );
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("progress heartbeat thread panicked");
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::{Heartbeat, ProgressCounter};

    #[test]
    fn clones_share_one_count() {
        let counter = ProgressCounter::new();
        let observer = counter.clone();
        counter.record_page();
        counter.record_failure();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.total, None);

        counter.set_total(10);
        assert_eq!(observer.snapshot().total, Some(10));
    }

    #[test]
    fn counting_from_worker_threads() {
        let counter = ProgressCounter::new();
        let workers = (0..4)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        counter.record_page();
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().expect("worker");
        }
        assert_eq!(counter.snapshot().processed, 100);
    }

    #[test]
    fn heartbeat_stops_promptly() {
        let counter = ProgressCounter::new();
        let heartbeat = Heartbeat::spawn(counter.clone(), Duration::from_millis(60));
        counter.record_page();
        thread::sleep(Duration::from_millis(120));
        heartbeat.stop();
        assert_eq!(counter.snapshot().processed, 1);
    }
}
