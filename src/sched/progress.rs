//! Progress counting and reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::info;

/// Receives progress notifications
pub trait ProgressReporter: Send + Sync {
    fn start(&self, total: u64);
    fn update(&self, processed: u64);
    fn end(&self);
}

/// Completed-unit counter shared between executors and observers
#[derive(Default)]
pub struct Progress {
    completed: AtomicU64,
    total: AtomicU64,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reporter(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter: Some(reporter),
            ..Self::default()
        }
    }

    /// Reset the counter for a new pass over `total` units
    pub fn start(&self, total: u64) {
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        if let Some(reporter) = &self.reporter {
            reporter.start(total);
        }
    }

    /// Record `units` completed units and return the new count
    pub fn add(&self, units: u64) -> u64 {
        let processed = self.completed.fetch_add(units, Ordering::SeqCst) + units;
        if let Some(reporter) = &self.reporter {
            reporter.update(processed);
        }
        processed
    }

    pub fn finish(&self) {
        if let Some(reporter) = &self.reporter {
            reporter.end();
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress")
            .field("completed", &self.completed())
            .field("total", &self.total())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct LogState {
    total: u64,
    started: Instant,
    last: Option<Instant>,
}

/// Logs progress with an ETA at most once per interval
pub struct LogReporter {
    interval: Duration,
    state: Mutex<LogState>,
}

impl LogReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: Mutex::new(LogState {
                total: 0,
                started: Instant::now(),
                last: None,
            }),
        }
    }
}

impl ProgressReporter for LogReporter {
    fn start(&self, total: u64) {
        let mut state = lock(&self.state);
        state.total = total;
        state.started = Instant::now();
        state.last = None;
    }

    fn update(&self, processed: u64) {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let due = state
            .last
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if !due && processed < state.total {
            return;
        }
        state.last = Some(now);

        let elapsed = now.duration_since(state.started);
        let percent = if state.total == 0 {
            100.0
        } else {
            processed as f64 * 100.0 / state.total as f64
        };
        let eta_secs = if processed == 0 {
            0.0
        } else {
            elapsed.as_secs_f64() * state.total.saturating_sub(processed) as f64 / processed as f64
        };
        info!(
            processed = processed,
            total = state.total,
            "Processing [{:.1}%, ETA {:.1}s]",
            percent,
            eta_secs
        );
    }

    fn end(&self) {
        let state = lock(&self.state);
        info!(
            total = state.total,
            "Completed in {:.2}s",
            state.started.elapsed().as_secs_f64()
        );
    }
}

/// Forwards an update only when `delay` has passed since the last forwarded one
pub struct DelayReporter {
    inner: Arc<dyn ProgressReporter>,
    delay: Duration,
    last: Mutex<Instant>,
}

impl DelayReporter {
    pub fn new(inner: Arc<dyn ProgressReporter>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            last: Mutex::new(Instant::now()),
        }
    }
}

impl ProgressReporter for DelayReporter {
    fn start(&self, total: u64) {
        *lock(&self.last) = Instant::now();
        self.inner.start(total);
    }

    fn update(&self, processed: u64) {
        let now = Instant::now();
        {
            let mut last = lock(&self.last);
            if now.duration_since(*last) <= self.delay {
                return;
            }
            *last = now;
        }
        self.inner.update(processed);
    }

    fn end(&self) {
        self.inner.end();
    }
}

/// Fans every notification out to several reporters
#[derive(Default)]
pub struct MuxReporter {
    reporters: Vec<Arc<dyn ProgressReporter>>,
}

impl MuxReporter {
    pub fn new(reporters: Vec<Arc<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }

    pub fn push(&mut self, reporter: Arc<dyn ProgressReporter>) {
        self.reporters.push(reporter);
    }
}

impl ProgressReporter for MuxReporter {
    fn start(&self, total: u64) {
        self.reporters.iter().for_each(|r| r.start(total));
    }

    fn update(&self, processed: u64) {
        self.reporters.iter().for_each(|r| r.update(processed));
    }

    fn end(&self) {
        self.reporters.iter().for_each(|r| r.end());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for Recording {
        fn start(&self, total: u64) {
            lock(&self.events).push(format!("start {}", total));
        }
        fn update(&self, processed: u64) {
            lock(&self.events).push(format!("update {}", processed));
        }
        fn end(&self) {
            lock(&self.events).push("end".to_string());
        }
    }

    #[test]
    fn test_counter_and_reset() {
        let progress = Progress::new();
        progress.start(10);
        assert_eq!(progress.add(3), 3);
        assert_eq!(progress.add(4), 7);
        assert_eq!(progress.completed(), 7);
        progress.start(5);
        assert_eq!(progress.completed(), 0);
        assert_eq!(progress.total(), 5);
    }

    #[test]
    fn test_mux_fans_out() {
        let a = Arc::new(Recording::default());
        let b = Arc::new(Recording::default());
        let mux = MuxReporter::new(vec![a.clone(), b.clone()]);
        let progress = Progress::with_reporter(Arc::new(mux));
        progress.start(2);
        progress.add(2);
        progress.finish();

        let expected = vec!["start 2", "update 2", "end"];
        assert_eq!(*lock(&a.events), expected);
        assert_eq!(*lock(&b.events), expected);
    }

    #[test]
    fn test_delay_suppresses_early_updates() {
        let inner = Arc::new(Recording::default());
        let delay = DelayReporter::new(inner.clone(), Duration::from_secs(3600));
        delay.start(10);
        delay.update(1);
        delay.update(2);
        delay.end();
        assert_eq!(*lock(&inner.events), vec!["start 10", "end"]);

        let inner = Arc::new(Recording::default());
        let eager = DelayReporter::new(inner.clone(), Duration::ZERO);
        eager.start(1);
        std::thread::sleep(Duration::from_millis(2));
        eager.update(1);
        assert_eq!(*lock(&inner.events), vec!["start 1", "update 1"]);
    }

    #[test]
    fn test_log_reporter_runs() {
        let progress = Progress::with_reporter(Arc::new(LogReporter::new(Duration::from_millis(0))));
        progress.start(4);
        progress.add(0);
        progress.add(4);
        progress.finish();
        assert_eq!(progress.completed(), 4);
    }
}
