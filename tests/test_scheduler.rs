use lumen::sched::{MuxReporter, Progress, ProgressReporter, Scheduler, TaskRange, Workload};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    started: AtomicU64,
    last: AtomicU64,
    ended: AtomicU64,
}

impl ProgressReporter for Recorder {
    fn start(&self, total: u64) {
        self.started.store(total, Ordering::SeqCst);
    }

    fn update(&self, processed: u64) {
        self.last.fetch_max(processed, Ordering::SeqCst);
    }

    fn end(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_run_reports_progress() {
    let recorder = Arc::new(Recorder::default());
    let progress = Arc::new(Progress::with_reporter(Arc::new(MuxReporter::new(vec![recorder.clone()]))));
    let scheduler = Scheduler::new(Workload::Flat { total: 1000 }, 4).with_progress(progress.clone());

    let ranges = Arc::new(Mutex::new(Vec::new()));
    let sink = ranges.clone();
    let processed = scheduler
        .run(move |start, end, executor| {
            sink.lock().unwrap().push(TaskRange::new(start, end, executor));
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(processed, 1000);
    assert_eq!(progress.completed(), 1000);
    assert_eq!(recorder.started.load(Ordering::SeqCst), 1000);
    assert_eq!(recorder.last.load(Ordering::SeqCst), 1000);
    assert_eq!(recorder.ended.load(Ordering::SeqCst), 1);

    let mut seen: Vec<(u64, u64)> = ranges.lock().unwrap().iter().map(|r| (r.start, r.end)).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![(0, 250), (250, 500), (500, 750), (750, 1000)]);
}

#[tokio::test]
async fn test_progress_resets_between_runs() {
    let scheduler = Scheduler::new(Workload::PixelSamples { pixels: 16, samples: 4 }, 2);
    assert_eq!(scheduler.run(|_, _, _| Ok(())).await.unwrap(), 64);
    assert_eq!(scheduler.run(|_, _, _| Ok(())).await.unwrap(), 64);
}

#[test]
fn test_partition_is_exact() {
    for total in 1..200u64 {
        for parallelism in 1..12usize {
            let scheduler = Scheduler::new(Workload::Flat { total }, parallelism);
            let ranges = scheduler.ranges();
            assert_eq!(ranges.len() as u64, total.min(parallelism as u64));
            let mut next = 0;
            for r in &ranges {
                assert_eq!(r.start, next);
                assert!(r.end > r.start);
                next = r.end;
            }
            assert_eq!(next, total);
        }
    }
}
