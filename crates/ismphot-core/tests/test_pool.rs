use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ismphot_core::error::IsmError;
use ismphot_core::pool::{TaskFailure, TaskPool};
use ismphot_core::progress::{PipelineStage, ProgressReporter};

#[derive(Default)]
struct RecordingReporter {
    stages: Mutex<Vec<(PipelineStage, Option<usize>)>>,
    last: AtomicUsize,
    finished: AtomicUsize,
}

impl ProgressReporter for RecordingReporter {
    fn begin_stage(&self, stage: PipelineStage, total_items: Option<usize>) {
        self.stages.lock().unwrap().push((stage, total_items));
    }

    fn advance(&self, items_done: usize) {
        self.last.fetch_max(items_done, Ordering::SeqCst);
    }

    fn finish_stage(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_results_in_input_order() {
    let pool = TaskPool::new(4, None);
    let results = pool.map((0..50).collect(), |n: &i32| Ok(n * 2));
    assert_eq!(results.len(), 50);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.task, i as i32);
        assert_eq!(*r.ok().unwrap(), i as i32 * 2);
    }
}

#[test]
fn test_failures_stay_with_their_task() {
    let pool = TaskPool::new(3, None);
    let results = pool.map(vec![1, 2, 3, 4], |n: &i32| {
        if n % 2 == 0 {
            Err(IsmError::InvalidConfig(format!("even {n}")))
        } else {
            Ok(*n)
        }
    });
    assert!(results[0].ok().is_some());
    assert!(matches!(results[1].outcome, Err(TaskFailure::Error(_))));
    assert!(results[2].ok().is_some());
    assert!(matches!(results[3].outcome, Err(TaskFailure::Error(_))));
}

#[test]
fn test_panic_is_contained() {
    let pool = TaskPool::new(2, None);
    let results = pool.map(vec![1, 2, 3], |n: &i32| {
        if *n == 2 {
            panic!("bad task");
        }
        Ok(*n)
    });
    assert_eq!(*results[0].ok().unwrap(), 1);
    match &results[1].outcome {
        Err(TaskFailure::Panicked(msg)) => assert!(msg.contains("bad task")),
        other => panic!("expected panic failure, got {other:?}"),
    }
    assert_eq!(*results[2].ok().unwrap(), 3);
}

#[test]
fn test_worker_recycling_processes_everything() {
    // One task per worker per generation forces many pool rebuilds.
    let pool = TaskPool::new(2, Some(1));
    let results = pool.map((0..9).collect(), |n: &usize| Ok(n + 1));
    let values: Vec<usize> = results.iter().map(|r| *r.ok().unwrap()).collect();
    assert_eq!(values, (1..10).collect::<Vec<_>>());
}

#[test]
fn test_zero_workers_clamped() {
    let pool = TaskPool::new(0, Some(0));
    assert_eq!(pool.workers(), 1);
    let results = pool.map(vec![5], |n: &i32| Ok(*n));
    assert_eq!(*results[0].ok().unwrap(), 5);
}

#[test]
fn test_progress_reported() {
    let pool = TaskPool::new(2, None);
    let reporter = RecordingReporter::default();
    pool.map_reported(
        (0..7).collect(),
        |n: &i32| Ok(*n),
        &reporter,
        Some(PipelineStage::CollectingMetrics),
    );
    assert_eq!(
        reporter.stages.lock().unwrap().as_slice(),
        &[(PipelineStage::CollectingMetrics, Some(7))]
    );
    assert_eq!(reporter.last.load(Ordering::SeqCst), 7);
    assert_eq!(reporter.finished.load(Ordering::SeqCst), 1);
}
