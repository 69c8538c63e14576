use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use daqsched::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

/// One observation made by an instrumented task.
#[derive(Debug, Clone)]
pub struct Event {
    pub task: String,
    pub kind: EventKind,
    /// Position on the recorder's logical clock; strictly increasing.
    pub seq: usize,
    pub thread: Option<String>,
}

/// Builds tasks that record when (and on which thread) they start and finish.
///
/// Ordering assertions use the logical clock rather than wall time, so they
/// are independent of scheduling jitter.
#[derive(Debug, Default)]
pub struct Recorder {
    clock: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, task: &str, kind: EventKind) {
        // Taking the sequence number under the lock keeps `events` sorted.
        let mut events = self.events.lock().unwrap();
        let seq = self.clock.fetch_add(1, Ordering::SeqCst);
        events.push(Event {
            task: task.to_string(),
            kind,
            seq,
            thread: thread::current().name().map(str::to_string),
        });
    }

    /// A task that records its start and finish.
    pub fn task(self: &Arc<Self>, name: &str) -> Task {
        self.slow_task(name, Duration::ZERO)
    }

    /// Like [`task`](Self::task), sleeping `busy` between start and finish.
    pub fn slow_task(self: &Arc<Self>, name: &str, busy: Duration) -> Task {
        let recorder = Arc::clone(self);
        let task_name = name.to_string();
        Task::named(name, move || {
            recorder.record(&task_name, EventKind::Started);
            if !busy.is_zero() {
                thread::sleep(busy);
            }
            recorder.record(&task_name, EventKind::Finished);
            Ok(())
        })
    }

    /// A task that records its start and then fails.
    pub fn failing_task(self: &Arc<Self>, name: &str) -> Task {
        let recorder = Arc::clone(self);
        let task_name = name.to_string();
        Task::named(name, move || {
            recorder.record(&task_name, EventKind::Started);
            anyhow::bail!("{task_name} failed on purpose")
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Number of times `name` started.
    pub fn count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.task == name && e.kind == EventKind::Started)
            .count()
    }

    pub fn ran(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    pub fn started_at(&self, name: &str) -> Option<usize> {
        self.seq_of(name, EventKind::Started)
    }

    pub fn finished_at(&self, name: &str) -> Option<usize> {
        self.seq_of(name, EventKind::Finished)
    }

    fn seq_of(&self, name: &str, kind: EventKind) -> Option<usize> {
        self.events()
            .iter()
            .find(|e| e.task == name && e.kind == kind)
            .map(|e| e.seq)
    }

    /// Task names in the order they started.
    pub fn start_order(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Started)
            .map(|e| e.task)
            .collect()
    }

    /// Names of the threads `name` started on.
    pub fn threads_of(&self, name: &str) -> Vec<Option<String>> {
        self.events()
            .into_iter()
            .filter(|e| e.task == name && e.kind == EventKind::Started)
            .map(|e| e.thread)
            .collect()
    }

    /// Largest number of recorded tasks that were running at the same time.
    pub fn max_concurrency(&self) -> usize {
        let mut running = 0usize;
        let mut max = 0usize;
        for e in self.events() {
            match e.kind {
                EventKind::Started => {
                    running += 1;
                    max = max.max(running);
                }
                EventKind::Finished => running = running.saturating_sub(1),
            }
        }
        max
    }
}
