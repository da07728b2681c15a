// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wraps one [`Discipline`] with per-class bounded task queues and a
//! blocking serve loop, run on a dedicated OS thread per connection.
//!
//! A class occupies a discipline slot iff its task queue is non-empty.
//! That invariant is maintained on both `enqueue` and inside `run`'s pop:
//! the class's entry is re-enqueued into the discipline *before* the lock
//! is released, never after.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{fifo, sp, wfq, Discipline, DisciplineKind};
use crate::model::{Priority, CLASS_COUNT};
use crate::queue::CircularQueue;

/// Which discipline the connection's scheduler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    Fifo,
    Sp,
    Wfq,
}

impl QueuePolicy {
    fn discipline_kind(self) -> DisciplineKind {
        match self {
            QueuePolicy::Fifo => DisciplineKind::Fifo,
            QueuePolicy::Sp => DisciplineKind::Sp,
            QueuePolicy::Wfq => DisciplineKind::Wfq,
        }
    }

    /// The scheduling weight this policy assigns `priority`: the SP
    /// dequeue key, or the WFQ share, depending on discipline.
    pub fn weight_for(self, priority: Priority) -> f64 {
        match self {
            QueuePolicy::Fifo => fifo::weight_for(priority),
            QueuePolicy::Sp => sp::weight_for(priority),
            QueuePolicy::Wfq => wfq::weight_for(priority),
        }
    }
}

impl std::str::FromStr for QueuePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(QueuePolicy::Fifo),
            "sp" => Ok(QueuePolicy::Sp),
            "wfq" => Ok(QueuePolicy::Wfq),
            other => Err(format!("invalid queue policy {other:?}, expected fifo|sp|wfq")),
        }
    }
}

impl std::fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QueuePolicy::Fifo => "fifo",
            QueuePolicy::Sp => "sp",
            QueuePolicy::Wfq => "wfq",
        })
    }
}

impl<'de> serde::Deserialize<'de> for QueuePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

type Closure = Box<dyn FnOnce() + Send + 'static>;

struct State {
    discipline: Discipline,
    class_queues: Vec<CircularQueue<Closure>>,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    /// Set while a closure is running on the serve-loop thread, outside the
    /// state lock. Read by the queue-length sampler for work-conserving
    /// accounting: queued work plus nothing in service is idle time.
    in_service: AtomicBool,
}

/// A per-connection task scheduler. Cheap to clone — clones share the same
/// underlying state, which is how the serve-loop thread and the stream
/// readers coordinate.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    /// `class_queue_capacity` is the per-class bound `M` (>= 100; 1000 in
    /// practice). `discipline_capacity` is `N`, normally left at
    /// [`CLASS_COUNT`] since each class owns exactly one discipline entry;
    /// raised only if a deployment runs more classes than entries a default
    /// discipline could hold. Clamped up to `CLASS_COUNT` so every class
    /// still gets an entry even if misconfigured smaller.
    pub fn new(policy: QueuePolicy, class_queue_capacity: usize, discipline_capacity: usize) -> Self {
        let mut discipline = Discipline::new(policy.discipline_kind(), discipline_capacity.max(CLASS_COUNT));
        let mut class_queues = Vec::with_capacity(CLASS_COUNT);
        for class_id in 0..CLASS_COUNT {
            discipline.create_entry(class_id);
            let priority = Priority::from_class_id(class_id).expect("class_id < CLASS_COUNT");
            discipline.set_priority(class_id, policy.weight_for(priority));
            class_queues.push(CircularQueue::new(class_queue_capacity));
        }
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    discipline,
                    class_queues,
                    stopped: false,
                }),
                cond: Condvar::new(),
                in_service: AtomicBool::new(false),
            }),
        }
    }

    /// Submits `task` on `priority`'s class queue. Returns `false` if that
    /// class's queue is saturated (back-pressure) — the stream handler
    /// treats that as fatal for the stream, per the error handling design.
    pub fn enqueue<F>(&self, priority: Priority, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let class_id = priority.class_id();
        let mut state = self.shared.state.lock();
        let was_empty = state.class_queues[class_id].is_empty();
        let ok = state.class_queues[class_id].enqueue(Box::new(task));
        if ok && was_empty {
            state.discipline.enqueue(class_id);
        }
        drop(state);
        if ok {
            self.shared.cond.notify_all();
        }
        ok
    }

    /// Blocking serve loop. Runs until [`Self::stop`] is called; the
    /// in-flight closure (if any) always completes before returning.
    /// Intended to run on a dedicated thread, e.g. via
    /// `std::thread::spawn`.
    pub fn run(&self) {
        loop {
            let mut state = self.shared.state.lock();
            let class_id = loop {
                if state.stopped {
                    return;
                }
                if let Some(class_id) = state.discipline.dequeue() {
                    break class_id;
                }
                self.shared.cond.wait(&mut state);
            };

            let task = state.class_queues[class_id]
                .dequeue()
                .expect("discipline only yields classes with a non-empty queue");
            if !state.class_queues[class_id].is_empty() {
                // Re-enqueue before releasing the lock: a class whose queue
                // still has work must never momentarily lose its discipline
                // slot.
                state.discipline.enqueue(class_id);
            }
            drop(state);

            // Mandatory: never hold the scheduler lock while running a
            // closure that may block on blob I/O or stream writes.
            self.shared.in_service.store(true, Ordering::Relaxed);
            task();
            self.shared.in_service.store(false, Ordering::Relaxed);
        }
    }

    /// Whether the serve loop is currently running a closure, as opposed to
    /// waiting for one. Sampled alongside [`Self::queue_lengths`] for
    /// work-conserving accounting.
    pub fn is_busy(&self) -> bool {
        self.shared.in_service.load(Ordering::Relaxed)
    }

    /// Requests the serve loop to stop after its current closure (if any)
    /// finishes. Queued-but-not-started tasks are dropped silently.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        drop(state);
        self.shared.cond.notify_all();
    }

    /// Snapshot of each class's current queue depth, for periodic sampling
    /// into the `queue_len` report. `[high, medium, low]`, indexed by
    /// [`Priority::class_id`].
    pub fn queue_lengths(&self) -> [usize; CLASS_COUNT] {
        let state = self.shared.state.lock();
        std::array::from_fn(|i| state.class_queues[i].len())
    }

    /// Whether any class more urgent than `than` currently has work queued.
    /// Called right before a task starts service, to detect a priority
    /// inversion — a lower class starting while a higher one was ready.
    pub fn higher_class_ready(&self, than: Priority) -> bool {
        let state = self.shared.state.lock();
        (0..than.class_id()).any(|class_id| !state.class_queues[class_id].is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn enqueue_runs_the_closure_off_lock() {
        let sched = TaskScheduler::new(QueuePolicy::Fifo, 16, CLASS_COUNT);
        let (tx, rx) = mpsc::channel();
        let runner = sched.clone();
        let handle = std::thread::spawn(move || runner.run());

        assert!(sched.enqueue(Priority::High, move || {
            tx.send(()).unwrap();
        }));
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        sched.stop();
        handle.join().unwrap();
    }

    #[test]
    fn class_queue_saturation_is_reported_as_backpressure() {
        let sched = TaskScheduler::new(QueuePolicy::Fifo, 1, CLASS_COUNT);
        // No serve loop running: the queue never drains.
        assert!(sched.enqueue(Priority::Low, || {}));
        assert!(!sched.enqueue(Priority::Low, || {}));
    }

    #[test]
    fn sp_is_non_preemptive_once_a_task_is_in_service() {
        let sched = TaskScheduler::new(QueuePolicy::Sp, 16, CLASS_COUNT);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = mpsc::channel::<()>();

        let o1 = order.clone();
        sched.enqueue(Priority::Low, move || {
            gate_rx.recv().ok(); // simulates a long service already in flight
            o1.lock().push("low");
        });

        let runner = sched.clone();
        let handle = std::thread::spawn(move || runner.run());
        // Give the serve loop time to dequeue LOW and block inside it.
        std::thread::sleep(Duration::from_millis(50));

        let o2 = order.clone();
        sched.enqueue(Priority::High, move || {
            o2.lock().push("high");
        });

        gate_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        sched.stop();
        handle.join().unwrap();

        // HIGH arrived while LOW was already executing; non-preemption
        // means LOW still finishes first even though HIGH outranks it.
        assert_eq!(*order.lock(), vec!["low", "high"]);
    }

    #[test]
    fn is_busy_reflects_whether_a_closure_is_running() {
        let sched = TaskScheduler::new(QueuePolicy::Fifo, 16, CLASS_COUNT);
        let runner = sched.clone();
        let handle = std::thread::spawn(move || runner.run());

        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        assert!(!sched.is_busy());
        sched.enqueue(Priority::High, move || {
            gate_rx.recv().ok();
        });
        // Give the serve loop time to dequeue and start the closure.
        std::thread::sleep(Duration::from_millis(50));
        assert!(sched.is_busy());

        gate_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!sched.is_busy());

        sched.stop();
        handle.join().unwrap();
    }

    #[test]
    fn discipline_capacity_below_class_count_is_clamped_up() {
        // A misconfigured capacity smaller than CLASS_COUNT must not panic
        // when every class still registers an entry.
        let sched = TaskScheduler::new(QueuePolicy::Fifo, 16, 1);
        assert!(sched.enqueue(Priority::Low, || {}));
    }
}
