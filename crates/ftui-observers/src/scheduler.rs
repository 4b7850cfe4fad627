#![forbid(unsafe_code)]

//! Cooperative single-threaded event loop.
//!
//! The [`Scheduler`] owns two queues:
//!
//! - **Microtasks** run in FIFO order until the queue is empty. Tasks queued
//!   while draining run in the same drain. Host update passes and mutation
//!   deliveries are microtasks.
//! - **Frame tasks** run once per [`Scheduler::next_frame`] call. Tasks
//!   requested while a frame is running are deferred to the following
//!   frame. Geometry sampling (intersection) is a frame task.
//!
//! Nothing here blocks or spawns threads; the owner decides when time
//! advances by calling [`run_microtasks`](Scheduler::run_microtasks) or
//! [`next_frame`](Scheduler::next_frame).
//!
//! # Invariants
//!
//! 1. No task runs synchronously inside the call that queued it.
//! 2. No `RefCell` borrow of the queues is held while a task runs, so tasks
//!    may freely queue further work.
//! 3. A drain stops after [`SchedulerConfig::microtask_budget`] tasks to
//!    bound runaway feedback loops; the remaining tasks stay queued.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

type Task = Box<dyn FnOnce()>;

/// Event-loop tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum microtasks run by a single drain.
    /// Default: 10 000.
    pub microtask_budget: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            microtask_budget: 10_000,
        }
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    microtasks: RefCell<VecDeque<Task>>,
    frame_tasks: RefCell<Vec<Task>>,
    frame: Cell<u64>,
}

/// Shared handle to a cooperative event loop. Cloning shares the queues.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("frame", &self.inner.frame.get())
            .field("microtasks", &self.inner.microtasks.borrow().len())
            .field("frame_tasks", &self.inner.frame_tasks.borrow().len())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            inner: Rc::new(SchedulerInner {
                config,
                microtasks: RefCell::new(VecDeque::new()),
                frame_tasks: RefCell::new(Vec::new()),
                frame: Cell::new(0),
            }),
        }
    }

    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.inner.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Run `task` at the start of the next frame.
    pub fn request_frame(&self, task: impl FnOnce() + 'static) {
        self.inner.frame_tasks.borrow_mut().push(Box::new(task));
    }

    /// Drain the microtask queue. Returns the number of tasks run.
    pub fn run_microtasks(&self) -> usize {
        let budget = self.inner.config.microtask_budget;
        let mut ran = 0;
        while ran < budget {
            let Some(task) = self.inner.microtasks.borrow_mut().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
        let remaining = self.pending_microtasks();
        if remaining > 0 {
            warn!(budget, remaining, "microtask budget exhausted; deferring");
        }
        ran
    }

    /// Advance one frame: drain microtasks, run the frame tasks requested
    /// so far, then drain microtasks again. Returns the new frame number.
    pub fn next_frame(&self) -> u64 {
        self.run_microtasks();
        let frame = self.inner.frame.get() + 1;
        self.inner.frame.set(frame);
        let tasks = std::mem::take(&mut *self.inner.frame_tasks.borrow_mut());
        for task in tasks {
            task();
        }
        self.run_microtasks();
        frame
    }

    /// Number of frames advanced so far.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.inner.frame.get()
    }

    #[must_use]
    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.borrow().len()
    }

    #[must_use]
    pub fn pending_frame_tasks(&self) -> usize {
        self.inner.frame_tasks.borrow().len()
    }

    /// Whether both queues are empty.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_microtasks() == 0 && self.pending_frame_tasks() == 0
    }
}
