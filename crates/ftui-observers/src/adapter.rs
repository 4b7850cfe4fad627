#![forbid(unsafe_code)]

//! Seam between a controller and one platform observer.
//!
//! [`ObserverAdapter`] turns controller intents (`start`, `stop`) into
//! platform calls and keeps the authoritative set of targets the platform
//! is watching. Batches coming back are forwarded in order, minus any
//! record attributed to a target that has since been stopped.
//!
//! # Invariants
//!
//! 1. A target is in [`observed_targets`](ObserverAdapter::observed_targets)
//!    iff the platform accepted `observe` for it and it has not been stopped.
//! 2. After `stop(target)` no record attributed to `target` is forwarded or
//!    returned from `take_records`, even if the platform had already queued
//!    it.
//! 3. A failed `observe` leaves the target unobserved.
//!
//! # Failure Modes
//!
//! - **Primitive unavailable**: the adapter is inert. `start` reports
//!   `Ok(false)` and nothing is ever forwarded.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use tracing::{trace, warn};

use crate::error::Result;
use crate::platform::{ObserverFactory, ObserverKind, ObserverRecord, PlatformObserver, RecordSink};
use crate::tree::NodeId;

type ActiveSet = Rc<RefCell<AHashSet<NodeId>>>;

/// Owns one platform observer of kind `K`.
pub struct ObserverAdapter<K: ObserverKind> {
    observer: Option<Box<dyn PlatformObserver<K>>>,
    active: ActiveSet,
}

impl<K: ObserverKind> fmt::Debug for ObserverAdapter<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverAdapter")
            .field("kind", &K::NAME)
            .field("available", &self.is_available())
            .field("observed", &self.observed_targets())
            .finish()
    }
}

fn retain_active<R: ObserverRecord>(active: &ActiveSet, records: Vec<R>) -> Vec<R> {
    let active = active.borrow();
    records
        .into_iter()
        .filter(|record| active.contains(&record.observed_target()))
        .collect()
}

impl<K: ObserverKind> ObserverAdapter<K> {
    /// Create the platform observer through `factory`; batches are passed
    /// to `forward`.
    pub fn new(
        factory: &dyn ObserverFactory<K>,
        forward: impl Fn(Vec<K::Record>) + 'static,
    ) -> Self {
        let active: ActiveSet = Rc::new(RefCell::new(AHashSet::new()));
        let filter = Rc::clone(&active);
        let sink: RecordSink<K::Record> = Box::new(move |records| {
            let delivered = records.len();
            let records = retain_active(&filter, records);
            if records.len() < delivered {
                trace!(
                    kind = K::NAME,
                    dropped = delivered - records.len(),
                    "dropped records for stopped targets"
                );
            }
            if !records.is_empty() {
                forward(records);
            }
        });
        let observer = factory.create_observer(sink);
        if observer.is_none() {
            warn!(kind = K::NAME, "observer unavailable on this platform; observation disabled");
        }
        Self { observer, active }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.observer.is_some()
    }

    /// Begin watching `target`. Returns `Ok(true)` if observation started,
    /// `Ok(false)` if it was already running or the primitive is missing.
    pub fn start(&self, target: NodeId, options: &K::Options) -> Result<bool> {
        let Some(observer) = &self.observer else {
            return Ok(false);
        };
        if self.active.borrow().contains(&target) {
            return Ok(false);
        }
        observer.observe(target, options)?;
        self.active.borrow_mut().insert(target);
        Ok(true)
    }

    /// Stop watching `target`. Returns whether it was being watched.
    pub fn stop(&self, target: NodeId) -> bool {
        if !self.active.borrow_mut().remove(&target) {
            return false;
        }
        if let Some(observer) = &self.observer {
            observer.unobserve(target);
        }
        true
    }

    pub fn stop_all(&self) {
        self.active.borrow_mut().clear();
        if let Some(observer) = &self.observer {
            observer.disconnect();
        }
    }

    /// Drain records the platform has queued but not yet delivered.
    pub fn take_records(&self) -> Vec<K::Record> {
        match &self.observer {
            Some(observer) => retain_active(&self.active, observer.take_records()),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_observing(&self, target: NodeId) -> bool {
        self.active.borrow().contains(&target)
    }

    /// Watched targets, in id order.
    #[must_use]
    pub fn observed_targets(&self) -> Vec<NodeId> {
        let mut targets: Vec<NodeId> = self.active.borrow().iter().copied().collect();
        targets.sort_unstable();
        targets
    }
}

impl<K: ObserverKind> Drop for ObserverAdapter<K> {
    fn drop(&mut self) {
        self.stop_all();
    }
}
