#![forbid(unsafe_code)]

//! Intersection observation over [`NodeTree`] geometry.
//!
//! Once per frame the observer samples every registered target against its
//! root bounds (the viewport, or the rect of an explicit root node, grown or
//! shrunk by `root_margin`). An [`IntersectionEntry`] is queued whenever the
//! target's threshold index or intersecting state differs from the previous
//! sample; the first sample after `observe` always reports. Queued entries
//! are delivered together on a microtask queued from the frame step.
//!
//! # Geometry rules
//!
//! - Overlap is edge-inclusive: a target touching the root bounds
//!   intersects with ratio 0.
//! - A target that is not connected, or not inside the explicit root,
//!   never intersects.
//! - A zero-area target that intersects has ratio 1.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::controller::{ControllerConfig, ObservationController};
use crate::error::{ObserverError, Result};
use crate::platform::{ObserverFactory, ObserverKind, ObserverRecord, PlatformObserver, RecordSink};
use crate::scheduler::Scheduler;
use crate::tree::{FrameListener, NodeId, NodeTree, Rect};

/// Controller over target visibility.
pub type IntersectionController<V = bool> = ObservationController<Intersection, V>;

/// Construction options for an [`IntersectionController`].
pub type IntersectionControllerConfig<V = bool> = ControllerConfig<Intersection, V>;

/// How a target's visibility is measured.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionOptions {
    /// Node whose rect bounds visibility. `None` uses the viewport.
    pub root: Option<NodeId>,
    /// Cells added to (or, if negative, removed from) each side of the root
    /// bounds. Default: 0.
    pub root_margin: i32,
    /// Visible-ratio crossings that trigger an entry. Default: `[0.0]`.
    pub thresholds: Vec<f64>,
}

impl Default for IntersectionOptions {
    fn default() -> Self {
        Self {
            root: None,
            root_margin: 0,
            thresholds: vec![0.0],
        }
    }
}

impl IntersectionOptions {
    #[must_use]
    pub fn with_root(mut self, root: NodeId) -> Self {
        self.root = Some(root);
        self
    }

    #[must_use]
    pub fn with_root_margin(mut self, margin: i32) -> Self {
        self.root_margin = margin;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: impl Into<Vec<f64>>) -> Self {
        self.thresholds = thresholds.into();
        self
    }

    /// Thresholds sorted ascending; an empty list means `[0.0]`.
    #[must_use]
    pub fn sorted_thresholds(&self) -> Vec<f64> {
        if self.thresholds.is_empty() {
            return vec![0.0];
        }
        let mut sorted = self.thresholds.clone();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

/// One visibility change of a target.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: NodeId,
    /// Scheduler frame the sample was taken in.
    pub frame: u64,
    pub is_intersecting: bool,
    /// Visible area over target area, in `[0, 1]`.
    pub intersection_ratio: f64,
    pub bounding_rect: Rect,
    /// Visible part of the target; empty when not intersecting.
    pub intersection_rect: Rect,
    pub root_bounds: Rect,
}

impl ObserverRecord for IntersectionEntry {
    fn observed_target(&self) -> NodeId {
        self.target
    }
}

/// Marker for the intersection primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Intersection;

impl ObserverKind for Intersection {
    type Options = IntersectionOptions;
    type Record = IntersectionEntry;

    const NAME: &'static str = "intersection";
    const REPORTS_INITIAL: bool = true;

    fn validate(options: &IntersectionOptions) -> Result<()> {
        if let Some(bad) = options
            .thresholds
            .iter()
            .find(|t| !t.is_finite() || !(0.0..=1.0).contains(*t))
        {
            return Err(ObserverError::invalid_options(
                Self::NAME,
                format!("threshold {bad} is outside [0, 1]"),
            ));
        }
        Ok(())
    }

    fn referenced_nodes(options: &IntersectionOptions) -> Vec<NodeId> {
        options.root.into_iter().collect()
    }
}

// ── Tree-backed observer ────────────────────────────────────────────────

#[derive(Debug)]
struct Registration {
    options: IntersectionOptions,
    thresholds: Vec<f64>,
    /// `(threshold index, is_intersecting)` of the previous sample.
    previous: Option<(usize, bool)>,
}

struct IntersectionObserverInner {
    this: Weak<IntersectionObserverInner>,
    scheduler: Scheduler,
    /// Registration order, for deterministic entry order.
    order: RefCell<Vec<NodeId>>,
    registrations: RefCell<AHashMap<NodeId, Registration>>,
    queue: RefCell<Vec<IntersectionEntry>>,
    delivery_scheduled: Cell<bool>,
    sink: RecordSink<IntersectionEntry>,
}

impl IntersectionObserverInner {
    fn sample(&self, tree: &NodeTree, target: NodeId, options: &IntersectionOptions) -> IntersectionEntry {
        let bounding_rect = tree.rect(target).unwrap_or_default();
        let root_rect = match options.root {
            Some(root) => tree.rect(root).unwrap_or_default(),
            None => tree.viewport(),
        };
        let root_bounds = root_rect.inflate(options.root_margin);

        let reachable = match options.root {
            Some(root) => {
                root != target
                    && tree.is_connected(root)
                    && tree.is_inclusive_ancestor(root, target)
            }
            None => tree.is_connected(target),
        };
        let overlap = if reachable {
            bounding_rect.intersection(&root_bounds)
        } else {
            None
        };

        let (is_intersecting, intersection_ratio, intersection_rect) = match overlap {
            Some(visible) => {
                let area = bounding_rect.area();
                let ratio = if area == 0 {
                    1.0
                } else {
                    visible.area() as f64 / area as f64
                };
                (true, ratio, visible)
            }
            None => (false, 0.0, Rect::default()),
        };

        IntersectionEntry {
            target,
            frame: self.scheduler.frame(),
            is_intersecting,
            intersection_ratio,
            bounding_rect,
            intersection_rect,
            root_bounds,
        }
    }

    fn schedule_delivery(&self) {
        if self.delivery_scheduled.replace(true) {
            return;
        }
        let weak = self.this.clone();
        self.scheduler.queue_microtask(move || {
            if let Some(inner) = weak.upgrade() {
                inner.deliver();
            }
        });
    }

    fn deliver(&self) {
        self.delivery_scheduled.set(false);
        let entries = std::mem::take(&mut *self.queue.borrow_mut());
        if !entries.is_empty() {
            (self.sink)(entries);
        }
    }
}

fn threshold_index(thresholds: &[f64], entry: &IntersectionEntry) -> usize {
    if !entry.is_intersecting {
        return 0;
    }
    thresholds
        .iter()
        .filter(|t| **t <= entry.intersection_ratio)
        .count()
}

impl FrameListener for IntersectionObserverInner {
    fn frame(&self, tree: &NodeTree) -> bool {
        let targets = self.order.borrow().clone();
        let mut queued = 0usize;
        for target in targets {
            let options = match self.registrations.borrow().get(&target) {
                Some(registration) => registration.options.clone(),
                None => continue,
            };
            let entry = self.sample(tree, target, &options);
            let changed = {
                let mut registrations = self.registrations.borrow_mut();
                let Some(registration) = registrations.get_mut(&target) else {
                    continue;
                };
                let state = (
                    threshold_index(&registration.thresholds, &entry),
                    entry.is_intersecting,
                );
                registration.previous.replace(state) != Some(state)
            };
            if changed {
                self.queue.borrow_mut().push(entry);
                queued += 1;
            }
        }
        if queued > 0 {
            trace!(queued, frame = self.scheduler.frame(), "intersection sample");
            self.schedule_delivery();
        }
        !self.order.borrow().is_empty()
    }
}

/// Intersection observer backed by [`NodeTree`] geometry.
pub struct TreeIntersectionObserver {
    tree: NodeTree,
    inner: Rc<IntersectionObserverInner>,
}

impl PlatformObserver<Intersection> for TreeIntersectionObserver {
    fn observe(&self, target: NodeId, options: &IntersectionOptions) -> Result<()> {
        if !self.tree.contains(target) {
            return Err(ObserverError::UnknownNode(target));
        }
        if let Some(root) = options.root.filter(|root| !self.tree.contains(*root)) {
            return Err(ObserverError::UnknownNode(root));
        }
        Intersection::validate(options)?;
        if self.inner.registrations.borrow().contains_key(&target) {
            return Ok(());
        }
        self.inner.registrations.borrow_mut().insert(
            target,
            Registration {
                options: options.clone(),
                thresholds: options.sorted_thresholds(),
                previous: None,
            },
        );
        self.inner.order.borrow_mut().push(target);
        self.tree.ensure_frame();
        Ok(())
    }

    fn unobserve(&self, target: NodeId) {
        self.inner.registrations.borrow_mut().remove(&target);
        self.inner.order.borrow_mut().retain(|id| *id != target);
        self.inner
            .queue
            .borrow_mut()
            .retain(|entry| entry.target != target);
    }

    fn take_records(&self) -> Vec<IntersectionEntry> {
        std::mem::take(&mut *self.inner.queue.borrow_mut())
    }

    fn disconnect(&self) {
        self.inner.registrations.borrow_mut().clear();
        self.inner.order.borrow_mut().clear();
        self.inner.queue.borrow_mut().clear();
    }
}

impl ObserverFactory<Intersection> for NodeTree {
    fn create_observer(
        &self,
        sink: RecordSink<IntersectionEntry>,
    ) -> Option<Box<dyn PlatformObserver<Intersection>>> {
        if !self.support().intersection {
            return None;
        }
        let inner = Rc::new_cyclic(|this| IntersectionObserverInner {
            this: this.clone(),
            scheduler: self.scheduler().clone(),
            order: RefCell::new(Vec::new()),
            registrations: RefCell::new(AHashMap::new()),
            queue: RefCell::new(Vec::new()),
            delivery_scheduled: Cell::new(false),
            sink,
        });
        let listener: Weak<dyn FrameListener> = Rc::downgrade(&inner) as Weak<dyn FrameListener>;
        self.add_frame_listener(listener);
        Some(Box::new(TreeIntersectionObserver {
            tree: self.clone(),
            inner,
        }))
    }
}
