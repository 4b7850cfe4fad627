#![forbid(unsafe_code)]

//! Mutation observation over a [`NodeTree`].
//!
//! Each observer keeps one registration per observed node. When the tree
//! announces a [`TreeChange`], every registration on the changed node (or on
//! an ancestor with `subtree` set) is checked against its options; if any is
//! interested, a single [`MutationRecord`] is queued for the observer and a
//! delivery microtask is scheduled. All records queued before the microtask
//! runs are delivered together, in the order the changes happened.
//!
//! The primitive does not report initial state: observing a node produces no
//! record until the node actually changes.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::controller::{ControllerConfig, ObservationController};
use crate::error::{ObserverError, Result};
use crate::platform::{ObserverFactory, ObserverKind, ObserverRecord, PlatformObserver, RecordSink};
use crate::scheduler::Scheduler;
use crate::tree::{ChangeListener, NodeId, NodeTree, TreeChange};

/// Controller over tree mutations.
pub type MutationController<V = bool> = ObservationController<Mutation, V>;

/// Construction options for a [`MutationController`].
pub type MutationControllerConfig<V = bool> = ControllerConfig<Mutation, V>;

/// Which edits a registration reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Children added to or removed from the target.
    pub child_list: bool,
    /// Attribute edits on the target.
    pub attributes: bool,
    /// Text edits on the target.
    pub character_data: bool,
    /// Extend the above to every descendant of the target.
    pub subtree: bool,
    /// Record the previous attribute value. Implies `attributes`.
    pub attribute_old_value: bool,
    /// Record the previous text. Implies `character_data`.
    pub character_data_old_value: bool,
    /// Only report these attribute names. Implies `attributes`.
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationOptions {
    #[must_use]
    pub fn with_child_list(mut self) -> Self {
        self.child_list = true;
        self
    }

    #[must_use]
    pub fn with_attributes(mut self) -> Self {
        self.attributes = true;
        self
    }

    #[must_use]
    pub fn with_character_data(mut self) -> Self {
        self.character_data = true;
        self
    }

    #[must_use]
    pub fn with_subtree(mut self) -> Self {
        self.subtree = true;
        self
    }

    #[must_use]
    pub fn with_attribute_old_value(mut self) -> Self {
        self.attribute_old_value = true;
        self
    }

    #[must_use]
    pub fn with_character_data_old_value(mut self) -> Self {
        self.character_data_old_value = true;
        self
    }

    #[must_use]
    pub fn with_attribute_filter<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_filter = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Apply the implication rules (old-value and filter flags switch on
    /// their base flag).
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut out = self.clone();
        if out.attribute_old_value || out.attribute_filter.is_some() {
            out.attributes = true;
        }
        if out.character_data_old_value {
            out.character_data = true;
        }
        out
    }

    fn wants_attribute(&self, name: &str) -> bool {
        self.attributes
            && self
                .attribute_filter
                .as_ref()
                .is_none_or(|filter| filter.iter().any(|n| n == name))
    }
}

/// What kind of edit a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

/// One reported edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationType,
    /// The node that changed.
    pub target: NodeId,
    /// The registration that reported the change (`target` or one of its
    /// ancestors observed with `subtree`).
    pub observed: NodeId,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

impl ObserverRecord for MutationRecord {
    fn observed_target(&self) -> NodeId {
        self.observed
    }
}

/// Marker for the mutation primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mutation;

impl ObserverKind for Mutation {
    type Options = MutationOptions;
    type Record = MutationRecord;

    const NAME: &'static str = "mutation";
    const REPORTS_INITIAL: bool = false;

    fn validate(options: &MutationOptions) -> Result<()> {
        let options = options.normalized();
        if !(options.child_list || options.attributes || options.character_data) {
            return Err(ObserverError::invalid_options(
                Self::NAME,
                "at least one of child_list, attributes or character_data must be set",
            ));
        }
        Ok(())
    }
}

// ── Tree-backed observer ────────────────────────────────────────────────

struct MutationObserverInner {
    this: Weak<MutationObserverInner>,
    scheduler: Scheduler,
    /// Normalized options per observed node, in observe order.
    registrations: RefCell<Vec<(NodeId, MutationOptions)>>,
    queue: RefCell<Vec<MutationRecord>>,
    delivery_scheduled: Cell<bool>,
    sink: RecordSink<MutationRecord>,
}

impl MutationObserverInner {
    fn record_for(&self, tree: &NodeTree, change: &TreeChange) -> Option<MutationRecord> {
        let changed = change.target();
        let registrations = self.registrations.borrow();

        // The exact target wins attribution; otherwise the nearest ancestor.
        let mut observed: Option<(NodeId, usize)> = None;
        let mut old_value = false;
        for (node, options) in registrations.iter() {
            let depth = if *node == changed {
                0
            } else if options.subtree && tree.is_inclusive_ancestor(*node, changed) {
                depth_between(tree, *node, changed)
            } else {
                continue;
            };
            let interested = match change {
                TreeChange::Attribute { name, .. } => {
                    let wanted = options.wants_attribute(name);
                    old_value |= wanted && options.attribute_old_value;
                    wanted
                }
                TreeChange::CharacterData { .. } => {
                    old_value |= options.character_data && options.character_data_old_value;
                    options.character_data
                }
                TreeChange::ChildList { .. } => options.child_list,
            };
            if interested && observed.is_none_or(|(_, best)| depth < best) {
                observed = Some((*node, depth));
            }
        }
        let (observed, _) = observed?;

        let record = match change {
            TreeChange::Attribute {
                target,
                name,
                old_value: previous,
            } => MutationRecord {
                kind: MutationType::Attributes,
                target: *target,
                observed,
                attribute_name: Some(name.clone()),
                old_value: if old_value { previous.clone() } else { None },
                added_nodes: Vec::new(),
                removed_nodes: Vec::new(),
            },
            TreeChange::CharacterData {
                target,
                old_value: previous,
            } => MutationRecord {
                kind: MutationType::CharacterData,
                target: *target,
                observed,
                attribute_name: None,
                old_value: old_value.then(|| previous.clone()),
                added_nodes: Vec::new(),
                removed_nodes: Vec::new(),
            },
            TreeChange::ChildList {
                target,
                added,
                removed,
            } => MutationRecord {
                kind: MutationType::ChildList,
                target: *target,
                observed,
                attribute_name: None,
                old_value: None,
                added_nodes: added.clone(),
                removed_nodes: removed.clone(),
            },
        };
        Some(record)
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
        let records = std::mem::take(&mut *self.queue.borrow_mut());
        if !records.is_empty() {
            (self.sink)(records);
        }
    }
}

fn depth_between(tree: &NodeTree, ancestor: NodeId, node: NodeId) -> usize {
    let mut depth = 0;
    let mut cursor = Some(node);
    while let Some(id) = cursor {
        if id == ancestor {
            break;
        }
        depth += 1;
        cursor = tree.parent(id);
    }
    depth
}

impl ChangeListener for MutationObserverInner {
    fn tree_changed(&self, tree: &NodeTree, change: &TreeChange) {
        if let Some(record) = self.record_for(tree, change) {
            self.queue.borrow_mut().push(record);
            self.schedule_delivery();
        }
    }
}

/// Mutation observer backed by a [`NodeTree`].
pub struct TreeMutationObserver {
    tree: NodeTree,
    inner: Rc<MutationObserverInner>,
}

impl PlatformObserver<Mutation> for TreeMutationObserver {
    fn observe(&self, target: NodeId, options: &MutationOptions) -> Result<()> {
        if !self.tree.contains(target) {
            return Err(ObserverError::UnknownNode(target));
        }
        Mutation::validate(options)?;
        let options = options.normalized();
        let mut registrations = self.inner.registrations.borrow_mut();
        match registrations.iter_mut().find(|(node, _)| *node == target) {
            Some((_, existing)) => *existing = options,
            None => registrations.push((target, options)),
        }
        Ok(())
    }

    fn unobserve(&self, target: NodeId) {
        self.inner
            .registrations
            .borrow_mut()
            .retain(|(node, _)| *node != target);
        self.inner
            .queue
            .borrow_mut()
            .retain(|record| record.observed != target);
    }

    fn take_records(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut *self.inner.queue.borrow_mut())
    }

    fn disconnect(&self) {
        self.inner.registrations.borrow_mut().clear();
        self.inner.queue.borrow_mut().clear();
    }
}

impl ObserverFactory<Mutation> for NodeTree {
    fn create_observer(
        &self,
        sink: RecordSink<MutationRecord>,
    ) -> Option<Box<dyn PlatformObserver<Mutation>>> {
        if !self.support().mutation {
            return None;
        }
        let inner = Rc::new_cyclic(|this| MutationObserverInner {
            this: this.clone(),
            scheduler: self.scheduler().clone(),
            registrations: RefCell::new(Vec::new()),
            queue: RefCell::new(Vec::new()),
            delivery_scheduled: Cell::new(false),
            sink,
        });
        let listener: Weak<dyn ChangeListener> = Rc::downgrade(&inner) as Weak<dyn ChangeListener>;
        self.add_change_listener(listener);
        Some(Box::new(TreeMutationObserver {
            tree: self.clone(),
            inner,
        }))
    }
}
