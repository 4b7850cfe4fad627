#![forbid(unsafe_code)]

//! Retained node tree: the platform the observers watch.
//!
//! A [`NodeTree`] is a small document model: element nodes (a tag plus
//! ordered attributes) and text nodes, linked into a tree under a connected
//! root. Every node carries a cell-space [`Rect`]; the tree carries a
//! viewport. Geometry is absolute, not derived from the parent.
//!
//! Structural, attribute and text edits are announced to
//! [`ChangeListener`]s as [`TreeChange`]s after the edit is applied.
//! [`FrameListener`]s are sampled once per scheduler frame while any of
//! them reports that it still needs frames.
//!
//! # Invariants
//!
//! 1. A node has at most one parent and appears exactly once in that
//!    parent's child list.
//! 2. The root has no parent and can never be moved.
//! 3. Listeners run after the node storage borrow is released; they may
//!    read the tree freely.
//! 4. Nodes are never freed; a removed node keeps its id and can be
//!    re-inserted.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::{ObserverError, Result};
use crate::platform::PlatformSupport;
use crate::scheduler::Scheduler;

/// Identity of a node in a [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Storage slot; `None` when the id cannot address memory on this
    /// target, which lookups treat as unknown.
    fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-aligned rectangle in terminal cells.
///
/// Origins may be negative (off-screen); sizes may be zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    #[must_use]
    pub fn right(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    #[must_use]
    pub fn bottom(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlap of two rectangles, edge-inclusive: rectangles that only touch
    /// intersect with zero area.
    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let left = i64::from(self.x.max(other.x));
        let top = i64::from(self.y.max(other.y));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right < left || bottom < top {
            return None;
        }
        Some(Rect {
            x: left as i32,
            y: top as i32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }

    /// Grow (positive) or shrink (negative) by `margin` on every side.
    /// Shrinking past zero collapses to an empty rect at the center.
    #[must_use]
    pub fn inflate(&self, margin: i32) -> Rect {
        let m = i64::from(margin);
        let width = (i64::from(self.width) + 2 * m).max(0);
        let height = (i64::from(self.height) + 2 * m).max(0);
        let x = if width == 0 {
            i64::from(self.x) + i64::from(self.width) / 2
        } else {
            i64::from(self.x) - m
        };
        let y = if height == 0 {
            i64::from(self.y) + i64::from(self.height) / 2
        } else {
            i64::from(self.y) - m
        };
        Rect {
            x: clamp_i32(x),
            y: clamp_i32(y),
            width: width.min(i64::from(u32::MAX)) as u32,
            height: height.min(i64::from(u32::MAX)) as u32,
        }
    }
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Default geometry for new nodes and the viewport.
const DEFAULT_NODE_RECT: Rect = Rect::new(0, 0, 1, 1);
const DEFAULT_VIEWPORT: Rect = Rect::new(0, 0, 80, 24);
const ROOT_TAG: &str = "root";

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    rect: Rect,
}

fn node_mut(nodes: &mut [Node], id: NodeId) -> Option<&mut Node> {
    id.index().and_then(|i| nodes.get_mut(i))
}

/// An applied edit, as announced to [`ChangeListener`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeChange {
    Attribute {
        target: NodeId,
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        target: NodeId,
        old_value: String,
    },
    ChildList {
        target: NodeId,
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
}

impl TreeChange {
    /// The node whose attributes, text or child list changed.
    #[must_use]
    pub fn target(&self) -> NodeId {
        match self {
            Self::Attribute { target, .. }
            | Self::CharacterData { target, .. }
            | Self::ChildList { target, .. } => *target,
        }
    }
}

/// Receives every applied edit.
pub trait ChangeListener {
    fn tree_changed(&self, tree: &NodeTree, change: &TreeChange);
}

/// Sampled once per frame. Returns whether it still needs frames.
pub trait FrameListener {
    fn frame(&self, tree: &NodeTree) -> bool;
}

struct TreeInner {
    scheduler: Scheduler,
    support: PlatformSupport,
    root: NodeId,
    nodes: RefCell<Vec<Node>>,
    viewport: Cell<Rect>,
    change_listeners: RefCell<Vec<Weak<dyn ChangeListener>>>,
    frame_listeners: RefCell<Vec<Weak<dyn FrameListener>>>,
    frame_scheduled: Cell<bool>,
}

/// Shared handle to a node tree. Cloning shares the tree.
#[derive(Clone)]
pub struct NodeTree {
    inner: Rc<TreeInner>,
}

impl fmt::Debug for NodeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeTree")
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("viewport", &self.inner.viewport.get())
            .field("support", &self.inner.support)
            .finish()
    }
}

impl NodeTree {
    #[must_use]
    pub fn new(scheduler: &Scheduler) -> Self {
        Self::with_support(scheduler, PlatformSupport::default())
    }

    /// Create a tree whose platform offers only the primitives in `support`.
    #[must_use]
    pub fn with_support(scheduler: &Scheduler, support: PlatformSupport) -> Self {
        let root = Node {
            data: NodeData::Element {
                tag: ROOT_TAG.to_string(),
                attributes: Vec::new(),
            },
            parent: None,
            children: Vec::new(),
            rect: DEFAULT_VIEWPORT,
        };
        Self {
            inner: Rc::new(TreeInner {
                scheduler: scheduler.clone(),
                support,
                root: NodeId(0),
                nodes: RefCell::new(vec![root]),
                viewport: Cell::new(DEFAULT_VIEWPORT),
                change_listeners: RefCell::new(Vec::new()),
                frame_listeners: RefCell::new(Vec::new()),
                frame_scheduled: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    #[must_use]
    pub fn support(&self) -> PlatformSupport {
        self.inner.support
    }

    /// The always-connected root node.
    #[must_use]
    pub fn root(&self) -> NodeId {
        self.inner.root
    }

    // ── Node creation and queries ──────────────────────────────────────

    pub fn create_element(&self, tag: impl Into<String>) -> NodeId {
        self.push_node(NodeData::Element {
            tag: tag.into(),
            attributes: Vec::new(),
        })
    }

    pub fn create_text(&self, data: impl Into<String>) -> NodeId {
        self.push_node(NodeData::Text(data.into()))
    }

    fn push_node(&self, data: NodeData) -> NodeId {
        let mut nodes = self.inner.nodes.borrow_mut();
        let id = NodeId(nodes.len() as u64);
        nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
            rect: DEFAULT_NODE_RECT,
        });
        id
    }

    fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        let nodes = self.inner.nodes.borrow();
        id.index()
            .and_then(|i| nodes.get(i))
            .map(f)
            .ok_or(ObserverError::UnknownNode(id))
    }

    fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Result<R> {
        let mut nodes = self.inner.nodes.borrow_mut();
        node_mut(&mut nodes, id)
            .map(f)
            .ok_or(ObserverError::UnknownNode(id))
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        id.index()
            .is_some_and(|i| i < self.inner.nodes.borrow().len())
    }

    /// Tag of an element node; `None` for text nodes and unknown ids.
    #[must_use]
    pub fn local_name(&self, id: NodeId) -> Option<String> {
        self.with_node(id, |node| match &node.data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            NodeData::Text(_) => None,
        })
        .ok()
        .flatten()
    }

    #[must_use]
    pub fn is_text(&self, id: NodeId) -> bool {
        self.with_node(id, |node| matches!(node.data, NodeData::Text(_)))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.with_node(id, |node| node.parent).ok().flatten()
    }

    #[must_use]
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.with_node(id, |node| node.children.clone())
            .unwrap_or_default()
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let nodes = self.inner.nodes.borrow();
        let mut cursor = Some(node);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = id.index().and_then(|i| nodes.get(i)).and_then(|n| n.parent);
        }
        false
    }

    /// Whether `id` is reachable from the root.
    #[must_use]
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.contains(id) && self.is_inclusive_ancestor(self.inner.root, id)
    }

    // ── Attributes and text ────────────────────────────────────────────

    #[must_use]
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        self.with_node(id, |node| match &node.data {
            NodeData::Element { attributes, .. } => attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.clone()),
            NodeData::Text(_) => None,
        })
        .ok()
        .flatten()
    }

    #[must_use]
    pub fn attributes(&self, id: NodeId) -> Vec<(String, String)> {
        self.with_node(id, |node| match &node.data {
            NodeData::Element { attributes, .. } => attributes.clone(),
            NodeData::Text(_) => Vec::new(),
        })
        .unwrap_or_default()
    }

    /// Set (or overwrite) an attribute. Announced even when the value is
    /// unchanged.
    pub fn set_attribute(&self, id: NodeId, name: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        let old_value = self.with_node_mut(id, |node| match &mut node.data {
            NodeData::Element { attributes, .. } => {
                match attributes.iter_mut().find(|(n, _)| n == name) {
                    Some((_, slot)) => Ok(Some(std::mem::replace(slot, value))),
                    None => {
                        attributes.push((name.to_string(), value));
                        Ok(None)
                    }
                }
            }
            NodeData::Text(_) => Err(ObserverError::NotAnElement(id)),
        })??;
        self.notify(TreeChange::Attribute {
            target: id,
            name: name.to_string(),
            old_value,
        });
        Ok(())
    }

    /// Remove an attribute. Returns whether it existed.
    pub fn remove_attribute(&self, id: NodeId, name: &str) -> Result<bool> {
        let removed = self.with_node_mut(id, |node| match &mut node.data {
            NodeData::Element { attributes, .. } => {
                let pos = attributes.iter().position(|(n, _)| n == name);
                Ok(pos.map(|pos| attributes.remove(pos).1))
            }
            NodeData::Text(_) => Err(ObserverError::NotAnElement(id)),
        })??;
        let Some(old_value) = removed else {
            return Ok(false);
        };
        self.notify(TreeChange::Attribute {
            target: id,
            name: name.to_string(),
            old_value: Some(old_value),
        });
        Ok(true)
    }

    #[must_use]
    pub fn text(&self, id: NodeId) -> Option<String> {
        self.with_node(id, |node| match &node.data {
            NodeData::Text(data) => Some(data.clone()),
            NodeData::Element { .. } => None,
        })
        .ok()
        .flatten()
    }

    pub fn set_text(&self, id: NodeId, data: impl Into<String>) -> Result<()> {
        let data = data.into();
        let old_value = self.with_node_mut(id, |node| match &mut node.data {
            NodeData::Text(current) => Ok(std::mem::replace(current, data)),
            NodeData::Element { .. } => Err(ObserverError::NotText(id)),
        })??;
        self.notify(TreeChange::CharacterData {
            target: id,
            old_value,
        });
        Ok(())
    }

    // ── Structure ──────────────────────────────────────────────────────

    /// Append `child` as the last child of `parent`, detaching it from its
    /// previous parent first.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        if !self.contains(parent) {
            return Err(ObserverError::UnknownNode(parent));
        }
        if !self.contains(child) {
            return Err(ObserverError::UnknownNode(child));
        }
        if self.is_text(parent) {
            return Err(ObserverError::Hierarchy {
                parent,
                child,
                reason: "text nodes cannot have children",
            });
        }
        if child == self.inner.root {
            return Err(ObserverError::Hierarchy {
                parent,
                child,
                reason: "the root cannot be moved",
            });
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(ObserverError::Hierarchy {
                parent,
                child,
                reason: "a node cannot contain itself",
            });
        }

        self.detach(child);
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            if let Some(node) = node_mut(&mut nodes, child) {
                node.parent = Some(parent);
            }
            if let Some(node) = node_mut(&mut nodes, parent) {
                node.children.push(child);
            }
        }
        self.notify(TreeChange::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Detach `id` from its parent. Returns whether it had one.
    pub fn remove(&self, id: NodeId) -> Result<bool> {
        if !self.contains(id) {
            return Err(ObserverError::UnknownNode(id));
        }
        Ok(self.detach(id))
    }

    fn detach(&self, id: NodeId) -> bool {
        let parent = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let Some(parent) = node_mut(&mut nodes, id).and_then(|n| n.parent.take()) else {
                return false;
            };
            if let Some(node) = node_mut(&mut nodes, parent) {
                node.children.retain(|c| *c != id);
            }
            parent
        };
        self.notify(TreeChange::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![id],
        });
        true
    }

    // ── Geometry ───────────────────────────────────────────────────────

    #[must_use]
    pub fn rect(&self, id: NodeId) -> Option<Rect> {
        self.with_node(id, |node| node.rect).ok()
    }

    /// Move or resize a node. Geometry edits are not tree changes; they are
    /// picked up by frame sampling.
    pub fn set_rect(&self, id: NodeId, rect: Rect) -> Result<()> {
        self.with_node_mut(id, |node| node.rect = rect)
    }

    #[must_use]
    pub fn viewport(&self) -> Rect {
        self.inner.viewport.get()
    }

    pub fn set_viewport(&self, viewport: Rect) {
        self.inner.viewport.set(viewport);
        let root = self.inner.root;
        if let Some(node) = node_mut(&mut self.inner.nodes.borrow_mut(), root) {
            node.rect = viewport;
        }
    }

    // ── Listeners ──────────────────────────────────────────────────────

    pub fn add_change_listener(&self, listener: Weak<dyn ChangeListener>) {
        self.inner.change_listeners.borrow_mut().push(listener);
    }

    /// Register a frame listener and make sure a frame step is pending.
    pub fn add_frame_listener(&self, listener: Weak<dyn FrameListener>) {
        self.inner.frame_listeners.borrow_mut().push(listener);
        self.ensure_frame();
    }

    /// Schedule a frame step unless one is already pending.
    pub fn ensure_frame(&self) {
        if self.inner.frame_scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        self.inner.scheduler.request_frame(move || {
            if let Some(inner) = weak.upgrade() {
                NodeTree { inner }.run_frame();
            }
        });
    }

    fn run_frame(&self) {
        self.inner.frame_scheduled.set(false);
        let listeners: Vec<Rc<dyn FrameListener>> = {
            let mut list = self.inner.frame_listeners.borrow_mut();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        let mut active = false;
        for listener in listeners {
            active |= listener.frame(self);
        }
        if active {
            self.ensure_frame();
        }
    }

    fn notify(&self, change: TreeChange) {
        let listeners: Vec<Rc<dyn ChangeListener>> = {
            let mut list = self.inner.change_listeners.borrow_mut();
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        trace!(?change, listeners = listeners.len(), "tree change");
        for listener in listeners {
            listener.tree_changed(self, &change);
        }
    }
}
