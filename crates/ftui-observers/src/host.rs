#![forbid(unsafe_code)]

//! Reactive host: the component whose lifecycle drives controllers.
//!
//! A [`ReactiveHost`] owns one element in a [`NodeTree`] and tracks whether
//! that element is connected. It exposes five hook lists ([`HostHook`]) and
//! a coalescing [`request_update`](ReactiveHost::request_update).
//!
//! # Update cycle
//!
//! ```text
//! request_update ─▶ microtask ─▶ PreUpdate ─▶ Update ─▶ PostUpdate
//!                                └──── is_updating() ───┘
//! ```
//!
//! # Invariants
//!
//! 1. At most one update pass is queued at a time; requests made before it
//!    runs are folded into it.
//! 2. A request made during a pass queues exactly one follow-up pass.
//! 3. Requests made while disconnected are held until the next connection.
//!    The first connection always runs the initial pass.
//! 4. Connection state follows the tree: moving, removing or re-inserting
//!    the element or any ancestor fires `Connected`/`Disconnected` on each
//!    transition, synchronously with the edit.
//! 5. Hooks run in registration order over a snapshot; hooks registered
//!    during a run are first called on the next run.
//!
//! # Failure Modes
//!
//! - **Host dropped with a pass queued**: the microtask finds no host and
//!   does nothing.
//! - **Subscription dropped mid-run**: the snapshot keeps the callback alive
//!   until the run completes.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::tree::{ChangeListener, NodeId, NodeTree, TreeChange};

/// Host lifecycle phase a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostHook {
    Connected,
    Disconnected,
    PreUpdate,
    Update,
    PostUpdate,
}

impl HostHook {
    const COUNT: usize = 5;

    const fn slot(self) -> usize {
        match self {
            Self::Connected => 0,
            Self::Disconnected => 1,
            Self::PreUpdate => 2,
            Self::Update => 3,
            Self::PostUpdate => 4,
        }
    }
}

type HookFn = dyn Fn(&ReactiveHost);

/// RAII guard for a hook. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the hook"]
pub struct HookSubscription {
    _callback: Rc<HookFn>,
}

impl fmt::Debug for HookSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSubscription").finish_non_exhaustive()
    }
}

struct HostInner {
    this: Weak<HostInner>,
    tree: NodeTree,
    element: NodeId,
    connected: Cell<bool>,
    update_pending: Cell<bool>,
    update_scheduled: Cell<bool>,
    updating: Cell<bool>,
    update_count: Cell<u64>,
    hooks: RefCell<[Vec<Weak<HookFn>>; HostHook::COUNT]>,
}

impl HostInner {
    fn handle(&self) -> Option<ReactiveHost> {
        self.this.upgrade().map(|inner| ReactiveHost { inner })
    }
}

impl ChangeListener for HostInner {
    fn tree_changed(&self, _tree: &NodeTree, change: &TreeChange) {
        if !matches!(change, TreeChange::ChildList { .. }) {
            return;
        }
        if let Some(host) = self.handle() {
            host.sync_connection();
        }
    }
}

/// Shared handle to a host component. Cloning shares the host.
#[derive(Clone)]
pub struct ReactiveHost {
    inner: Rc<HostInner>,
}

/// Non-owning reference to a [`ReactiveHost`].
#[derive(Clone)]
pub struct WeakHost {
    inner: Weak<HostInner>,
}

impl WeakHost {
    #[must_use]
    pub fn upgrade(&self) -> Option<ReactiveHost> {
        self.inner.upgrade().map(|inner| ReactiveHost { inner })
    }
}

impl fmt::Debug for WeakHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHost")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for ReactiveHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveHost")
            .field("element", &self.inner.element)
            .field("connected", &self.inner.connected.get())
            .field("updating", &self.inner.updating.get())
            .field("update_count", &self.inner.update_count.get())
            .finish()
    }
}

impl ReactiveHost {
    /// Create a host element tagged `tag`. The host starts disconnected with
    /// its initial update pending.
    pub fn new(tree: &NodeTree, tag: &str) -> Self {
        let element = tree.create_element(tag);
        let inner = Rc::new_cyclic(|this| HostInner {
            this: this.clone(),
            tree: tree.clone(),
            element,
            connected: Cell::new(false),
            update_pending: Cell::new(true),
            update_scheduled: Cell::new(false),
            updating: Cell::new(false),
            update_count: Cell::new(0),
            hooks: RefCell::new(Default::default()),
        });
        let listener: Weak<dyn ChangeListener> = Rc::downgrade(&inner) as Weak<dyn ChangeListener>;
        tree.add_change_listener(listener);
        Self { inner }
    }

    #[must_use]
    pub fn element(&self) -> NodeId {
        self.inner.element
    }

    /// Default observation target for controllers. Hosts render directly
    /// into their element.
    #[must_use]
    pub fn render_root(&self) -> NodeId {
        self.inner.element
    }

    #[must_use]
    pub fn tree(&self) -> &NodeTree {
        &self.inner.tree
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        self.inner.tree.scheduler()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.get()
    }

    /// True during the `PreUpdate` and `Update` phases of a pass.
    #[must_use]
    pub fn is_updating(&self) -> bool {
        self.inner.updating.get()
    }

    /// Number of completed update passes.
    #[must_use]
    pub fn update_count(&self) -> u64 {
        self.inner.update_count.get()
    }

    #[must_use]
    pub fn is_update_pending(&self) -> bool {
        self.inner.update_pending.get()
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakHost {
        WeakHost {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Append the host element to `parent`.
    pub fn attach_to(&self, parent: NodeId) -> Result<()> {
        self.inner.tree.append_child(parent, self.inner.element)?;
        self.sync_connection();
        Ok(())
    }

    /// Detach the host element from its parent.
    pub fn remove(&self) -> Result<()> {
        self.inner.tree.remove(self.inner.element)?;
        self.sync_connection();
        Ok(())
    }

    /// Re-read connection state from the tree and fire hooks on a
    /// transition. Idempotent.
    pub fn sync_connection(&self) {
        let now = self.inner.tree.is_connected(self.inner.element);
        if self.inner.connected.replace(now) == now {
            return;
        }
        debug!(element = %self.inner.element, connected = now, "host connection changed");
        if now {
            self.run_hooks(HostHook::Connected);
            if self.inner.update_pending.get() {
                self.schedule_update();
            }
        } else {
            self.run_hooks(HostHook::Disconnected);
        }
    }

    /// Ask for an update pass. Coalesced; held while disconnected.
    pub fn request_update(&self) {
        self.inner.update_pending.set(true);
        if self.is_connected() {
            self.schedule_update();
        }
    }

    fn schedule_update(&self) {
        if self.inner.update_scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        self.scheduler().queue_microtask(move || {
            if let Some(inner) = weak.upgrade() {
                ReactiveHost { inner }.perform_update();
            }
        });
    }

    fn perform_update(&self) {
        self.inner.update_scheduled.set(false);
        if !self.is_connected() || !self.inner.update_pending.replace(false) {
            return;
        }
        trace!(element = %self.inner.element, "host update");
        self.inner.updating.set(true);
        self.run_hooks(HostHook::PreUpdate);
        self.run_hooks(HostHook::Update);
        self.inner.updating.set(false);
        self.inner.update_count.set(self.inner.update_count.get() + 1);
        self.run_hooks(HostHook::PostUpdate);
    }

    /// Subscribe `f` to a lifecycle phase.
    pub fn on(&self, hook: HostHook, f: impl Fn(&ReactiveHost) + 'static) -> HookSubscription {
        let callback: Rc<HookFn> = Rc::new(f);
        self.inner.hooks.borrow_mut()[hook.slot()].push(Rc::downgrade(&callback));
        HookSubscription {
            _callback: callback,
        }
    }

    fn run_hooks(&self, hook: HostHook) {
        let snapshot: Vec<Rc<HookFn>> = {
            let mut hooks = self.inner.hooks.borrow_mut();
            let list = &mut hooks[hook.slot()];
            list.retain(|w| w.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in snapshot {
            callback(self);
        }
    }
}

/// Lifecycle callbacks a controller receives from its host.
pub trait HostLifecycle {
    fn host_connected(&self, _host: &ReactiveHost) {}
    fn host_disconnected(&self, _host: &ReactiveHost) {}
    /// Runs in `PreUpdate`.
    fn host_update(&self, _host: &ReactiveHost) {}
    /// Runs in `PostUpdate`.
    fn host_updated(&self, _host: &ReactiveHost) {}
}

/// Routes a host's hooks to a [`HostLifecycle`] for as long as it lives.
#[must_use = "dropping the binding detaches it from the host"]
pub struct HostBinding {
    _subscriptions: [HookSubscription; 4],
}

impl fmt::Debug for HostBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBinding").finish_non_exhaustive()
    }
}

impl HostBinding {
    pub fn bind(host: &ReactiveHost, target: Weak<dyn HostLifecycle>) -> Self {
        Self {
            _subscriptions: [
                route(host, &target, HostHook::Connected, |t, h| t.host_connected(h)),
                route(host, &target, HostHook::Disconnected, |t, h| {
                    t.host_disconnected(h);
                }),
                route(host, &target, HostHook::PreUpdate, |t, h| t.host_update(h)),
                route(host, &target, HostHook::PostUpdate, |t, h| t.host_updated(h)),
            ],
        }
    }
}

type LifecycleCall = fn(&dyn HostLifecycle, &ReactiveHost);

fn route(
    host: &ReactiveHost,
    target: &Weak<dyn HostLifecycle>,
    hook: HostHook,
    call: LifecycleCall,
) -> HookSubscription {
    let target = target.clone();
    host.on(hook, move |host| {
        if let Some(target) = target.upgrade() {
            call(&*target, host);
        }
    })
}
