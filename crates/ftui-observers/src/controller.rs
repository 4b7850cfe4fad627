#![forbid(unsafe_code)]

//! Lifecycle-bound observation controller.
//!
//! An [`ObservationController`] ties one platform observer (through an
//! [`ObserverAdapter`]) to a [`ReactiveHost`]. It arms when the host
//! connects, disarms when it disconnects, turns delivered records into a
//! cached value through a callback, and asks the host for an update pass
//! whenever that value is recomputed.
//!
//! ```text
//!            host connected
//!  Disarmed ────────────────▶ Armed ──┐ delivery: value = callback(records)
//!      ▲                       │  ◀──┘           host.request_update()
//!      └───────────────────────┘
//!            host disconnected
//! ```
//!
//! # Invariants
//!
//! 1. A target is in [`observed_targets`](ObservationController::observed_targets)
//!    iff the platform is watching it.
//! 2. The configured target is observed whenever the host is connected, and
//!    only then.
//! 3. Targets added with [`observe`](ObservationController::observe) stay
//!    registered across disconnects but are not observed again after a
//!    reconnect until `observe` is called again.
//! 4. With `skip_initial`, the activation notification of a target is
//!    suppressed every time the target is armed. Later changes are
//!    reported normally.
//! 5. Writing the value never changes what is observed.
//!
//! # Activation notifications
//!
//! Primitives that report initial state (intersection) deliver one record
//! per newly observed target; that record is the activation notification.
//! For primitives that do not (mutation), arming requests a host update and
//! the activation notification is `callback(&[])`, computed in the host's
//! post-update phase.
//!
//! # Changes made during an update pass
//!
//! The controller marks the host's pass in its pre-update hook. In the
//! post-update hook it drains records the platform has queued but not yet
//! delivered, so a change made by the pass is reflected in the value that
//! later post-update hooks read. A delivery that arrives while the pass is
//! running defers its update request until the pass completes.
//!
//! # Failure Modes
//!
//! - **Platform primitive missing**: the controller stays disarmed in
//!   effect; the callback never runs and the value stays `None`.
//! - **Platform refuses a target while arming**: the error is logged and
//!   kept in [`last_error`](ObservationController::last_error); the host's
//!   connection proceeds.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashSet;
use tracing::{debug, trace, warn};

use crate::adapter::ObserverAdapter;
use crate::error::{ObserverError, Result};
use crate::host::{HostBinding, HostLifecycle, ReactiveHost, WeakHost};
use crate::platform::{ObserverFactory, ObserverKind, ObserverRecord};
use crate::tree::{NodeId, NodeTree};

/// What a controller observes while its host is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetSpec {
    /// The host's render root.
    #[default]
    RenderRoot,
    /// Nothing; targets are added with `observe`.
    Disabled,
    Node(NodeId),
}

impl TargetSpec {
    #[must_use]
    pub fn resolve(&self, host: &ReactiveHost) -> Option<NodeId> {
        match self {
            Self::RenderRoot => Some(host.render_root()),
            Self::Disabled => None,
            Self::Node(id) => Some(*id),
        }
    }
}

impl From<NodeId> for TargetSpec {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// Maps a batch of records to the controller's value.
pub type ValueCallback<K, V> = Rc<dyn Fn(&[<K as ObserverKind>::Record]) -> V>;

/// Construction options for an [`ObservationController`].
pub struct ControllerConfig<K: ObserverKind, V = bool> {
    /// Default: the host's render root.
    pub target: TargetSpec,
    pub options: K::Options,
    /// Suppress activation notifications. Default: false.
    pub skip_initial: bool,
    /// Default: always `true`.
    pub callback: ValueCallback<K, V>,
}

impl<K: ObserverKind> ControllerConfig<K, bool> {
    pub fn new(options: K::Options) -> Self {
        Self {
            target: TargetSpec::default(),
            options,
            skip_initial: false,
            callback: Rc::new(|_: &[K::Record]| true),
        }
    }
}

impl<K> Default for ControllerConfig<K, bool>
where
    K: ObserverKind,
    K::Options: Default,
{
    fn default() -> Self {
        Self::new(K::Options::default())
    }
}

impl<K: ObserverKind, V> Clone for ControllerConfig<K, V> {
    fn clone(&self) -> Self {
        Self {
            target: self.target,
            options: self.options.clone(),
            skip_initial: self.skip_initial,
            callback: Rc::clone(&self.callback),
        }
    }
}

impl<K: ObserverKind, V> fmt::Debug for ControllerConfig<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("kind", &K::NAME)
            .field("target", &self.target)
            .field("options", &self.options)
            .field("skip_initial", &self.skip_initial)
            .finish_non_exhaustive()
    }
}

impl<K: ObserverKind, V> ControllerConfig<K, V> {
    #[must_use]
    pub fn with_target(mut self, target: impl Into<TargetSpec>) -> Self {
        self.target = target.into();
        self
    }

    /// Observe nothing implicitly.
    #[must_use]
    pub fn without_target(mut self) -> Self {
        self.target = TargetSpec::Disabled;
        self
    }

    #[must_use]
    pub fn with_skip_initial(mut self, skip_initial: bool) -> Self {
        self.skip_initial = skip_initial;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: K::Options) -> Self {
        self.options = options;
        self
    }

    /// Replace the callback, changing the value type.
    #[must_use]
    pub fn with_callback<U>(
        self,
        callback: impl Fn(&[K::Record]) -> U + 'static,
    ) -> ControllerConfig<K, U> {
        ControllerConfig {
            target: self.target,
            options: self.options,
            skip_initial: self.skip_initial,
            callback: Rc::new(callback),
        }
    }
}

struct ControllerState<V> {
    target: Option<NodeId>,
    skip_initial: bool,
    armed: bool,
    /// Targets added with `observe`, in call order.
    registry: Vec<NodeId>,
    /// Armed targets whose activation notification is still outstanding.
    awaiting_initial: AHashSet<NodeId>,
    value: Option<V>,
    error: Option<ObserverError>,
    updating: bool,
    invalidate_after_update: bool,
    notifications: u64,
}

struct ControllerInner<K: ObserverKind, V: 'static> {
    host: WeakHost,
    options: K::Options,
    callback: RefCell<ValueCallback<K, V>>,
    adapter: ObserverAdapter<K>,
    state: RefCell<ControllerState<V>>,
    _binding: HostBinding,
}

impl<K: ObserverKind, V: 'static> ControllerInner<K, V> {
    fn arm(&self, host: &ReactiveHost) {
        let target = {
            let mut state = self.state.borrow_mut();
            if state.armed {
                return;
            }
            state.armed = true;
            state.target
        };
        debug!(kind = K::NAME, host = %host.element(), ?target, "armed");
        let Some(target) = target else {
            return;
        };
        if let Err(error) = self.activate(host, target) {
            self.record_error(error);
        }
    }

    fn disarm(&self, host: &ReactiveHost) {
        {
            let mut state = self.state.borrow_mut();
            if !state.armed {
                return;
            }
            state.armed = false;
            state.awaiting_initial.clear();
        }
        self.adapter.stop_all();
        debug!(kind = K::NAME, host = %host.element(), "disarmed");
    }

    /// Start observing `target` and seed its activation marker.
    fn activate(&self, host: &ReactiveHost, target: NodeId) -> Result<()> {
        if !self.adapter.start(target, &self.options)? {
            return Ok(());
        }
        self.state.borrow_mut().awaiting_initial.insert(target);
        if !K::REPORTS_INITIAL {
            host.request_update();
        }
        Ok(())
    }

    fn record_error(&self, error: ObserverError) {
        warn!(kind = K::NAME, %error, "observation failed");
        self.state.borrow_mut().error = Some(error);
    }

    /// Drop activation records under `skip_initial` (initial-reporting
    /// kinds only).
    fn apply_initial_policy(&self, records: Vec<K::Record>) -> Vec<K::Record> {
        if !K::REPORTS_INITIAL {
            return records;
        }
        let mut state = self.state.borrow_mut();
        let skip = state.skip_initial;
        records
            .into_iter()
            .filter(|record| !(state.awaiting_initial.remove(&record.observed_target()) && skip))
            .collect()
    }

    fn handle_changes(&self, records: &[K::Record]) {
        let callback = Rc::clone(&*self.callback.borrow());
        let value = callback(records);
        let mut state = self.state.borrow_mut();
        state.value = Some(value);
        state.notifications += 1;
        trace!(kind = K::NAME, records = records.len(), "value recomputed");
    }

    fn deliver(&self, records: Vec<K::Record>) {
        let Some(host) = self.host.upgrade() else {
            return;
        };
        if !self.state.borrow().armed {
            return;
        }
        let records = self.apply_initial_policy(records);
        if records.is_empty() {
            return;
        }
        self.handle_changes(&records);
        let defer = {
            let mut state = self.state.borrow_mut();
            let defer = state.updating || host.is_updating();
            state.invalidate_after_update |= defer;
            defer
        };
        if !defer {
            host.request_update();
        }
    }

    fn after_update(&self, host: &ReactiveHost) {
        self.state.borrow_mut().updating = false;
        let pending = self.apply_initial_policy(self.adapter.take_records());
        let activation = {
            let mut state = self.state.borrow_mut();
            if K::REPORTS_INITIAL || state.awaiting_initial.is_empty() {
                false
            } else {
                state.awaiting_initial.clear();
                !state.skip_initial
            }
        };
        if !pending.is_empty() || activation {
            self.handle_changes(&pending);
        }
        let invalidate = std::mem::take(&mut self.state.borrow_mut().invalidate_after_update);
        if invalidate {
            host.request_update();
        }
    }
}

impl<K: ObserverKind, V: 'static> HostLifecycle for ControllerInner<K, V> {
    fn host_connected(&self, host: &ReactiveHost) {
        if host.is_connected() {
            self.arm(host);
        }
    }

    fn host_disconnected(&self, host: &ReactiveHost) {
        if !host.is_connected() {
            self.disarm(host);
        }
    }

    fn host_update(&self, _host: &ReactiveHost) {
        self.state.borrow_mut().updating = true;
    }

    fn host_updated(&self, host: &ReactiveHost) {
        self.after_update(host);
    }
}

/// Observation bound to a host's lifecycle. Cloning shares the controller;
/// dropping the last handle stops observation and detaches from the host.
pub struct ObservationController<K: ObserverKind, V: 'static = bool> {
    inner: Rc<ControllerInner<K, V>>,
}

impl<K: ObserverKind, V: 'static> Clone for ObservationController<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: ObserverKind, V: fmt::Debug + 'static> fmt::Debug for ObservationController<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ObservationController")
            .field("kind", &K::NAME)
            .field("armed", &state.armed)
            .field("target", &state.target)
            .field("observed", &self.inner.adapter.observed_targets())
            .field("registry", &state.registry)
            .field("value", &state.value)
            .field("error", &state.error)
            .finish()
    }
}

impl<K: ObserverKind, V: 'static> ObservationController<K, V> {
    /// Attach a controller backed by the host's own tree.
    ///
    /// Fails on invalid options, an unknown configured target, or an unknown
    /// node named by the options. If the host is already connected the
    /// controller arms immediately.
    pub fn new(host: &ReactiveHost, config: ControllerConfig<K, V>) -> Result<Self>
    where
        NodeTree: ObserverFactory<K>,
    {
        let tree = host.tree().clone();
        Self::with_factory(host, &tree, config)
    }

    /// Attach a controller whose platform observer comes from `factory`.
    pub fn with_factory(
        host: &ReactiveHost,
        factory: &dyn ObserverFactory<K>,
        config: ControllerConfig<K, V>,
    ) -> Result<Self> {
        K::validate(&config.options)?;
        let target = config.target.resolve(host);
        if let Some(id) = target
            .into_iter()
            .chain(K::referenced_nodes(&config.options))
            .find(|id| !host.tree().contains(*id))
        {
            return Err(ObserverError::UnknownNode(id));
        }

        let inner = Rc::new_cyclic(|this: &Weak<ControllerInner<K, V>>| {
            let delivery = this.clone();
            let adapter = ObserverAdapter::new(factory, move |records| {
                if let Some(inner) = delivery.upgrade() {
                    inner.deliver(records);
                }
            });
            let lifecycle: Weak<dyn HostLifecycle> = this.clone();
            ControllerInner {
                host: host.downgrade(),
                options: config.options,
                callback: RefCell::new(config.callback),
                adapter,
                state: RefCell::new(ControllerState {
                    target,
                    skip_initial: config.skip_initial,
                    armed: false,
                    registry: Vec::new(),
                    awaiting_initial: AHashSet::new(),
                    value: None,
                    error: None,
                    updating: false,
                    invalidate_after_update: false,
                    notifications: 0,
                }),
                _binding: HostBinding::bind(host, lifecycle),
            }
        });

        if host.is_connected() {
            inner.arm(host);
        }
        Ok(Self { inner })
    }

    /// Register `target` and, if armed, observe it now. Idempotent.
    ///
    /// While the host is disconnected the target is only registered.
    pub fn observe(&self, target: NodeId) -> Result<()> {
        let Some(host) = self.inner.host.upgrade() else {
            return Ok(());
        };
        if !host.tree().contains(target) {
            return Err(ObserverError::UnknownNode(target));
        }
        if self.is_armed() {
            self.inner.activate(&host, target)?;
        }
        let mut state = self.inner.state.borrow_mut();
        if !state.registry.contains(&target) {
            state.registry.push(target);
        }
        Ok(())
    }

    /// Forget `target` and stop observing it. Stopping the configured
    /// target lasts until the next reconnect.
    pub fn unobserve(&self, target: NodeId) {
        {
            let mut state = self.inner.state.borrow_mut();
            state.registry.retain(|id| *id != target);
            state.awaiting_initial.remove(&target);
        }
        self.inner.adapter.stop(target);
    }

    /// Stop all platform observation. Registered targets are kept; the
    /// configured target is observed again after the next reconnect.
    pub fn disconnect(&self) {
        self.inner.state.borrow_mut().awaiting_initial.clear();
        self.inner.adapter.stop_all();
    }

    /// Replace the callback used for later notifications.
    pub fn set_callback(&self, callback: impl Fn(&[K::Record]) -> V + 'static) {
        *self.inner.callback.borrow_mut() = Rc::new(callback);
    }

    pub fn with_value<R>(&self, f: impl FnOnce(Option<&V>) -> R) -> R {
        f(self.inner.state.borrow().value.as_ref())
    }

    /// Overwrite the cached value. Observation is unaffected.
    pub fn set_value(&self, value: Option<V>) {
        self.inner.state.borrow_mut().value = value;
    }

    /// Clear the cached value, returning the previous one.
    pub fn reset_value(&self) -> Option<V> {
        self.inner.state.borrow_mut().value.take()
    }

    /// Failure recorded while arming, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<ObserverError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn take_error(&self) -> Option<ObserverError> {
        self.inner.state.borrow_mut().error.take()
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.inner.state.borrow().armed
    }

    /// Whether the platform offers this primitive.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.adapter.is_available()
    }

    #[must_use]
    pub fn configured_target(&self) -> Option<NodeId> {
        self.inner.state.borrow().target
    }

    #[must_use]
    pub fn skip_initial(&self) -> bool {
        self.inner.state.borrow().skip_initial
    }

    /// Targets the platform is watching, in id order.
    #[must_use]
    pub fn observed_targets(&self) -> Vec<NodeId> {
        self.inner.adapter.observed_targets()
    }

    #[must_use]
    pub fn is_observing(&self, target: NodeId) -> bool {
        self.inner.adapter.is_observing(target)
    }

    /// Targets added with `observe`, in call order.
    #[must_use]
    pub fn registered_targets(&self) -> Vec<NodeId> {
        self.inner.state.borrow().registry.clone()
    }

    /// Times the value has been recomputed.
    #[must_use]
    pub fn notification_count(&self) -> u64 {
        self.inner.state.borrow().notifications
    }

    #[must_use]
    pub fn host(&self) -> Option<ReactiveHost> {
        self.inner.host.upgrade()
    }
}

impl<K: ObserverKind, V: Clone + 'static> ObservationController<K, V> {
    /// The cached value; `None` until the first notification.
    #[must_use]
    pub fn value(&self) -> Option<V> {
        self.inner.state.borrow().value.clone()
    }
}
