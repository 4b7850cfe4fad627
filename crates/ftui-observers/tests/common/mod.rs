//! Shared harness: a host component that copies its controller's value in
//! its own post-update hook, the way a rendering component would read it.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use ftui_observers::host::HookSubscription;
use ftui_observers::prelude::*;
use ftui_observers::{ObserverFactory, ObserverKind};

pub struct Fixture {
    pub scheduler: Scheduler,
    pub tree: NodeTree,
    pub container: NodeId,
}

impl Fixture {
    pub fn new() -> Self {
        let scheduler = Scheduler::new();
        let tree = NodeTree::new(&scheduler);
        let container = tree.create_element("div");
        tree.append_child(tree.root(), container).unwrap();
        Self {
            scheduler,
            tree,
            container,
        }
    }

    /// One mutation delivery cycle.
    pub fn next_frame(&self) {
        self.scheduler.next_frame();
    }

    /// Enough frames for a geometry change to be sampled, delivered and
    /// rendered.
    pub fn intersection_complete(&self) {
        self.scheduler.next_frame();
        self.scheduler.next_frame();
    }

    pub fn intersect_out(&self, node: NodeId) {
        self.tree
            .set_rect(node, Rect::new(-10_000, -10_000, 1, 1))
            .unwrap();
    }

    pub fn intersect_in(&self, node: NodeId) {
        self.tree.set_rect(node, Rect::new(0, 0, 1, 1)).unwrap();
    }

    /// Build a test element in the container and run its first update.
    pub fn element<K, V>(
        &self,
        config: impl FnOnce(&ReactiveHost) -> ControllerConfig<K, V>,
    ) -> TestElement<K, V>
    where
        K: ObserverKind,
        V: Clone + 'static,
        NodeTree: ObserverFactory<K>,
    {
        let el = TestElement::new(&self.tree, config);
        el.host.attach_to(self.container).unwrap();
        self.intersection_complete();
        el
    }
}

type Hook = Rc<RefCell<Option<Box<dyn Fn()>>>>;

pub struct TestElement<K: ObserverKind, V: Clone + 'static = bool> {
    pub host: ReactiveHost,
    pub observer: ObservationController<K, V>,
    observer_value: Rc<RefCell<Option<V>>>,
    change_during_update: Hook,
    _hooks: Vec<HookSubscription>,
}

impl<K, V> TestElement<K, V>
where
    K: ObserverKind,
    V: Clone + 'static,
    NodeTree: ObserverFactory<K>,
{
    pub fn new(tree: &NodeTree, config: impl FnOnce(&ReactiveHost) -> ControllerConfig<K, V>) -> Self {
        let host = ReactiveHost::new(tree, "x-test");
        let observer = ObservationController::new(&host, config(&host)).unwrap();

        let change_during_update: Hook = Rc::new(RefCell::new(None));
        let change = Rc::clone(&change_during_update);
        let update = host.on(HostHook::Update, move |_| {
            if let Some(f) = change.borrow().as_ref() {
                f();
            }
        });

        let observer_value = Rc::new(RefCell::new(None));
        let copy = Rc::clone(&observer_value);
        let reader = observer.clone();
        let updated = host.on(HostHook::PostUpdate, move |_| {
            *copy.borrow_mut() = reader.value();
        });

        Self {
            host,
            observer,
            observer_value,
            change_during_update,
            _hooks: vec![update, updated],
        }
    }
}

impl<K: ObserverKind, V: Clone + 'static> TestElement<K, V> {
    pub fn element(&self) -> NodeId {
        self.host.element()
    }

    /// The value as of the last completed update pass.
    pub fn observer_value(&self) -> Option<V> {
        self.observer_value.borrow().clone()
    }

    pub fn reset_observer_value(&self) {
        self.observer.set_value(None);
        *self.observer_value.borrow_mut() = None;
    }

    pub fn set_change_during_update(&self, f: impl Fn() + 'static) {
        *self.change_during_update.borrow_mut() = Some(Box::new(f));
    }

    pub fn request_update(&self) {
        self.host.request_update();
    }

    pub fn remove(&self) {
        self.host.remove().unwrap();
    }

    pub fn append_to(&self, parent: NodeId) {
        self.host.attach_to(parent).unwrap();
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        self.host
            .tree()
            .set_attribute(self.host.element(), name, value)
            .unwrap();
    }

    pub fn append_child(&self, child: NodeId) {
        self.host
            .tree()
            .append_child(self.host.element(), child)
            .unwrap();
    }
}
