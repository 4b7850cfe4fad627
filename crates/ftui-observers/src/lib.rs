#![forbid(unsafe_code)]

//! Lifecycle-bound observation controllers.
//!
//! A controller watches nodes of a [`NodeTree`](tree::NodeTree) through a
//! platform primitive (mutation or intersection), arms and disarms with its
//! [`ReactiveHost`](host::ReactiveHost), and turns change batches into a
//! cached value the host reads during its update pass.
//!
//! ```text
//! Scheduler ─▶ NodeTree ─▶ platform observer ─▶ ObserverAdapter ─▶ ObservationController
//!                                                                      │        ▲
//!                                                      request_update  ▼        │ hooks
//!                                                                   ReactiveHost
//! ```
//!
//! # Example
//!
//! ```
//! use ftui_observers::prelude::*;
//!
//! let scheduler = Scheduler::new();
//! let tree = NodeTree::new(&scheduler);
//! let host = ReactiveHost::new(&tree, "x-panel");
//! let config = MutationControllerConfig::new(MutationOptions::default().with_attributes());
//! let controller = MutationController::new(&host, config).unwrap();
//!
//! host.attach_to(tree.root()).unwrap();
//! scheduler.run_microtasks();
//! assert_eq!(controller.value(), Some(true));
//!
//! controller.reset_value();
//! tree.set_attribute(host.element(), "title", "hello").unwrap();
//! scheduler.run_microtasks();
//! assert_eq!(controller.value(), Some(true));
//! ```

pub mod adapter;
pub mod controller;
pub mod error;
pub mod host;
pub mod logging;
pub mod platform;
pub mod scheduler;
pub mod tree;

pub use adapter::ObserverAdapter;
pub use controller::{ControllerConfig, ObservationController, TargetSpec, ValueCallback};
pub use error::{ObserverError, Result};
pub use host::{HookSubscription, HostBinding, HostHook, HostLifecycle, ReactiveHost, WeakHost};
pub use logging::LogLevel;
pub use platform::intersection::{
    Intersection, IntersectionController, IntersectionControllerConfig, IntersectionEntry,
    IntersectionOptions,
};
pub use platform::mutation::{
    Mutation, MutationController, MutationControllerConfig, MutationOptions, MutationRecord,
    MutationType,
};
pub use platform::{ObserverFactory, ObserverKind, ObserverRecord, PlatformObserver, PlatformSupport};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use tree::{NodeId, NodeTree, Rect, TreeChange};

/// Everything needed to build hosts and controllers.
pub mod prelude {
    pub use crate::controller::{ControllerConfig, ObservationController, TargetSpec};
    pub use crate::error::{ObserverError, Result};
    pub use crate::host::{HostHook, ReactiveHost};
    pub use crate::platform::PlatformSupport;
    pub use crate::platform::intersection::{
        IntersectionController, IntersectionControllerConfig, IntersectionEntry,
        IntersectionOptions,
    };
    pub use crate::platform::mutation::{
        MutationController, MutationControllerConfig, MutationOptions, MutationRecord,
        MutationType,
    };
    pub use crate::scheduler::Scheduler;
    pub use crate::tree::{NodeId, NodeTree, Rect};
}
