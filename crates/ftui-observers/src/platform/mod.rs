#![forbid(unsafe_code)]

//! Platform change-detection primitives and the seam the controllers use.
//!
//! An [`ObserverKind`] names one primitive (its options, its record type,
//! and whether it reports a target's current state when observation
//! starts). A [`PlatformObserver`] is a live instance of that primitive; an
//! [`ObserverFactory`] creates one, or returns `None` when the platform
//! lacks the primitive.
//!
//! The [`NodeTree`](crate::tree::NodeTree) is a factory for both built-in
//! kinds:
//!
//! - [`mutation::Mutation`]: attribute, text and child-list edits, delivered
//!   on a microtask.
//! - [`intersection::Intersection`]: visibility against a root rectangle,
//!   sampled once per frame.
//!
//! # Contract
//!
//! 1. Batches are delivered asynchronously, never inside the call that
//!    caused the change.
//! 2. After `unobserve(target)` or `disconnect()`, no record attributed to
//!    the stopped target is delivered or returned by `take_records()`.
//! 3. `take_records()` drains what would otherwise be delivered next.

use std::fmt;

use crate::error::Result;
use crate::tree::NodeId;

pub mod intersection;
pub mod mutation;

#[cfg(test)]
pub(crate) mod mock;

/// A single change record produced by a platform observer.
pub trait ObserverRecord: Clone + fmt::Debug + 'static {
    /// The observed target this record is attributed to.
    fn observed_target(&self) -> NodeId;
}

/// Static description of a platform primitive.
pub trait ObserverKind: 'static {
    type Options: Clone + fmt::Debug + 'static;
    type Record: ObserverRecord;

    /// Short name used in logs and errors.
    const NAME: &'static str;

    /// Whether the primitive emits a record describing the current state as
    /// soon as a target is observed.
    const REPORTS_INITIAL: bool;

    /// Reject option sets the primitive cannot honor.
    fn validate(options: &Self::Options) -> Result<()>;

    /// Nodes the options point at besides the observed target, such as an
    /// intersection root. Each must exist when a controller is built.
    fn referenced_nodes(_options: &Self::Options) -> Vec<NodeId> {
        Vec::new()
    }
}

/// Receives batches from a platform observer.
pub type RecordSink<R> = Box<dyn Fn(Vec<R>)>;

/// A live platform observer.
pub trait PlatformObserver<K: ObserverKind> {
    fn observe(&self, target: NodeId, options: &K::Options) -> Result<()>;
    fn unobserve(&self, target: NodeId);
    fn take_records(&self) -> Vec<K::Record>;
    fn disconnect(&self);
}

/// Creates platform observers of kind `K`.
pub trait ObserverFactory<K: ObserverKind> {
    /// `None` when the platform does not offer this primitive.
    fn create_observer(&self, sink: RecordSink<K::Record>) -> Option<Box<dyn PlatformObserver<K>>>;
}

/// Which primitives a platform offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSupport {
    pub mutation: bool,
    pub intersection: bool,
}

impl PlatformSupport {
    pub const ALL: Self = Self {
        mutation: true,
        intersection: true,
    };

    pub const NONE: Self = Self {
        mutation: false,
        intersection: false,
    };
}

impl Default for PlatformSupport {
    fn default() -> Self {
        Self::ALL
    }
}
