#![forbid(unsafe_code)]

//! Scriptable platform for unit tests: records calls, fails on demand and
//! delivers batches synchronously when told to.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::{ObserverError, Result};
use crate::platform::{ObserverFactory, ObserverKind, ObserverRecord, PlatformObserver, RecordSink};
use crate::tree::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct MockKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockOptions {
    pub valid: bool,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self { valid: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockRecord {
    pub target: NodeId,
    pub seq: u32,
}

impl ObserverRecord for MockRecord {
    fn observed_target(&self) -> NodeId {
        self.target
    }
}

impl ObserverKind for MockKind {
    type Options = MockOptions;
    type Record = MockRecord;

    const NAME: &'static str = "mock";
    const REPORTS_INITIAL: bool = false;

    fn validate(options: &MockOptions) -> Result<()> {
        if options.valid {
            Ok(())
        } else {
            Err(ObserverError::invalid_options(Self::NAME, "rejected"))
        }
    }
}

#[derive(Default)]
struct MockState {
    unavailable: Cell<bool>,
    fail_observe: Cell<bool>,
    sink: RefCell<Option<RecordSink<MockRecord>>>,
    observed: RefCell<Vec<NodeId>>,
    queued: RefCell<Vec<MockRecord>>,
    disconnects: Cell<u32>,
}

#[derive(Clone, Default)]
pub(crate) struct MockPlatform {
    state: Rc<MockState>,
}

impl MockPlatform {
    pub fn unavailable() -> Self {
        let platform = Self::default();
        platform.state.unavailable.set(true);
        platform
    }

    /// The next `observe` call fails.
    pub fn fail_next_observe(&self) {
        self.state.fail_observe.set(true);
    }

    /// Deliver a batch as the platform would.
    pub fn emit(&self, records: Vec<MockRecord>) {
        if let Some(sink) = self.state.sink.borrow().as_ref() {
            sink(records);
        }
    }

    /// Queue a record for `take_records`.
    pub fn queue(&self, record: MockRecord) {
        self.state.queued.borrow_mut().push(record);
    }

    pub fn observed(&self) -> Vec<NodeId> {
        self.state.observed.borrow().clone()
    }

    pub fn disconnects(&self) -> u32 {
        self.state.disconnects.get()
    }
}

struct MockObserver {
    state: Rc<MockState>,
}

impl PlatformObserver<MockKind> for MockObserver {
    fn observe(&self, target: NodeId, _options: &MockOptions) -> Result<()> {
        if self.state.fail_observe.replace(false) {
            return Err(ObserverError::platform(MockKind::NAME, target, "scripted failure"));
        }
        let mut observed = self.state.observed.borrow_mut();
        if !observed.contains(&target) {
            observed.push(target);
        }
        Ok(())
    }

    fn unobserve(&self, target: NodeId) {
        self.state.observed.borrow_mut().retain(|id| *id != target);
    }

    fn take_records(&self) -> Vec<MockRecord> {
        std::mem::take(&mut *self.state.queued.borrow_mut())
    }

    fn disconnect(&self) {
        self.state.observed.borrow_mut().clear();
        self.state.queued.borrow_mut().clear();
        self.state.disconnects.set(self.state.disconnects.get() + 1);
    }
}

impl ObserverFactory<MockKind> for MockPlatform {
    fn create_observer(
        &self,
        sink: RecordSink<MockRecord>,
    ) -> Option<Box<dyn PlatformObserver<MockKind>>> {
        if self.state.unavailable.get() {
            return None;
        }
        *self.state.sink.borrow_mut() = Some(sink);
        Some(Box::new(MockObserver {
            state: Rc::clone(&self.state),
        }))
    }
}
