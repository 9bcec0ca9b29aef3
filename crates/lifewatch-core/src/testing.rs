#![forbid(unsafe_code)]

//! Test doubles for lifecycle owners and observers.
//!
//! Enabled for this crate's own tests and, for downstream crates, through the
//! `test-helpers` feature.

use std::cell::RefCell;
use std::rc::Rc;

use crate::lifecycle::{
    LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleRegistry, LifecycleState,
};

/// A lifecycle owner that tests drive by hand.
#[derive(Debug, Clone)]
pub struct TestOwner {
    registry: LifecycleRegistry,
}

impl TestOwner {
    /// An owner moved from Initialized to `initial` through the normal path.
    #[must_use]
    pub fn new(initial: LifecycleState) -> Self {
        let owner = Self {
            registry: LifecycleRegistry::new(),
        };
        owner.transition_to(initial);
        owner
    }

    pub fn transition_to(&self, state: LifecycleState) {
        self.registry.mark_state(state);
    }

    #[must_use]
    pub fn registry(&self) -> &LifecycleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.registry.current_state()
    }
}

impl LifecycleOwner for TestOwner {
    fn lifecycle(&self) -> &LifecycleRegistry {
        &self.registry
    }
}

/// Collects every value handed to its callback.
#[derive(Debug)]
pub struct Recorder<T> {
    values: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            values: Rc::clone(&self.values),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            values: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl<T: Clone + 'static> Recorder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A callback that appends a clone of each value it sees.
    pub fn callback(&self) -> impl Fn(&T) + 'static {
        let values = Rc::clone(&self.values);
        move |value: &T| values.borrow_mut().push(value.clone())
    }

    /// Everything recorded so far, oldest first.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.values.borrow().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.values.borrow_mut().clear();
    }
}

/// A lifecycle observer that logs the events it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    #[must_use]
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.borrow().clone()
    }

    fn record(&self, event: LifecycleEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl LifecycleObserver for RecordingObserver {
    fn on_create(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Create);
    }
    fn on_start(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Start);
    }
    fn on_resume(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Resume);
    }
    fn on_pause(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Pause);
    }
    fn on_stop(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Stop);
    }
    fn on_destroy(&self, _lifecycle: &LifecycleRegistry) {
        self.record(LifecycleEvent::Destroy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_starts_in_requested_state() {
        let owner = TestOwner::new(LifecycleState::Started);
        assert_eq!(owner.state(), LifecycleState::Started);
        owner.transition_to(LifecycleState::Destroyed);
        assert_eq!(owner.lifecycle().current_state(), LifecycleState::Destroyed);
    }

    #[test]
    fn recorder_collects_in_order() {
        let recorder = Recorder::new();
        let callback = recorder.callback();
        callback(&1);
        callback(&2);
        assert_eq!(recorder.values(), vec![1, 2]);
        assert_eq!(recorder.len(), 2);
        recorder.clear();
        assert!(recorder.is_empty());
    }
}
