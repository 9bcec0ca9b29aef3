#![forbid(unsafe_code)]

//! One subscriber of one value holder.
//!
//! A [`Binding`] pairs a callback with the lifecycle it is scoped to. It
//! decides, value by value, whether to deliver now or to hold the value until
//! its owner becomes active again.
//!
//! # Invariants
//!
//! 1. A forever binding is always active. An owner-bound binding is active
//!    iff its owner is alive and Started or Resumed.
//! 2. The callback never sees the same value twice in a row (`PartialEq`).
//! 3. While inactive only the latest value is kept; intermediate values are
//!    dropped, never replayed.
//! 4. Once detached a binding delivers nothing, even mid fan-out.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use lifewatch_core::lifecycle::{
    LifecycleObserver, LifecycleRegistry, LifecycleState, ObserverId, WeakLifecycle,
};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Token identifying one observer registration on a value holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverHandle(u64);

impl ObserverHandle {
    fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Told when a binding's owner crosses the active/inactive boundary.
pub(crate) trait ActivityListener {
    fn binding_activity_changed(&self);
}

pub(crate) struct Binding<T> {
    handle: ObserverHandle,
    forever: bool,
    owner: RefCell<Option<WeakLifecycle>>,
    registration: Cell<Option<ObserverId>>,
    callback: Rc<dyn Fn(&T)>,
    /// Last value handed to the callback; `None` until the first delivery.
    last: RefCell<Option<T>>,
    /// Latest value received while inactive.
    pending: RefCell<Option<T>>,
    detached: Cell<bool>,
    listener: Weak<dyn ActivityListener>,
}

impl<T> Binding<T> {
    pub(crate) fn handle(&self) -> ObserverHandle {
        self.handle
    }

    pub(crate) fn is_forever(&self) -> bool {
        self.forever
    }

    pub(crate) fn is_active(&self) -> bool {
        if self.detached.get() {
            return false;
        }
        if self.forever {
            return true;
        }
        self.owner
            .borrow()
            .as_ref()
            .and_then(WeakLifecycle::current_state)
            .is_some_and(LifecycleState::is_active)
    }

    /// Owner released or destroyed: the binding can never deliver again.
    pub(crate) fn is_stale(&self) -> bool {
        !self.forever
            && self
                .owner
                .borrow()
                .as_ref()
                .is_none_or(|owner| !owner.is_alive())
    }

    pub(crate) fn has_owner(&self, lifecycle: &LifecycleRegistry) -> bool {
        self.owner
            .borrow()
            .as_ref()
            .is_some_and(|owner| owner.is(lifecycle))
    }

    /// Stop delivering and leave the owner's registry.
    pub(crate) fn detach(&self) {
        self.detached.set(true);
        let registration = self.registration.take();
        let owner = self.owner.borrow_mut().take();
        if let (Some(id), Some(registry)) = (registration, owner.and_then(|o| o.upgrade())) {
            registry.remove_observer(id);
        }
    }

    fn notify_listener(&self) {
        if let Some(listener) = self.listener.upgrade() {
            listener.binding_activity_changed();
        }
    }
}

impl<T: Clone + PartialEq + 'static> Binding<T> {
    pub(crate) fn forever(
        callback: Rc<dyn Fn(&T)>,
        listener: Weak<dyn ActivityListener>,
    ) -> Rc<Self> {
        Rc::new(Self::build(true, None, callback, listener))
    }

    /// A binding scoped to `lifecycle`.
    ///
    /// If the lifecycle is already destroyed the binding is created stale and
    /// never registered.
    pub(crate) fn bound(
        lifecycle: &LifecycleRegistry,
        callback: Rc<dyn Fn(&T)>,
        listener: Weak<dyn ActivityListener>,
    ) -> Rc<Self> {
        if lifecycle.current_state() == LifecycleState::Destroyed {
            return Rc::new(Self::build(false, None, callback, listener));
        }
        let binding = Rc::new(Self::build(
            false,
            Some(lifecycle.downgrade()),
            callback,
            listener,
        ));
        let observer: Rc<dyn LifecycleObserver> = binding.clone();
        binding.registration.set(Some(lifecycle.add_observer(observer)));
        binding
    }

    fn build(
        forever: bool,
        owner: Option<WeakLifecycle>,
        callback: Rc<dyn Fn(&T)>,
        listener: Weak<dyn ActivityListener>,
    ) -> Self {
        Self {
            handle: ObserverHandle::next(),
            forever,
            owner: RefCell::new(owner),
            registration: Cell::new(None),
            callback,
            last: RefCell::new(None),
            pending: RefCell::new(None),
            detached: Cell::new(false),
            listener,
        }
    }

    pub(crate) fn value_changed(&self, value: &T) {
        if self.detached.get() {
            return;
        }
        if self.is_active() {
            self.notify_if_changed(value);
        } else {
            *self.pending.borrow_mut() = Some(value.clone());
        }
    }

    fn notify_if_changed(&self, value: &T) {
        let changed = self.last.borrow().as_ref() != Some(value);
        if changed {
            self.deliver(value.clone());
        }
    }

    fn deliver(&self, value: T) {
        *self.last.borrow_mut() = Some(value.clone());
        self.pending.borrow_mut().take();
        (self.callback)(&value);
    }

    fn flush_pending(&self) {
        let pending = self.pending.borrow_mut().take();
        if let Some(value) = pending {
            self.notify_if_changed(&value);
        }
    }
}

impl<T: Clone + PartialEq + 'static> LifecycleObserver for Binding<T> {
    fn on_start(&self, _lifecycle: &LifecycleRegistry) {
        if self.detached.get() {
            return;
        }
        self.notify_listener();
        // The activity hooks may have removed this binding.
        if self.detached.get() {
            return;
        }
        self.flush_pending();
    }

    fn on_stop(&self, _lifecycle: &LifecycleRegistry) {
        if self.detached.get() {
            return;
        }
        self.notify_listener();
    }

    fn on_destroy(&self, lifecycle: &LifecycleRegistry) {
        if let Some(id) = self.registration.take() {
            lifecycle.remove_observer(id);
        }
        self.owner.borrow_mut().take();
    }

    fn on_released(&self) {
        self.registration.take();
        self.pending.borrow_mut().take();
        if !self.detached.get() {
            self.notify_listener();
        }
    }
}

impl<T> Drop for Binding<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifewatch_core::testing::{Recorder, TestOwner};

    struct Flips(Cell<u32>);

    impl ActivityListener for Flips {
        fn binding_activity_changed(&self) {
            self.0.set(self.0.get() + 1);
        }
    }

    fn no_listener() -> Weak<dyn ActivityListener> {
        Weak::<Flips>::new()
    }

    fn bound<T: Clone + PartialEq + 'static>(
        owner: &TestOwner,
        callback: impl Fn(&T) + 'static,
    ) -> Rc<Binding<T>> {
        Binding::bound(owner.registry(), Rc::new(callback), no_listener())
    }

    #[test]
    fn forever_binding_dedups_consecutive_values() {
        let recorder = Recorder::new();
        let binding = Binding::forever(Rc::new(recorder.callback()), no_listener());
        for value in [1, 1, 2, 2, 1] {
            binding.value_changed(&value);
        }
        assert_eq!(recorder.values(), vec![1, 2, 1]);
        assert!(binding.is_active());
        assert!(!binding.is_stale());
    }

    #[test]
    fn inactive_binding_keeps_only_the_latest_value() {
        let owner = TestOwner::new(LifecycleState::Created);
        let recorder = Recorder::new();
        let binding = bound(&owner, recorder.callback());

        for value in 1..=5 {
            binding.value_changed(&value);
        }
        assert!(recorder.is_empty());

        owner.transition_to(LifecycleState::Started);
        assert_eq!(recorder.values(), vec![5]);

        owner.transition_to(LifecycleState::Created);
        owner.transition_to(LifecycleState::Resumed);
        assert_eq!(recorder.values(), vec![5]);
    }

    #[test]
    fn pending_equal_to_last_is_not_redelivered() {
        let owner = TestOwner::new(LifecycleState::Started);
        let recorder = Recorder::new();
        let binding = bound(&owner, recorder.callback());
        binding.value_changed(&7);
        owner.transition_to(LifecycleState::Created);
        binding.value_changed(&7);
        owner.transition_to(LifecycleState::Started);
        assert_eq!(recorder.values(), vec![7]);
    }

    #[test]
    fn listener_hears_start_and_stop() {
        let flips = Rc::new(Flips(Cell::new(0)));
        let listener = Rc::downgrade(&flips) as Weak<dyn ActivityListener>;
        let owner = TestOwner::new(LifecycleState::Created);
        let _binding = Binding::<i32>::bound(owner.registry(), Rc::new(|_: &i32| {}), listener);

        owner.transition_to(LifecycleState::Resumed);
        owner.transition_to(LifecycleState::Created);
        assert_eq!(flips.0.get(), 2);
    }

    #[test]
    fn listener_hears_owner_release() {
        let flips = Rc::new(Flips(Cell::new(0)));
        let listener = Rc::downgrade(&flips) as Weak<dyn ActivityListener>;
        let owner = TestOwner::new(LifecycleState::Resumed);
        let binding = Binding::<i32>::bound(owner.registry(), Rc::new(|_: &i32| {}), listener);
        binding.value_changed(&1);

        drop(owner);
        assert_eq!(flips.0.get(), 1);
        assert!(!binding.is_active());
        binding.value_changed(&2);
        assert!(binding.is_stale());
    }

    #[test]
    fn destroy_unregisters_and_goes_stale() {
        let owner = TestOwner::new(LifecycleState::Started);
        let binding = bound(&owner, |_: &i32| {});
        assert_eq!(owner.registry().observer_count(), 1);
        assert!(binding.has_owner(owner.registry()));

        owner.transition_to(LifecycleState::Destroyed);
        assert_eq!(owner.registry().observer_count(), 0);
        assert!(binding.is_stale());
        assert!(!binding.is_active());
        assert!(!binding.has_owner(owner.registry()));
    }

    #[test]
    fn binding_for_destroyed_owner_is_never_registered() {
        let owner = TestOwner::new(LifecycleState::Destroyed);
        let binding = bound(&owner, |_: &i32| {});
        assert_eq!(owner.registry().observer_count(), 0);
        assert!(binding.is_stale());
    }

    #[test]
    fn detached_binding_delivers_nothing() {
        let owner = TestOwner::new(LifecycleState::Resumed);
        let recorder = Recorder::new();
        let binding = bound(&owner, recorder.callback());
        binding.detach();
        binding.value_changed(&1);
        assert!(recorder.is_empty());
        assert_eq!(owner.registry().observer_count(), 0);
    }

    #[test]
    fn released_owner_makes_binding_inactive() {
        let owner = TestOwner::new(LifecycleState::Resumed);
        let binding = bound(&owner, |_: &i32| {});
        assert!(binding.is_active());
        drop(owner);
        assert!(!binding.is_active());
        assert!(binding.is_stale());
    }
}
