#![forbid(unsafe_code)]

//! The lifecycle registry: current state plus weakly-held observers.
//!
//! # Invariants
//!
//! 1. The current state changes only through applied events, and is updated
//!    *before* anyone is notified.
//! 2. The pre-notify hook (if any) runs before observers for every event.
//! 3. Observers are held weakly; released observers are purged lazily and
//!    never notified.
//! 4. Registering the same observer twice is a no-op returning the original
//!    [`ObserverId`].
//! 5. `mark_state` either applies the full event path or nothing at all.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::{LifecycleEvent, LifecycleState};
use crate::dispatch::{ControlLoop, LoopHandle, Mailbox, MailboxId};
use crate::error::LifecycleError;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity token assigned to an observer when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Receives a callback for every transition of a lifecycle it is added to.
///
/// All callbacks default to no-ops.
pub trait LifecycleObserver {
    /// Initialized -> Created.
    fn on_create(&self, _lifecycle: &LifecycleRegistry) {}
    /// Created -> Started.
    fn on_start(&self, _lifecycle: &LifecycleRegistry) {}
    /// Started -> Resumed.
    fn on_resume(&self, _lifecycle: &LifecycleRegistry) {}
    /// Resumed -> Started.
    fn on_pause(&self, _lifecycle: &LifecycleRegistry) {}
    /// Started -> Created.
    fn on_stop(&self, _lifecycle: &LifecycleRegistry) {}
    /// Created -> Destroyed.
    fn on_destroy(&self, _lifecycle: &LifecycleRegistry) {}
    /// The lifecycle was dropped before reaching Destroyed. It can no longer
    /// be upgraded and counts as inactive from here on.
    fn on_released(&self) {}
}

/// Anything that owns a lifecycle.
pub trait LifecycleOwner {
    fn lifecycle(&self) -> &LifecycleRegistry;
}

struct ObserverEntry {
    id: ObserverId,
    observer: Weak<dyn LifecycleObserver>,
}

struct RegistryInner {
    id: u64,
    state: Cell<LifecycleState>,
    observers: RefCell<Vec<ObserverEntry>>,
    control: ControlLoop,
    mailbox: Cell<Option<MailboxId>>,
}

impl RegistryInner {
    fn purge(&self) {
        self.observers
            .borrow_mut()
            .retain(|entry| entry.observer.strong_count() > 0);
    }

    fn remove(&self, id: ObserverId) -> bool {
        let removed = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|entry| entry.observer.strong_count() > 0);
            let before = observers.len();
            observers.retain(|entry| entry.id != id);
            before != observers.len()
        };
        if removed {
            tracing::debug!(
                message = "lifecycle.observer_removed",
                registry = self.id,
                observer = id.raw()
            );
        }
        removed
    }

    fn contains(&self, id: ObserverId) -> bool {
        self.observers.borrow().iter().any(|entry| entry.id == id)
    }
}

impl Mailbox for RegistryInner {
    fn deliver(&self, token: u64) {
        self.remove(ObserverId(token));
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        if let Some(mailbox) = self.mailbox.get() {
            self.control.unregister_mailbox(mailbox);
        }
        let live: Vec<Rc<dyn LifecycleObserver>> = self
            .observers
            .get_mut()
            .drain(..)
            .filter_map(|entry| entry.observer.upgrade())
            .collect();
        if !live.is_empty() {
            tracing::debug!(
                message = "lifecycle.released",
                registry = self.id,
                state = %self.state.get(),
                observers = live.len()
            );
        }
        for observer in live {
            observer.on_released();
        }
    }
}

/// A lifecycle that its owner drives and observers watch.
///
/// Cheap to clone; clones share state. Lives on the control thread that
/// created it.
#[derive(Clone)]
pub struct LifecycleRegistry {
    inner: Rc<RegistryInner>,
}

impl fmt::Debug for LifecycleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleRegistry")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.get())
            .field("observers", &self.inner.observers.borrow().len())
            .finish()
    }
}

impl Default for LifecycleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleOwner for LifecycleRegistry {
    fn lifecycle(&self) -> &LifecycleRegistry {
        self
    }
}

impl LifecycleRegistry {
    /// A registry in [`LifecycleState::Initialized`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(LifecycleState::Initialized)
    }

    /// A registry starting in `initial` without emitting any events.
    #[must_use]
    pub fn with_state(initial: LifecycleState) -> Self {
        Self {
            inner: Rc::new(RegistryInner {
                id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
                state: Cell::new(initial),
                observers: RefCell::new(Vec::new()),
                control: ControlLoop::current(),
                mailbox: Cell::new(None),
            }),
        }
    }

    /// Unique id of this registry.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn current_state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    /// Whether `other` is a handle to this same registry.
    #[must_use]
    pub fn same_as(&self, other: &LifecycleRegistry) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The control loop this registry belongs to.
    #[must_use]
    pub fn control(&self) -> &ControlLoop {
        &self.inner.control
    }

    /// Register `observer` for transition callbacks.
    ///
    /// The registry keeps only a weak reference. Adding an observer that is
    /// already registered returns its existing id and changes nothing.
    pub fn add_observer(&self, observer: Rc<dyn LifecycleObserver>) -> ObserverId {
        self.inner
            .control
            .assert_control_thread("LifecycleRegistry::add_observer");
        let id = {
            let mut observers = self.inner.observers.borrow_mut();
            observers.retain(|entry| entry.observer.strong_count() > 0);
            let existing = observers
                .iter()
                .find(|entry| std::ptr::addr_eq(entry.observer.as_ptr(), Rc::as_ptr(&observer)))
                .map(|entry| entry.id);
            if let Some(id) = existing {
                return id;
            }
            let id = ObserverId::next();
            observers.push(ObserverEntry {
                id,
                observer: Rc::downgrade(&observer),
            });
            id
        };
        tracing::debug!(
            message = "lifecycle.observer_added",
            registry = self.inner.id,
            observer = id.raw()
        );
        id
    }

    /// Unregister the observer with `id`. Unknown ids are ignored.
    pub fn remove_observer(&self, id: ObserverId) {
        self.inner.remove(id);
    }

    /// Unregister `observer` by identity. Unknown observers are ignored.
    pub fn remove_observer_rc(&self, observer: &Rc<dyn LifecycleObserver>) {
        let id = self
            .inner
            .observers
            .borrow()
            .iter()
            .find(|entry| std::ptr::addr_eq(entry.observer.as_ptr(), Rc::as_ptr(observer)))
            .map(|entry| entry.id);
        if let Some(id) = id {
            self.inner.remove(id);
        }
    }

    /// Number of live observers, after purging released ones.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner
            .control
            .assert_control_thread("LifecycleRegistry::observer_count");
        self.inner.purge();
        self.inner.observers.borrow().len()
    }

    /// Whether an observer with `id` is registered and alive.
    #[must_use]
    pub fn has_observer(&self, id: ObserverId) -> bool {
        self.inner
            .observers
            .borrow()
            .iter()
            .any(|entry| entry.id == id && entry.observer.strong_count() > 0)
    }

    /// Apply `event` and notify observers.
    pub fn handle_event(&self, event: LifecycleEvent) {
        self.apply(event, None);
    }

    /// Apply `event`, run `hook` with it, then notify observers.
    pub fn handle_event_with(&self, event: LifecycleEvent, mut hook: impl FnMut(LifecycleEvent)) {
        self.apply(event, Some(&mut hook));
    }

    /// Apply `event` only if the lifecycle is in the event's source state.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidEventForState`] when the current state is not
    /// [`LifecycleEvent::state_before`]; nothing is applied in that case.
    pub fn handle_event_checked(&self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let state = self.current_state();
        if state != event.state_before() {
            return Err(LifecycleError::InvalidEventForState { state, event });
        }
        self.apply(event, None);
        Ok(())
    }

    /// Move to `target` through the minimal event path.
    ///
    /// Unreachable targets are ignored: no event is applied and no error is
    /// reported. Use [`LifecycleState::events_to_state`] for strict paths.
    pub fn mark_state(&self, target: LifecycleState) {
        self.mark_state_with(target, |_| {});
    }

    /// Like [`mark_state`](Self::mark_state), running `hook` for each event
    /// before observers hear about it.
    pub fn mark_state_with(&self, target: LifecycleState, mut hook: impl FnMut(LifecycleEvent)) {
        self.inner
            .control
            .assert_control_thread("LifecycleRegistry::mark_state");
        let Ok(events) = self.current_state().events_to_state(target) else {
            return;
        };
        for event in events {
            self.apply(event, Some(&mut hook));
        }
    }

    fn apply(&self, event: LifecycleEvent, hook: Option<&mut dyn FnMut(LifecycleEvent)>) {
        self.inner
            .control
            .assert_control_thread("LifecycleRegistry::handle_event");
        let from = self.inner.state.replace(event.state_after());
        tracing::trace!(
            message = "lifecycle.event",
            registry = self.inner.id,
            %event,
            %from,
            to = %event.state_after()
        );
        if let Some(hook) = hook {
            hook(event);
        }
        self.notify(event);
    }

    fn notify(&self, event: LifecycleEvent) {
        let live: Vec<(ObserverId, Rc<dyn LifecycleObserver>)> = self
            .inner
            .observers
            .borrow()
            .iter()
            .filter_map(|entry| entry.observer.upgrade().map(|obs| (entry.id, obs)))
            .collect();
        for (id, observer) in live {
            // An earlier callback may have removed this observer.
            if !self.inner.contains(id) {
                continue;
            }
            match event {
                LifecycleEvent::Create => observer.on_create(self),
                LifecycleEvent::Start => observer.on_start(self),
                LifecycleEvent::Resume => observer.on_resume(self),
                LifecycleEvent::Pause => observer.on_pause(self),
                LifecycleEvent::Stop => observer.on_stop(self),
                LifecycleEvent::Destroy => observer.on_destroy(self),
            }
        }
    }

    /// A non-owning handle to this registry.
    #[must_use]
    pub fn downgrade(&self) -> WeakLifecycle {
        WeakLifecycle {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// A `Send + Sync` handle for removing observers from any thread.
    #[must_use]
    pub fn remote(&self) -> RegistryRemote {
        let mailbox = match self.inner.mailbox.get() {
            Some(mailbox) => mailbox,
            None => {
                let weak: Weak<dyn Mailbox> = Rc::downgrade(&self.inner) as Weak<dyn Mailbox>;
                let mailbox = self.inner.control.register_mailbox(weak);
                self.inner.mailbox.set(Some(mailbox));
                mailbox
            }
        };
        RegistryRemote {
            registry: self.inner.id,
            mailbox,
            control: self.inner.control.handle(),
        }
    }
}

/// Non-owning handle to a [`LifecycleRegistry`].
#[derive(Clone)]
pub struct WeakLifecycle {
    inner: Weak<RegistryInner>,
}

impl fmt::Debug for WeakLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakLifecycle")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl WeakLifecycle {
    #[must_use]
    pub fn upgrade(&self) -> Option<LifecycleRegistry> {
        self.inner
            .upgrade()
            .map(|inner| LifecycleRegistry { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// The registry's state, or `None` once it has been released.
    #[must_use]
    pub fn current_state(&self) -> Option<LifecycleState> {
        self.inner.upgrade().map(|inner| inner.state.get())
    }

    /// Whether this handle refers to `registry`.
    #[must_use]
    pub fn is(&self, registry: &LifecycleRegistry) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&registry.inner))
    }
}

/// Thread-safe handle for unregistering observers during teardown.
///
/// On the control thread removal happens immediately; elsewhere it is
/// re-enqueued onto the control loop and the caller never blocks.
#[derive(Debug, Clone)]
pub struct RegistryRemote {
    registry: u64,
    mailbox: MailboxId,
    control: LoopHandle,
}

impl RegistryRemote {
    /// Id of the registry this handle addresses.
    #[must_use]
    pub fn registry_id(&self) -> u64 {
        self.registry
    }

    /// Unregister the observer with `id`, from any thread.
    pub fn remove_observer(&self, id: ObserverId) {
        self.control.deliver(self.mailbox, id.raw());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleEvent::*;
    use crate::testing::RecordingObserver;
    use tracing_test::traced_test;

    #[test]
    fn state_updates_before_observers_and_hook_runs_first() {
        let registry = LifecycleRegistry::new();
        let observed = Rc::new(RefCell::new(Vec::new()));

        struct StateProbe(Rc<RefCell<Vec<String>>>);
        impl LifecycleObserver for StateProbe {
            fn on_create(&self, lifecycle: &LifecycleRegistry) {
                self.0
                    .borrow_mut()
                    .push(format!("observer:{}", lifecycle.current_state()));
            }
        }

        let probe: Rc<dyn LifecycleObserver> = Rc::new(StateProbe(Rc::clone(&observed)));
        registry.add_observer(Rc::clone(&probe));

        let hook_log = Rc::clone(&observed);
        let hook_registry = registry.clone();
        registry.handle_event_with(Create, move |event| {
            hook_log.borrow_mut().push(format!(
                "hook:{event}:{}",
                hook_registry.current_state()
            ));
        });

        assert_eq!(
            *observed.borrow(),
            vec!["hook:CREATE:CREATED".to_string(), "observer:CREATED".to_string()]
        );
    }

    #[test]
    fn mark_state_walks_the_minimal_path() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        registry.add_observer(recorder.clone());

        registry.mark_state(LifecycleState::Resumed);
        assert_eq!(recorder.events(), vec![Create, Start, Resume]);

        registry.mark_state(LifecycleState::Destroyed);
        assert_eq!(
            recorder.events(),
            vec![Create, Start, Resume, Pause, Stop, Destroy]
        );
        assert_eq!(registry.current_state(), LifecycleState::Destroyed);
    }

    #[test]
    fn mark_state_hook_sees_every_event() {
        let registry = LifecycleRegistry::with_state(LifecycleState::Created);
        let mut hooked = Vec::new();
        registry.mark_state_with(LifecycleState::Resumed, |event| hooked.push(event));
        assert_eq!(hooked, vec![Start, Resume]);
    }

    #[test]
    fn mark_state_ignores_unreachable_targets() {
        let registry = LifecycleRegistry::with_state(LifecycleState::Started);
        let recorder = RecordingObserver::new();
        registry.add_observer(recorder.clone());

        registry.mark_state(LifecycleState::Initialized);
        assert_eq!(registry.current_state(), LifecycleState::Started);
        assert!(recorder.events().is_empty());

        registry.mark_state(LifecycleState::Destroyed);
        registry.mark_state(LifecycleState::Resumed);
        assert_eq!(registry.current_state(), LifecycleState::Destroyed);
        assert_eq!(recorder.events(), vec![Stop, Destroy]);
    }

    #[test]
    fn adding_twice_is_idempotent() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let first = registry.add_observer(recorder.clone());
        let second = registry.add_observer(recorder.clone());
        assert_eq!(first, second);
        assert_eq!(registry.observer_count(), 1);

        registry.handle_event(Create);
        assert_eq!(recorder.events(), vec![Create]);
    }

    #[test]
    fn removing_unknown_observer_is_noop() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let id = registry.add_observer(recorder.clone());
        registry.remove_observer(id);
        registry.remove_observer(id);
        let stranger: Rc<dyn LifecycleObserver> = RecordingObserver::new();
        registry.remove_observer_rc(&stranger);
        assert_eq!(registry.observer_count(), 0);
    }

    #[test]
    fn remove_by_identity() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let as_dyn: Rc<dyn LifecycleObserver> = recorder.clone();
        registry.add_observer(Rc::clone(&as_dyn));
        registry.remove_observer_rc(&as_dyn);
        registry.handle_event(Create);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn released_observers_are_purged() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let id = registry.add_observer(recorder.clone());
        assert!(registry.has_observer(id));
        drop(recorder);
        assert!(!registry.has_observer(id));
        assert_eq!(registry.observer_count(), 0);
        registry.handle_event(Create);
    }

    #[test]
    fn observer_removed_mid_fanout_is_skipped() {
        let registry = LifecycleRegistry::new();
        let victim = RecordingObserver::new();
        let victim_id = Rc::new(Cell::new(None));

        struct Remover(Rc<Cell<Option<ObserverId>>>);
        impl LifecycleObserver for Remover {
            fn on_create(&self, lifecycle: &LifecycleRegistry) {
                if let Some(id) = self.0.get() {
                    lifecycle.remove_observer(id);
                }
            }
        }

        let remover: Rc<dyn LifecycleObserver> = Rc::new(Remover(Rc::clone(&victim_id)));
        registry.add_observer(Rc::clone(&remover));
        victim_id.set(Some(registry.add_observer(victim.clone())));

        registry.handle_event(Create);
        assert!(victim.events().is_empty());
    }

    #[test]
    fn checked_event_rejects_wrong_source_state() {
        let registry = LifecycleRegistry::new();
        let err = registry.handle_event_checked(Start).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidEventForState {
                state: LifecycleState::Initialized,
                event: Start
            }
        );
        assert_eq!(registry.current_state(), LifecycleState::Initialized);
        registry.handle_event_checked(Create).unwrap();
        assert_eq!(registry.current_state(), LifecycleState::Created);
    }

    #[test]
    fn remote_removal_from_other_thread_is_deferred() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let id = registry.add_observer(recorder.clone());
        let remote = registry.remote();

        std::thread::spawn(move || remote.remove_observer(id))
            .join()
            .unwrap();

        assert!(registry.has_observer(id));
        registry.control().run_until_idle();
        assert!(!registry.has_observer(id));
    }

    #[test]
    fn remote_removal_on_control_thread_is_immediate() {
        let registry = LifecycleRegistry::new();
        let recorder = RecordingObserver::new();
        let id = registry.add_observer(recorder.clone());
        registry.remote().remove_observer(id);
        assert!(!registry.has_observer(id));
    }

    #[test]
    fn weak_handle_tracks_liveness() {
        let registry = LifecycleRegistry::with_state(LifecycleState::Started);
        let weak = registry.downgrade();
        assert!(weak.is(&registry));
        assert_eq!(weak.current_state(), Some(LifecycleState::Started));
        assert!(weak.upgrade().is_some_and(|r| r.same_as(&registry)));
        drop(registry);
        assert!(!weak.is_alive());
        assert_eq!(weak.current_state(), None);
    }

    #[test]
    fn dropping_the_registry_tells_live_observers() {
        struct Released {
            count: Cell<u32>,
            weak: RefCell<Option<WeakLifecycle>>,
            alive_during_callback: Cell<bool>,
        }
        impl LifecycleObserver for Released {
            fn on_released(&self) {
                self.count.set(self.count.get() + 1);
                let alive = self.weak.borrow().as_ref().is_some_and(WeakLifecycle::is_alive);
                self.alive_during_callback.set(alive);
            }
        }

        let registry = LifecycleRegistry::with_state(LifecycleState::Resumed);
        let kept = Rc::new(Released {
            count: Cell::new(0),
            weak: RefCell::new(Some(registry.downgrade())),
            alive_during_callback: Cell::new(true),
        });
        registry.add_observer(kept.clone());
        let gone = RecordingObserver::new();
        registry.add_observer(gone.clone());
        drop(gone);

        drop(registry);
        assert_eq!(kept.count.get(), 1);
        assert!(!kept.alive_during_callback.get());
    }

    #[test]
    #[traced_test]
    fn events_are_traced() {
        let registry = LifecycleRegistry::new();
        registry.mark_state(LifecycleState::Created);
        assert!(logs_contain("lifecycle.event"));
    }
}
