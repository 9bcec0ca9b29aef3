#![forbid(unsafe_code)]

//! Value holders: the read-only [`Live`] view and the writable [`MutableLive`].
//!
//! # Design
//!
//! A holder owns its current value, a binding set, and the control loop of
//! the thread that created it. Every mutation goes through one path: store
//! the value, then offer it to each binding. Bindings decide on their own
//! whether to deliver, defer, or drop it.
//!
//! Values posted from other threads land in a mutex-protected staging slot.
//! The first post after a drain schedules one drain on the control loop;
//! later posts only overwrite the slot, so a burst collapses to its last
//! value.
//!
//! # Invariants
//!
//! 1. `value()` always returns the most recently set or drained value.
//! 2. A set during fan-out restarts the fan-out with the newer value; no
//!    binding sees the superseded value after the newer one.
//! 3. At most one drain is scheduled per holder at any time.
//! 4. Draining clears the slot and the scheduled flag under the same lock.
//!
//! # Failure Modes
//!
//! - **Holder dropped with a drain in flight**: the drain letter is dropped
//!   by the control loop.
//! - **Control thread gone**: posts are accepted and silently discarded.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lifewatch_core::dispatch::{ControlLoop, LoopHandle, Mailbox, MailboxId};
use lifewatch_core::lifecycle::{LifecycleOwner, LifecycleRegistry};

use super::binding::ObserverHandle;
use super::binding_set::BindingSet;
use super::transform;

static NEXT_HOLDER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a value holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HolderId(u64);

impl HolderId {
    pub(crate) fn next() -> Self {
        Self(NEXT_HOLDER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "holder#{}", self.0)
    }
}

/// How a holder gets its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    Mutable,
    Mediator,
    Transformed,
    Switched,
}

/// Callbacks for when a holder gains its first active observer and loses
/// its last one. Both default to no-ops.
pub trait ActivityHooks {
    fn on_active(&self) {}
    fn on_inactive(&self) {}
}

struct Staging<T> {
    value: Option<T>,
    drain_scheduled: bool,
}

struct LiveInner<T> {
    id: HolderId,
    kind: HolderKind,
    value: RefCell<T>,
    bindings: BindingSet<T>,
    control: ControlLoop,
    staging: Arc<Mutex<Staging<T>>>,
    mailbox: Cell<Option<MailboxId>>,
    /// Subscriptions to the holders this one derives from.
    upstream: RefCell<Vec<Subscription>>,
    dispatching: Cell<bool>,
    superseded: Cell<bool>,
}

impl<T: Clone + PartialEq + 'static> LiveInner<T> {
    fn publish(&self, value: T) {
        *self.value.borrow_mut() = value;
        if self.dispatching.get() {
            self.superseded.set(true);
            return;
        }
        self.dispatching.set(true);
        loop {
            self.superseded.set(false);
            let current = self.value.borrow().clone();
            self.bindings
                .value_changed(&current, || self.superseded.get());
            if !self.superseded.get() {
                break;
            }
        }
        self.dispatching.set(false);
    }
}

impl<T: Clone + PartialEq + 'static> Mailbox for LiveInner<T> {
    fn deliver(&self, _token: u64) {
        let next = {
            let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
            staging.drain_scheduled = false;
            staging.value.take()
        };
        tracing::trace!(message = "live.drain", holder = %self.id, filled = next.is_some());
        if let Some(value) = next {
            self.publish(value);
        }
    }
}

impl<T> Drop for LiveInner<T> {
    fn drop(&mut self) {
        if let Some(mailbox) = self.mailbox.get() {
            self.control.unregister_mailbox(mailbox);
        }
    }
}

/// A read-only, lifecycle-aware observable value.
///
/// Cloning a `Live` creates a new handle to the **same** holder.
pub struct Live<T> {
    inner: Rc<LiveInner<T>>,
}

impl<T> Clone for Live<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Live<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Live");
        s.field("id", &self.inner.id).field("kind", &self.inner.kind);
        match self.inner.value.try_borrow() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<borrowed>"),
        };
        s.field("observers", &self.inner.bindings.len())
            .field("active", &self.inner.bindings.is_active())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Live<T> {
    pub(crate) fn with_kind(initial: T, kind: HolderKind) -> Self {
        let id = HolderId::next();
        Self {
            inner: Rc::new(LiveInner {
                id,
                kind,
                value: RefCell::new(initial),
                bindings: BindingSet::new(id),
                control: ControlLoop::current(),
                staging: Arc::new(Mutex::new(Staging {
                    value: None,
                    drain_scheduled: false,
                })),
                mailbox: Cell::new(None),
                upstream: RefCell::new(Vec::new()),
                dispatching: Cell::new(false),
                superseded: Cell::new(false),
            }),
        }
    }

    /// A clone of the current value.
    #[must_use]
    pub fn value(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Access the current value by reference.
    pub fn with_value<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    #[must_use]
    pub fn id(&self) -> HolderId {
        self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> HolderKind {
        self.inner.kind
    }

    #[must_use]
    pub fn has_observers(&self) -> bool {
        self.inner.control.assert_control_thread("Live::has_observers");
        self.inner.bindings.has_observers()
    }

    #[must_use]
    pub fn has_active_observers(&self) -> bool {
        self.inner
            .control
            .assert_control_thread("Live::has_active_observers");
        self.inner.bindings.has_active_observers()
    }

    /// Deliver changes to `callback` while `owner` is Started or Resumed.
    ///
    /// The binding ends when the owner is destroyed. Nothing is delivered at
    /// subscription time.
    pub fn observe<O: LifecycleOwner + ?Sized>(
        &self,
        owner: &O,
        callback: impl Fn(&T) + 'static,
    ) -> ObserverHandle {
        self.observe_lifecycle(owner.lifecycle(), callback)
    }

    pub fn observe_lifecycle(
        &self,
        lifecycle: &LifecycleRegistry,
        callback: impl Fn(&T) + 'static,
    ) -> ObserverHandle {
        self.inner.control.assert_control_thread("Live::observe");
        self.inner.bindings.insert_bound(lifecycle, Rc::new(callback))
    }

    /// Deliver every change to `callback` until it is removed.
    pub fn observe_forever(&self, callback: impl Fn(&T) + 'static) -> ObserverHandle {
        self.inner
            .control
            .assert_control_thread("Live::observe_forever");
        self.inner.bindings.insert_forever(Rc::new(callback))
    }

    /// Like [`observe_forever`](Self::observe_forever), removed when the
    /// returned guard is dropped.
    ///
    /// The guard keeps this holder alive.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let handle = self.observe_forever(callback);
        let source = self.clone();
        Subscription::new(move || source.remove_observer(handle))
    }

    /// Remove one observer. Unknown handles are ignored.
    pub fn remove_observer(&self, handle: ObserverHandle) {
        self.inner
            .control
            .assert_control_thread("Live::remove_observer");
        self.inner.bindings.remove(handle);
    }

    /// Remove every observer bound to `owner`.
    pub fn remove_observers<O: LifecycleOwner + ?Sized>(&self, owner: &O) {
        self.inner
            .control
            .assert_control_thread("Live::remove_observers");
        self.inner.bindings.remove_all_with_owner(owner.lifecycle());
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakLive<T> {
        WeakLive {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// A holder whose value is always `f` of this one's.
    pub fn map<U: Clone + PartialEq + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Live<U> {
        transform::map(self, f)
    }

    /// A holder that mirrors whichever holder `select` picks for the current
    /// value of this one.
    pub fn switch_map<U: Clone + PartialEq + 'static>(
        &self,
        select: impl Fn(&T) -> Live<U> + 'static,
    ) -> Live<U> {
        transform::switch_map(self, select)
    }

    pub(crate) fn set_value_internal(&self, value: T) {
        self.inner.publish(value);
    }

    pub(crate) fn attach_upstream(&self, subscription: Subscription) {
        self.inner.upstream.borrow_mut().push(subscription);
    }

    pub(crate) fn set_hooks(&self, hooks: Option<Rc<dyn ActivityHooks>>) {
        self.inner.bindings.set_hooks(hooks);
    }

    pub(crate) fn assert_control_thread(&self, op: &'static str) {
        self.inner.control.assert_control_thread(op);
    }

    fn mailbox(&self) -> MailboxId {
        if let Some(mailbox) = self.inner.mailbox.get() {
            return mailbox;
        }
        let weak: Weak<dyn Mailbox> = Rc::downgrade(&self.inner) as Weak<dyn Mailbox>;
        let mailbox = self.inner.control.register_mailbox(weak);
        self.inner.mailbox.set(Some(mailbox));
        mailbox
    }
}

/// Non-owning handle to a [`Live`].
pub struct WeakLive<T> {
    inner: Weak<LiveInner<T>>,
}

impl<T> Clone for WeakLive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for WeakLive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakLive")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T> WeakLive<T> {
    #[must_use]
    pub fn upgrade(&self) -> Option<Live<T>> {
        self.inner.upgrade().map(|inner| Live { inner })
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// RAII guard that removes an observer when dropped.
#[must_use = "dropping a Subscription removes the observer"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Remove the observer now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

/// A [`Live`] that can be written.
///
/// Derefs to [`Live`] for reading and observing.
pub struct MutableLive<T> {
    live: Live<T>,
}

impl<T> Clone for MutableLive<T> {
    fn clone(&self) -> Self {
        Self {
            live: self.live.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MutableLive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MutableLive").field(&self.live).finish()
    }
}

impl<T> Deref for MutableLive<T> {
    type Target = Live<T>;

    fn deref(&self) -> &Live<T> {
        &self.live
    }
}

impl<T> From<MutableLive<T>> for Live<T> {
    fn from(holder: MutableLive<T>) -> Self {
        holder.live
    }
}

impl<T: Clone + PartialEq + 'static> MutableLive<T> {
    pub fn new(initial: T) -> Self {
        Self::with_kind(initial, HolderKind::Mutable)
    }

    pub(crate) fn with_kind(initial: T, kind: HolderKind) -> Self {
        Self {
            live: Live::with_kind(initial, kind),
        }
    }

    /// A holder whose `hooks` run when it gains or loses active observers.
    pub fn with_hooks(initial: T, hooks: impl ActivityHooks + 'static) -> Self {
        let holder = Self::new(initial);
        holder.set_hooks(Rc::new(hooks));
        holder
    }

    pub(crate) fn set_hooks(&self, hooks: Rc<dyn ActivityHooks>) {
        self.live.set_hooks(Some(hooks));
    }

    /// Set the value and notify observers before returning.
    ///
    /// # Panics
    ///
    /// With strict thread checks, panics when called off the control thread.
    pub fn set_value(&self, value: T) {
        self.live.assert_control_thread("MutableLive::set_value");
        self.live.set_value_internal(value);
    }

    /// Set the value on a later turn of the control loop.
    ///
    /// Posts made before that turn collapse into the last one. Callable from
    /// the control thread; other threads use [`poster`](Self::poster).
    pub fn post_value(&self, value: T) {
        self.poster().post(value);
    }

    #[must_use]
    pub fn as_live(&self) -> Live<T> {
        self.live.clone()
    }

    #[must_use]
    pub fn downgrade_mutable(&self) -> WeakMutableLive<T> {
        WeakMutableLive {
            inner: self.live.downgrade(),
        }
    }

    /// A handle for posting values from any thread.
    #[must_use]
    pub fn poster(&self) -> ValuePoster<T> {
        ValuePoster {
            holder: self.live.inner.id,
            staging: Arc::clone(&self.live.inner.staging),
            mailbox: self.live.mailbox(),
            control: self.live.inner.control.handle(),
        }
    }
}

/// Non-owning handle to a [`MutableLive`].
///
/// Callbacks that write back into the holder they observe capture this to
/// avoid keeping the holder alive through its own observers.
pub struct WeakMutableLive<T> {
    inner: WeakLive<T>,
}

impl<T> Clone for WeakMutableLive<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakMutableLive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMutableLive")
            .field("alive", &self.inner.is_alive())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> WeakMutableLive<T> {
    #[must_use]
    pub fn upgrade(&self) -> Option<MutableLive<T>> {
        self.inner.upgrade().map(|live| MutableLive { live })
    }

    /// Set the value if the holder is still alive.
    pub fn set_value(&self, value: T) {
        if let Some(holder) = self.upgrade() {
            holder.set_value(value);
        }
    }
}

/// `Send` handle that posts values to a [`MutableLive`] from any thread.
pub struct ValuePoster<T> {
    holder: HolderId,
    staging: Arc<Mutex<Staging<T>>>,
    mailbox: MailboxId,
    control: LoopHandle,
}

impl<T> Clone for ValuePoster<T> {
    fn clone(&self) -> Self {
        Self {
            holder: self.holder,
            staging: Arc::clone(&self.staging),
            mailbox: self.mailbox,
            control: self.control.clone(),
        }
    }
}

impl<T> fmt::Debug for ValuePoster<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePoster")
            .field("holder", &self.holder)
            .field("mailbox", &self.mailbox)
            .finish()
    }
}

impl<T> ValuePoster<T> {
    #[must_use]
    pub fn holder(&self) -> HolderId {
        self.holder
    }

    /// Stage `value` and make sure a drain is scheduled.
    pub fn post(&self, value: T) {
        let schedule = {
            let mut staging = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
            staging.value = Some(value);
            !std::mem::replace(&mut staging.drain_scheduled, true)
        };
        if schedule {
            tracing::trace!(message = "live.post", holder = %self.holder);
            self.control.enqueue(self.mailbox, 0);
        }
    }
}
