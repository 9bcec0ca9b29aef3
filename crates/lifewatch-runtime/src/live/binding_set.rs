#![forbid(unsafe_code)]

//! All bindings of one value holder, plus the holder's aggregate activity.
//!
//! The set is active while at least one binding is active. The
//! [`ActivityHooks`] are invoked only on edges of that signal, never twice in
//! a row with the same direction.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use lifewatch_core::lifecycle::LifecycleRegistry;

use super::binding::{ActivityListener, Binding, ObserverHandle};
use super::holder::{ActivityHooks, HolderId};

struct SetShared<T> {
    holder: HolderId,
    bindings: RefCell<Vec<Rc<Binding<T>>>>,
    active: Cell<bool>,
    hooks: RefCell<Option<Rc<dyn ActivityHooks>>>,
}

impl<T> SetShared<T> {
    fn refresh(&self) {
        let now = self.bindings.borrow().iter().any(|b| b.is_active());
        if self.active.replace(now) == now {
            return;
        }
        if now {
            tracing::debug!(message = "live.active", holder = %self.holder);
        } else {
            tracing::debug!(message = "live.inactive", holder = %self.holder);
        }
        let hooks = self.hooks.borrow().clone();
        if let Some(hooks) = hooks {
            if now {
                hooks.on_active();
            } else {
                hooks.on_inactive();
            }
        }
    }

    fn purge(&self) {
        self.bindings.borrow_mut().retain(|b| !b.is_stale());
    }

    fn detach_where(&self, mut matches: impl FnMut(&Binding<T>) -> bool) {
        self.purge();
        let removed: Vec<Rc<Binding<T>>> = {
            let mut bindings = self.bindings.borrow_mut();
            let (removed, kept): (Vec<_>, Vec<_>) =
                bindings.drain(..).partition(|b| matches(b));
            *bindings = kept;
            removed
        };
        for binding in &removed {
            binding.detach();
            tracing::debug!(
                message = "live.observer_removed",
                holder = %self.holder,
                observer = binding.handle().raw()
            );
        }
        self.refresh();
        drop(removed);
    }
}

impl<T> ActivityListener for SetShared<T> {
    fn binding_activity_changed(&self) {
        self.refresh();
    }
}

impl<T> Drop for SetShared<T> {
    fn drop(&mut self) {
        for binding in self.bindings.get_mut().drain(..) {
            binding.detach();
        }
    }
}

/// The bindings of one holder.
pub(crate) struct BindingSet<T> {
    shared: Rc<SetShared<T>>,
}

impl<T> BindingSet<T> {
    pub(crate) fn has_observers(&self) -> bool {
        self.shared.bindings.borrow().iter().any(|b| !b.is_stale())
    }

    pub(crate) fn has_active_observers(&self) -> bool {
        self.shared.bindings.borrow().iter().any(|b| b.is_active())
    }

    /// The last aggregate signal reported to the hooks.
    pub(crate) fn is_active(&self) -> bool {
        self.shared.active.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.bindings.borrow().len()
    }

    pub(crate) fn set_hooks(&self, hooks: Option<Rc<dyn ActivityHooks>>) {
        *self.shared.hooks.borrow_mut() = hooks;
    }

    pub(crate) fn remove(&self, handle: ObserverHandle) {
        self.shared.detach_where(|b| b.handle() == handle);
    }

    pub(crate) fn remove_all_with_owner(&self, lifecycle: &LifecycleRegistry) {
        self.shared.detach_where(|b| b.has_owner(lifecycle));
    }
}

impl<T: Clone + PartialEq + 'static> BindingSet<T> {
    pub(crate) fn new(holder: HolderId) -> Self {
        Self {
            shared: Rc::new(SetShared {
                holder,
                bindings: RefCell::new(Vec::new()),
                active: Cell::new(false),
                hooks: RefCell::new(None),
            }),
        }
    }

    fn listener(&self) -> Weak<dyn ActivityListener> {
        Rc::downgrade(&self.shared) as Weak<dyn ActivityListener>
    }

    pub(crate) fn insert_forever(&self, callback: Rc<dyn Fn(&T)>) -> ObserverHandle {
        let binding = Binding::forever(callback, self.listener());
        self.insert(binding)
    }

    pub(crate) fn insert_bound(
        &self,
        lifecycle: &LifecycleRegistry,
        callback: Rc<dyn Fn(&T)>,
    ) -> ObserverHandle {
        let binding = Binding::bound(lifecycle, callback, self.listener());
        self.insert(binding)
    }

    fn insert(&self, binding: Rc<Binding<T>>) -> ObserverHandle {
        self.shared.purge();
        let handle = binding.handle();
        tracing::debug!(
            message = "live.observer_added",
            holder = %self.shared.holder,
            observer = handle.raw(),
            forever = binding.is_forever()
        );
        self.shared.bindings.borrow_mut().push(binding);
        self.shared.refresh();
        handle
    }

    /// Offer `value` to every binding, in insertion order.
    ///
    /// Stops early once `superseded` reports that a newer value is waiting.
    pub(crate) fn value_changed(&self, value: &T, superseded: impl Fn() -> bool) {
        let snapshot: Vec<Rc<Binding<T>>> = self.shared.bindings.borrow().clone();
        for binding in snapshot {
            if superseded() {
                break;
            }
            binding.value_changed(value);
        }
    }
}
