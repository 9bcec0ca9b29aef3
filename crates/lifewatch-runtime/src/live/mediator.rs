#![forbid(unsafe_code)]

//! A mutable holder fed by other holders.
//!
//! Each source is observed forever, but its callback runs only while the
//! mediator itself has an active observer. Sources are keyed by
//! [`HolderId`]; a holder can be added at most once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use super::holder::{ActivityHooks, HolderId, HolderKind, Live, MutableLive, Subscription};
use crate::error::LiveError;

struct MediatorState {
    active: Cell<bool>,
    sources: RefCell<HashMap<HolderId, Subscription>>,
    hooks: RefCell<Option<Rc<dyn ActivityHooks>>>,
}

impl ActivityHooks for MediatorState {
    fn on_active(&self) {
        self.active.set(true);
        let hooks = self.hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.on_active();
        }
    }

    fn on_inactive(&self) {
        self.active.set(false);
        let hooks = self.hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.on_inactive();
        }
    }
}

/// A [`MutableLive`] that merges updates from source holders.
///
/// Source callbacks usually write into the mediator. Capture a
/// [`WeakMutableLive`](super::WeakMutableLive) for that, so the mediator is
/// not kept alive by its own sources.
pub struct MediatorLive<T> {
    target: MutableLive<T>,
    state: Rc<MediatorState>,
}

impl<T> Clone for MediatorLive<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for MediatorLive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatorLive")
            .field("target", &self.target)
            .field("active", &self.state.active.get())
            .field("sources", &self.state.sources.borrow().len())
            .finish()
    }
}

impl<T> Deref for MediatorLive<T> {
    type Target = MutableLive<T>;

    fn deref(&self) -> &MutableLive<T> {
        &self.target
    }
}

impl<T> From<MediatorLive<T>> for Live<T> {
    fn from(mediator: MediatorLive<T>) -> Self {
        mediator.target.into()
    }
}

impl<T: Clone + PartialEq + 'static> MediatorLive<T> {
    pub fn new(initial: T) -> Self {
        let target = MutableLive::with_kind(initial, HolderKind::Mediator);
        let state = Rc::new(MediatorState {
            active: Cell::new(false),
            sources: RefCell::new(HashMap::new()),
            hooks: RefCell::new(None),
        });
        target.set_hooks(Rc::clone(&state) as Rc<dyn ActivityHooks>);
        Self { target, state }
    }

    /// A mediator that also reports its activity edges to `hooks`.
    pub fn with_hooks(initial: T, hooks: impl ActivityHooks + 'static) -> Self {
        let mediator = Self::new(initial);
        *mediator.state.hooks.borrow_mut() = Some(Rc::new(hooks));
        mediator
    }

    /// Forward `source`'s changes to `on_change` while this mediator is
    /// active.
    ///
    /// # Errors
    ///
    /// [`LiveError::SourceAlreadyAdded`] if `source` is already a source of
    /// this mediator.
    pub fn add_source<S: Clone + PartialEq + 'static>(
        &self,
        source: &Live<S>,
        on_change: impl Fn(&S) + 'static,
    ) -> Result<(), LiveError> {
        self.target.assert_control_thread("MediatorLive::add_source");
        let key = source.id();
        if self.state.sources.borrow().contains_key(&key) {
            return Err(LiveError::SourceAlreadyAdded { holder: key });
        }
        let gate = Rc::downgrade(&self.state);
        let subscription = source.subscribe(move |value| {
            if gate.upgrade().is_some_and(|state| state.active.get()) {
                on_change(value);
            }
        });
        self.state.sources.borrow_mut().insert(key, subscription);
        tracing::debug!(
            message = "live.source_added",
            holder = %self.target.id(),
            source = %key
        );
        Ok(())
    }

    /// Stop listening to `source`. Unknown sources are ignored.
    pub fn remove_source<S: Clone + PartialEq + 'static>(&self, source: &Live<S>) {
        self.target
            .assert_control_thread("MediatorLive::remove_source");
        let removed = self.state.sources.borrow_mut().remove(&source.id());
        if let Some(subscription) = removed {
            drop(subscription);
            tracing::debug!(
                message = "live.source_removed",
                holder = %self.target.id(),
                source = %source.id()
            );
        }
    }

    pub fn remove_all_sources(&self) {
        self.target
            .assert_control_thread("MediatorLive::remove_all_sources");
        let drained: Vec<Subscription> = self
            .state
            .sources
            .borrow_mut()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        drop(drained);
    }

    #[must_use]
    pub fn source_count(&self) -> usize {
        self.state.sources.borrow().len()
    }

    #[must_use]
    pub fn has_source<S>(&self, source: &Live<S>) -> bool
    where
        S: Clone + PartialEq + 'static,
    {
        self.state.sources.borrow().contains_key(&source.id())
    }

    /// Whether at least one observer of this mediator is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.active.get()
    }
}
