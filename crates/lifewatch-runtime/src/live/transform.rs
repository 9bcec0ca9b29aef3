#![forbid(unsafe_code)]

//! Derived holders.
//!
//! [`map`] keeps a holder equal to a function of its source. [`switch_map`]
//! picks a holder from the trigger's value and mirrors it until the trigger
//! changes again.
//!
//! A derived holder keeps its upstream holders alive. Upstream callbacks
//! reach the derived holder only through a weak handle, so dropping the last
//! handle to a derived holder detaches it from everything it observed.

use std::cell::RefCell;
use std::rc::Rc;

use super::holder::{HolderKind, Live, Subscription, WeakLive};

/// A holder whose value is `f` applied to `source`'s value.
///
/// `f` runs once at construction and then on every change the source
/// delivers.
pub fn map<S, T>(source: &Live<S>, f: impl Fn(&S) -> T + 'static) -> Live<T>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    let derived = Live::with_kind(source.with_value(&f), HolderKind::Transformed);
    let weak = derived.downgrade();
    let subscription = source.subscribe(move |value| {
        if let Some(derived) = weak.upgrade() {
            derived.set_value_internal(f(value));
        }
    });
    derived.attach_upstream(subscription);
    derived
}

/// A holder that mirrors `select(trigger value)`.
///
/// When the trigger changes, the previously selected holder is dropped and
/// the new one's current value is published right away.
pub fn switch_map<S, T>(trigger: &Live<S>, select: impl Fn(&S) -> Live<T> + 'static) -> Live<T>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    let first = trigger.with_value(&select);
    let derived = Live::with_kind(first.value(), HolderKind::Switched);
    let weak = derived.downgrade();

    let current = Rc::new(RefCell::new(Some(mirror(&first, weak.clone()))));
    let slot = Rc::clone(&current);
    let trigger_subscription = trigger.subscribe(move |value| {
        let Some(derived) = weak.upgrade() else {
            return;
        };
        let next = select(value);
        let previous = slot.borrow_mut().take();
        drop(previous);
        let subscription = mirror(&next, weak.clone());
        *slot.borrow_mut() = Some(subscription);
        tracing::debug!(
            message = "live.switched",
            holder = %derived.id(),
            source = %next.id()
        );
        derived.set_value_internal(next.value());
    });

    derived.attach_upstream(trigger_subscription);
    derived.attach_upstream(Subscription::new(move || {
        let selected = current.borrow_mut().take();
        drop(selected);
    }));
    derived
}

fn mirror<T>(source: &Live<T>, target: WeakLive<T>) -> Subscription
where
    T: Clone + PartialEq + 'static,
{
    source.subscribe(move |value| {
        if let Some(target) = target.upgrade() {
            target.set_value_internal(value.clone());
        }
    })
}
