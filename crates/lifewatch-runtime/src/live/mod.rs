#![forbid(unsafe_code)]

//! Lifecycle-aware observable values.
//!
//! - [`Live`]: read-only holder; observers are scoped to a lifecycle or
//!   registered forever.
//! - [`MutableLive`]: writable holder with synchronous [`set_value`](MutableLive::set_value)
//!   and coalescing cross-thread [`post_value`](MutableLive::post_value).
//! - [`MediatorLive`]: writable holder fed by other holders while it is
//!   being watched.
//! - [`map`] / [`switch_map`]: holders derived from other holders.
//!
//! # Architecture
//!
//! Holders use `Rc` for single-threaded shared ownership and belong to the
//! control thread that created them. Each observer is a binding that reads
//! its owner's lifecycle on demand; the lifecycle registry holds bindings
//! weakly, and bindings hold their owner weakly.
//!
//! # Invariants
//!
//! 1. Observers never receive the same value twice in a row.
//! 2. Observers of an inactive owner receive nothing; on activation they
//!    receive the latest value they missed, once.
//! 3. Observers are notified in registration order.
//! 4. Activity hooks fire only when the aggregate signal flips.
//! 5. Dropping a [`Subscription`] or a derived holder removes the
//!    corresponding observers before the next notification.

mod binding;
mod binding_set;
mod holder;
mod mediator;
mod transform;

pub use binding::ObserverHandle;
pub use holder::{
    ActivityHooks, HolderId, HolderKind, Live, MutableLive, Subscription, ValuePoster,
    WeakLive, WeakMutableLive,
};
pub use mediator::MediatorLive;
pub use transform::{map, switch_map};
