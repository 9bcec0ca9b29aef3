#![forbid(unsafe_code)]

//! Lifecycle states and the registry that owners drive.
//!
//! An owner (a screen, a session, a test harness) holds a
//! [`LifecycleRegistry`] and feeds it events, either one at a time through
//! [`handle_event`](LifecycleRegistry::handle_event) or as a target state
//! through [`mark_state`](LifecycleRegistry::mark_state). Observers are
//! registered weakly and are told about every transition in order.
//!
//! # Example
//!
//! ```
//! use lifewatch_core::lifecycle::{LifecycleRegistry, LifecycleState};
//!
//! let registry = LifecycleRegistry::new();
//! registry.mark_state(LifecycleState::Resumed);
//! assert_eq!(registry.current_state(), LifecycleState::Resumed);
//!
//! registry.mark_state(LifecycleState::Destroyed);
//! assert_eq!(registry.current_state(), LifecycleState::Destroyed);
//! ```

mod registry;
mod state;

pub use registry::{
    LifecycleObserver, LifecycleOwner, LifecycleRegistry, ObserverId, RegistryRemote,
    WeakLifecycle,
};
pub use state::{LifecycleEvent, LifecycleState, events_to_state};
