#![forbid(unsafe_code)]

//! lifewatch public facade crate.
//!
//! Lifecycle-aware observable values: owners drive a lifecycle, holders
//! deliver changes only to observers whose owner is active.
//!
//! ```
//! use lifewatch::prelude::*;
//!
//! let screen = LifecycleRegistry::new();
//! let count = MutableLive::new(0);
//! count.observe(&screen, |n| println!("count = {n}"));
//!
//! count.set_value(1); // screen not started: held back
//! screen.mark_state(LifecycleState::Resumed); // prints "count = 1"
//! ```

pub mod prelude {
    pub use lifewatch_core as core;
    pub use lifewatch_runtime as runtime;

    pub use lifewatch_core::{
        AppState, ComponentHooks, ControlLoop, DispatchConfig, HostedComponent, LifecycleError,
        LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleRegistry, LifecycleState,
    };
    pub use lifewatch_runtime::{
        ActivityHooks, Live, LiveError, MediatorLive, MutableLive, ObserverHandle, Subscription,
        ValuePoster,
    };
}
