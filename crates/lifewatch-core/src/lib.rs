#![forbid(unsafe_code)]

//! Core: lifecycle state machine, lifecycle registry, and control-loop dispatch.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lifecycle;

#[cfg(feature = "tracing-json")]
pub mod logging;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use config::DispatchConfig;
pub use dispatch::{ControlLoop, LoopHandle, Mailbox, MailboxId};
pub use error::{DispatchError, LifecycleError, Result};
pub use host::{AppState, ComponentHooks, HostedComponent, target_state};
pub use lifecycle::{
    LifecycleEvent, LifecycleObserver, LifecycleOwner, LifecycleRegistry, LifecycleState,
    ObserverId, RegistryRemote, WeakLifecycle, events_to_state,
};
