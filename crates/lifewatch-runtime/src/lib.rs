#![forbid(unsafe_code)]

//! Runtime: lifecycle-aware value holders built on `lifewatch-core`.

pub mod error;
pub mod live;

pub use error::{LiveError, Result};
pub use live::{
    ActivityHooks, HolderId, HolderKind, Live, MediatorLive, MutableLive, ObserverHandle,
    Subscription, ValuePoster, WeakLive, WeakMutableLive, map, switch_map,
};
