#![forbid(unsafe_code)]

//! Lifecycle states, events, and the path-finding state machine.
//!
//! ```text
//!   initialized     destroyed      created       started       resumed
//!        |              |             |             |             |
//!        |-----------create---------->|             |             |
//!        |              |             |---start---->|             |
//!        |              |             |             |---resume--->|
//!        |              |             |             |<---pause----|
//!        |              |             |<---stop-----|             |
//!        |              |<--destroy---|             |             |
//! ```
//!
//! States are ordered by [`rank`](LifecycleState::rank), not by the time they
//! are entered: `Destroyed` ranks below `Created`, so it is only reachable by
//! retreating from `Created` and has no outgoing events.

use std::cmp::Ordering;
use std::fmt;

use crate::error::LifecycleError;

/// The state of a lifecycle owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Initialized,
    Destroyed,
    Created,
    Started,
    Resumed,
}

impl LifecycleState {
    /// Every state, in rank order.
    pub const ALL: [Self; 5] = [
        Self::Initialized,
        Self::Destroyed,
        Self::Created,
        Self::Started,
        Self::Resumed,
    ];

    /// Numeric rank used to decide between advancing and retreating.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Initialized => 0,
            Self::Destroyed => 1,
            Self::Created => 2,
            Self::Started => 3,
            Self::Resumed => 4,
        }
    }

    /// Whether `self` ranks at or above `other`.
    #[must_use]
    pub const fn is_at_least(self, other: Self) -> bool {
        self.rank() >= other.rank()
    }

    /// Started and Resumed are the states in which observers are active.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Started | Self::Resumed)
    }

    /// The ordered events that move a lifecycle from `self` to `target`.
    ///
    /// Each step advances or retreats by exactly one event toward `target`,
    /// so the path is minimal and never overshoots.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::InvalidStateTransition`] when `target` is
    /// `Initialized` (and `self` is not), or when `self` is `Destroyed` and
    /// `target` is anything else.
    pub fn events_to_state(self, target: Self) -> Result<Vec<LifecycleEvent>, LifecycleError> {
        let invalid = LifecycleError::InvalidStateTransition {
            from: self,
            to: target,
        };
        let mut events = Vec::new();
        let mut current = self;
        while current != target {
            if target == Self::Initialized {
                return Err(invalid);
            }
            let step = if current < target {
                current.advancing_event()
            } else {
                current.retreating_event()
            };
            let Some(event) = step else {
                return Err(invalid);
            };
            events.push(event);
            current = event.state_after();
        }
        Ok(events)
    }

    const fn advancing_event(self) -> Option<LifecycleEvent> {
        match self {
            Self::Initialized => Some(LifecycleEvent::Create),
            Self::Created => Some(LifecycleEvent::Start),
            Self::Started => Some(LifecycleEvent::Resume),
            Self::Destroyed | Self::Resumed => None,
        }
    }

    const fn retreating_event(self) -> Option<LifecycleEvent> {
        match self {
            Self::Created => Some(LifecycleEvent::Destroy),
            Self::Started => Some(LifecycleEvent::Stop),
            Self::Resumed => Some(LifecycleEvent::Pause),
            Self::Initialized | Self::Destroyed => None,
        }
    }
}

impl PartialOrd for LifecycleState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LifecycleState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Initialized => "INITIALIZED",
            Self::Destroyed => "DESTROYED",
            Self::Created => "CREATED",
            Self::Started => "STARTED",
            Self::Resumed => "RESUMED",
        })
    }
}

/// A transition between two adjacent lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Create,
    Start,
    Resume,
    Pause,
    Stop,
    Destroy,
}

impl LifecycleEvent {
    /// Every event, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Create,
        Self::Start,
        Self::Resume,
        Self::Pause,
        Self::Stop,
        Self::Destroy,
    ];

    /// The state a lifecycle is in once this event has been applied.
    #[must_use]
    pub const fn state_after(self) -> LifecycleState {
        match self {
            Self::Create | Self::Stop => LifecycleState::Created,
            Self::Start | Self::Pause => LifecycleState::Started,
            Self::Resume => LifecycleState::Resumed,
            Self::Destroy => LifecycleState::Destroyed,
        }
    }

    /// The only state this event can legally be applied in.
    #[must_use]
    pub const fn state_before(self) -> LifecycleState {
        match self {
            Self::Create => LifecycleState::Initialized,
            Self::Start | Self::Destroy => LifecycleState::Created,
            Self::Resume | Self::Stop => LifecycleState::Started,
            Self::Pause => LifecycleState::Resumed,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Start => "START",
            Self::Resume => "RESUME",
            Self::Pause => "PAUSE",
            Self::Stop => "STOP",
            Self::Destroy => "DESTROY",
        })
    }
}

/// Free-function form of [`LifecycleState::events_to_state`].
pub fn events_to_state(
    from: LifecycleState,
    to: LifecycleState,
) -> Result<Vec<LifecycleEvent>, LifecycleError> {
    from.events_to_state(to)
}

#[cfg(test)]
mod tests {
    use super::LifecycleEvent::*;
    use super::LifecycleState::*;
    use super::*;

    fn path(from: LifecycleState, to: LifecycleState) -> Vec<LifecycleEvent> {
        from.events_to_state(to)
            .unwrap_or_else(|e| panic!("{from} -> {to} should be valid: {e}"))
    }

    #[test]
    fn single_steps() {
        assert_eq!(path(Initialized, Created), vec![Create]);
        assert_eq!(path(Created, Started), vec![Start]);
        assert_eq!(path(Started, Resumed), vec![Resume]);
        assert_eq!(path(Resumed, Started), vec![Pause]);
        assert_eq!(path(Started, Created), vec![Stop]);
        assert_eq!(path(Created, Destroyed), vec![Destroy]);
    }

    #[test]
    fn multi_steps() {
        assert_eq!(path(Initialized, Started), vec![Create, Start]);
        assert_eq!(path(Initialized, Resumed), vec![Create, Start, Resume]);
        assert_eq!(path(Initialized, Destroyed), vec![Create, Destroy]);
        assert_eq!(path(Created, Resumed), vec![Start, Resume]);
        assert_eq!(path(Started, Destroyed), vec![Stop, Destroy]);
        assert_eq!(path(Resumed, Created), vec![Pause, Stop]);
        assert_eq!(path(Resumed, Destroyed), vec![Pause, Stop, Destroy]);
    }

    #[test]
    fn reflexive_is_empty_for_every_state() {
        for state in LifecycleState::ALL {
            assert!(path(state, state).is_empty(), "{state}");
        }
    }

    #[test]
    fn destroyed_is_terminal() {
        let err = Destroyed.events_to_state(Created).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidStateTransition {
                from: Destroyed,
                to: Created
            }
        );
        assert!(Destroyed.events_to_state(Resumed).is_err());
    }

    #[test]
    fn initialized_is_unreachable_once_left() {
        let err = Created.events_to_state(Initialized).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidStateTransition {
                from: Created,
                to: Initialized
            }
        );
        assert!(Destroyed.events_to_state(Initialized).is_err());
        assert!(Resumed.events_to_state(Initialized).is_err());
    }

    #[test]
    fn ordering_follows_rank() {
        assert!(Initialized < Destroyed);
        assert!(Destroyed < Created);
        assert!(Created < Started);
        assert!(Started < Resumed);
        assert!(Resumed.is_at_least(Started));
        assert!(!Created.is_at_least(Started));
    }

    #[test]
    fn active_states() {
        let active: Vec<_> = LifecycleState::ALL
            .into_iter()
            .filter(|s| s.is_active())
            .collect();
        assert_eq!(active, vec![Started, Resumed]);
    }

    #[test]
    fn before_and_after_are_adjacent() {
        for event in LifecycleEvent::ALL {
            assert_eq!(path(event.state_before(), event.state_after()), vec![event]);
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(Resumed.to_string(), "RESUMED");
        assert_eq!(Destroy.to_string(), "DESTROY");
        assert_eq!(
            LifecycleError::InvalidStateTransition {
                from: Created,
                to: Initialized
            }
            .to_string(),
            "Invalid state transition from CREATED to INITIALIZED"
        );
    }
}
