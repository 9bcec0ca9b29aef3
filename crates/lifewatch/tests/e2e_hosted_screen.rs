#![forbid(unsafe_code)]

//! E2E: a hosted screen observing values through the prelude.
//!
//! Validates that:
//! 1. A screen driven by view and app signals gates delivery.
//! 2. The screen's own hooks run before its observers on every transition.
//! 3. Dropping the screen tears down its observers.

use std::cell::RefCell;
use std::rc::Rc;

use lifewatch::prelude::*;
use lifewatch_core::testing::Recorder;

#[derive(Default)]
struct Screen {
    log: Rc<RefCell<Vec<String>>>,
}

impl ComponentHooks for Screen {
    fn on_start(&mut self) {
        self.log.borrow_mut().push("screen:start".into());
    }
    fn on_stop(&mut self) {
        self.log.borrow_mut().push("screen:stop".into());
    }
}

#[test]
fn screen_sees_values_only_while_displayed_and_active() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let mut screen = HostedComponent::new(
        Screen {
            log: Rc::clone(&log),
        },
        AppState::Active,
    );

    let title = MutableLive::new(String::from("inbox"));
    {
        let log = Rc::clone(&log);
        title.observe(&screen, move |t: &String| log.borrow_mut().push(format!("title:{t}")));
    }

    title.set_value("inbox (1)".into());
    assert!(log.borrow().is_empty());

    screen.view_will_appear();
    assert_eq!(
        *log.borrow(),
        vec!["screen:start".to_string(), "title:inbox (1)".to_string()]
    );

    screen.set_app_state(AppState::Background);
    title.set_value("inbox (2)".into());
    assert_eq!(log.borrow().last().map(String::as_str), Some("screen:stop"));

    screen.set_app_state(AppState::Active);
    assert_eq!(log.borrow().last().map(String::as_str), Some("title:inbox (2)"));
}

#[test]
fn dropping_the_screen_releases_observers() {
    let screen = HostedComponent::new((), AppState::Active);
    let counter = MutableLive::new(0);
    let recorder = Recorder::new();
    counter.observe(&screen, recorder.callback());
    assert!(counter.has_observers());

    drop(screen);
    assert!(!counter.has_observers());
    counter.set_value(1);
    assert!(recorder.is_empty());
}

#[test]
fn strict_transitions_reject_skipped_steps() {
    let registry = LifecycleRegistry::new();
    let err = registry
        .handle_event_checked(LifecycleEvent::Resume)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid event RESUME while in state INITIALIZED"
    );
    assert!(matches!(err, LifecycleError::InvalidEventForState { .. }));
}
