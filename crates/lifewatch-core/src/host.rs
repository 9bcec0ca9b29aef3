#![forbid(unsafe_code)]

//! Headless host adapter.
//!
//! A [`HostedComponent`] plays the role a screen controller plays in a UI
//! toolkit: it owns a lifecycle, tracks whether its view is displayed and
//! what the application is doing, and maps those two signals onto a target
//! [`LifecycleState`]. The component's own [`ComponentHooks`] run before
//! external observers hear about each event.
//!
//! | view displayed | app state    | lifecycle |
//! |----------------|--------------|-----------|
//! | yes            | `Active`     | Resumed   |
//! | yes            | `Inactive`   | Started   |
//! | yes            | `Background` | Created   |
//! | no             | any          | Created   |

use crate::lifecycle::{LifecycleEvent, LifecycleOwner, LifecycleRegistry, LifecycleState};

/// Foreground/background signal from the hosting application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AppState {
    Active,
    #[default]
    Inactive,
    Background,
}

/// The lifecycle state a component should be in for the given host signals.
#[must_use]
pub const fn target_state(app: AppState, view_displayed: bool) -> LifecycleState {
    if !view_displayed {
        return LifecycleState::Created;
    }
    match app {
        AppState::Active => LifecycleState::Resumed,
        AppState::Inactive => LifecycleState::Started,
        AppState::Background => LifecycleState::Created,
    }
}

/// Transition hooks of a hosted component. All default to no-ops.
pub trait ComponentHooks {
    fn on_create(&mut self) {}
    fn on_start(&mut self) {}
    fn on_resume(&mut self) {}
    fn on_pause(&mut self) {}
    fn on_stop(&mut self) {}
    fn on_destroy(&mut self) {}
}

impl ComponentHooks for () {}

fn run_hook<H: ComponentHooks + ?Sized>(hooks: &mut H, event: LifecycleEvent) {
    match event {
        LifecycleEvent::Create => hooks.on_create(),
        LifecycleEvent::Start => hooks.on_start(),
        LifecycleEvent::Resume => hooks.on_resume(),
        LifecycleEvent::Pause => hooks.on_pause(),
        LifecycleEvent::Stop => hooks.on_stop(),
        LifecycleEvent::Destroy => hooks.on_destroy(),
    }
}

/// A lifecycle owner driven by view-appearance and app-state signals.
///
/// Construction moves the lifecycle to Created. Dropping the component
/// destroys it if [`destroy`](Self::destroy) was not called.
#[derive(Debug)]
pub struct HostedComponent<H: ComponentHooks> {
    registry: LifecycleRegistry,
    hooks: H,
    app_state: AppState,
    view_displayed: bool,
}

impl<H: ComponentHooks> HostedComponent<H> {
    pub fn new(hooks: H, app_state: AppState) -> Self {
        let mut component = Self {
            registry: LifecycleRegistry::new(),
            hooks,
            app_state,
            view_displayed: false,
        };
        component.update();
        component
    }

    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    #[must_use]
    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    #[must_use]
    pub fn is_view_displayed(&self) -> bool {
        self.view_displayed
    }

    pub fn view_will_appear(&mut self) {
        self.view_displayed = true;
        self.update();
    }

    pub fn view_did_disappear(&mut self) {
        self.view_displayed = false;
        self.update();
    }

    pub fn set_app_state(&mut self, app_state: AppState) {
        self.app_state = app_state;
        self.update();
    }

    /// Retreat to Destroyed, running each hook on the way down.
    ///
    /// Later signals are ignored: Destroyed is terminal.
    pub fn destroy(&mut self) {
        self.transition(LifecycleState::Destroyed);
    }

    fn update(&mut self) {
        if self.registry.current_state() == LifecycleState::Destroyed {
            return;
        }
        let target = target_state(self.app_state, self.view_displayed);
        tracing::debug!(
            message = "host.target",
            registry = self.registry.id(),
            app_state = ?self.app_state,
            view_displayed = self.view_displayed,
            %target
        );
        self.transition(target);
    }

    fn transition(&mut self, target: LifecycleState) {
        let hooks = &mut self.hooks;
        self.registry
            .mark_state_with(target, |event| run_hook(hooks, event));
    }
}

impl<H: ComponentHooks> LifecycleOwner for HostedComponent<H> {
    fn lifecycle(&self) -> &LifecycleRegistry {
        &self.registry
    }
}

impl<H: ComponentHooks> Drop for HostedComponent<H> {
    fn drop(&mut self) {
        if self.registry.current_state() != LifecycleState::Destroyed {
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingObserver;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct Journal {
        entries: Rc<RefCell<Vec<String>>>,
    }

    impl Journal {
        fn push(&self, entry: &str) {
            self.entries.borrow_mut().push(entry.to_string());
        }
    }

    impl ComponentHooks for Journal {
        fn on_create(&mut self) {
            self.push("hook:create");
        }
        fn on_start(&mut self) {
            self.push("hook:start");
        }
        fn on_resume(&mut self) {
            self.push("hook:resume");
        }
        fn on_pause(&mut self) {
            self.push("hook:pause");
        }
        fn on_stop(&mut self) {
            self.push("hook:stop");
        }
        fn on_destroy(&mut self) {
            self.push("hook:destroy");
        }
    }

    #[test]
    fn target_state_table() {
        use AppState::*;
        use LifecycleState::*;
        assert_eq!(target_state(Active, true), Resumed);
        assert_eq!(target_state(Inactive, true), Started);
        assert_eq!(target_state(Background, true), Created);
        for app in [Active, Inactive, Background] {
            assert_eq!(target_state(app, false), Created);
        }
    }

    #[test]
    fn construction_moves_to_created() {
        let component = HostedComponent::new((), AppState::Active);
        assert_eq!(
            component.lifecycle().current_state(),
            LifecycleState::Created
        );
        assert!(!component.is_view_displayed());
    }

    #[test]
    fn view_and_app_signals_drive_the_lifecycle() {
        let mut component = HostedComponent::new((), AppState::Inactive);
        component.view_will_appear();
        assert_eq!(component.lifecycle().current_state(), LifecycleState::Started);
        component.set_app_state(AppState::Active);
        assert_eq!(component.lifecycle().current_state(), LifecycleState::Resumed);
        component.set_app_state(AppState::Background);
        assert_eq!(component.lifecycle().current_state(), LifecycleState::Created);
        component.set_app_state(AppState::Active);
        component.view_did_disappear();
        assert_eq!(component.lifecycle().current_state(), LifecycleState::Created);
    }

    #[test]
    fn hooks_run_before_observers() {
        let entries = Rc::new(RefCell::new(Vec::new()));
        let journal = Journal {
            entries: Rc::clone(&entries),
        };
        let mut component = HostedComponent::new(journal, AppState::Active);

        struct Tail(Rc<RefCell<Vec<String>>>);
        impl crate::lifecycle::LifecycleObserver for Tail {
            fn on_start(&self, _: &LifecycleRegistry) {
                self.0.borrow_mut().push("observer:start".into());
            }
            fn on_resume(&self, _: &LifecycleRegistry) {
                self.0.borrow_mut().push("observer:resume".into());
            }
        }
        let tail: Rc<dyn crate::lifecycle::LifecycleObserver> = Rc::new(Tail(Rc::clone(&entries)));
        component.lifecycle().add_observer(Rc::clone(&tail));

        component.view_will_appear();
        assert_eq!(
            *entries.borrow(),
            vec![
                "hook:create",
                "hook:start",
                "observer:start",
                "hook:resume",
                "observer:resume"
            ]
        );
    }

    #[test]
    fn drop_destroys_through_every_hook() {
        let entries = Rc::new(RefCell::new(Vec::new()));
        let recorder = RecordingObserver::new();
        {
            let mut component = HostedComponent::new(
                Journal {
                    entries: Rc::clone(&entries),
                },
                AppState::Active,
            );
            component.lifecycle().add_observer(recorder.clone());
            component.view_will_appear();
            entries.borrow_mut().clear();
        }
        assert_eq!(
            *entries.borrow(),
            vec!["hook:pause", "hook:stop", "hook:destroy"]
        );
        assert_eq!(
            recorder.events(),
            vec![
                LifecycleEvent::Start,
                LifecycleEvent::Resume,
                LifecycleEvent::Pause,
                LifecycleEvent::Stop,
                LifecycleEvent::Destroy
            ]
        );
    }

    #[test]
    fn signals_after_destroy_are_ignored() {
        let mut component = HostedComponent::new((), AppState::Active);
        component.destroy();
        component.view_will_appear();
        assert_eq!(
            component.lifecycle().current_state(),
            LifecycleState::Destroyed
        );
    }
}
