#![forbid(unsafe_code)]

//! Control-loop configuration.
//!
//! [`DispatchConfig`] is read once, when a [`ControlLoop`](crate::dispatch::ControlLoop)
//! is installed on a thread. Defaults come from [`Default`]; deployments can
//! override them through the environment:
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `LIFEWATCH_STRICT_THREADS` | `1`/`true` enforce control-thread checks, `0`/`false` skip them |
//! | `LIFEWATCH_MAX_TASKS_PER_TURN` | positive cap on tasks drained by one `run_until_idle` call |
//!
//! Unparseable values are ignored and the default is kept.

/// Environment variable toggling strict control-thread assertions.
pub const ENV_STRICT_THREADS: &str = "LIFEWATCH_STRICT_THREADS";

/// Environment variable bounding the work done per loop turn.
pub const ENV_MAX_TASKS_PER_TURN: &str = "LIFEWATCH_MAX_TASKS_PER_TURN";

/// Default upper bound on tasks processed by a single drain.
pub const DEFAULT_MAX_TASKS_PER_TURN: usize = 1024;

/// Settings for a thread's control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Trap (panic) when a control-thread-only operation runs elsewhere.
    pub strict_thread_checks: bool,
    /// Maximum number of queued tasks drained by one `run_until_idle` call.
    pub max_tasks_per_turn: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            strict_thread_checks: cfg!(debug_assertions),
            max_tasks_per_turn: DEFAULT_MAX_TASKS_PER_TURN,
        }
    }
}

impl DispatchConfig {
    /// Defaults overridden by the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(strict) = lookup(ENV_STRICT_THREADS).as_deref().and_then(parse_flag) {
            config.strict_thread_checks = strict;
        }
        if let Some(max) = lookup(ENV_MAX_TASKS_PER_TURN)
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|max| *max > 0)
        {
            config.max_tasks_per_turn = max;
        }
        config
    }

    /// Set whether control-thread preconditions are enforced.
    #[must_use]
    pub fn with_strict_thread_checks(mut self, strict: bool) -> Self {
        self.strict_thread_checks = strict;
        self
    }

    /// Set the per-turn task cap. Zero is clamped to one.
    #[must_use]
    pub fn with_max_tasks_per_turn(mut self, max: usize) -> Self {
        self.max_tasks_per_turn = max.max(1);
        self
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
