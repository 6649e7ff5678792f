//! Component lifecycle state machine
//!
//! Every long-lived pipeline component (source, writer, router, engine)
//! carries a [`RunState`] guarded by a [`LifecycleCell`]. A transition first
//! claims the cell by moving it to `Transitioning`; the final action of the
//! transition publishes the terminal state. Illegal requests are no-ops.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle state of a pipeline component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    /// Constructed, not yet initialized.
    Created,
    /// Initialization succeeded; ready to start.
    Initialized,
    /// Actively producing or consuming.
    Running,
    /// Stopped cleanly.
    Stopped,
    /// Failed while running; eligible for restart.
    Failed,
    /// Initialization failed; eligible for re-initialization.
    FailedInitialization,
    /// A transition is in progress; no other transition may begin.
    Transitioning,
}

impl RunState {
    /// States from which `initialize` may begin.
    #[must_use]
    pub fn can_initialize(self) -> bool {
        matches!(self, Self::Created | Self::FailedInitialization)
    }

    /// States from which `start` may begin.
    #[must_use]
    pub fn can_start(self) -> bool {
        matches!(self, Self::Initialized | Self::Stopped | Self::Failed)
    }

    /// States from which `stop` may begin.
    #[must_use]
    pub fn can_stop(self) -> bool {
        matches!(self, Self::Running)
    }

    /// All states legally reachable from this one (through `Transitioning`).
    #[must_use]
    pub fn valid_transitions(self) -> Vec<Self> {
        match self {
            Self::Created | Self::FailedInitialization => {
                vec![Self::Initialized, Self::FailedInitialization]
            }
            Self::Initialized | Self::Stopped | Self::Failed => vec![Self::Running, Self::Failed],
            Self::Running => vec![Self::Stopped, Self::Failed],
            Self::Transitioning => vec![],
        }
    }
}

/// Shared holder of a component's [`RunState`].
///
/// The critical sections are a handful of instructions; a plain mutex keeps
/// the claim-then-publish protocol simple and poison-proof.
#[derive(Debug)]
pub struct LifecycleCell {
    state: Mutex<RunState>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    /// Creates a cell in `Created`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Created),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> RunState {
        *self.lock()
    }

    /// True while the component is in `Running`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.get() == RunState::Running
    }

    /// Claims the cell for a transition.
    ///
    /// If the current state satisfies `permitted`, the cell moves to
    /// `Transitioning` and the prior state is returned; otherwise the call
    /// is a no-op and `None` is returned. A cell already in `Transitioning`
    /// never admits a second transition.
    pub fn begin(&self, permitted: impl Fn(RunState) -> bool) -> Option<RunState> {
        let mut state = self.lock();
        if *state == RunState::Transitioning || !permitted(*state) {
            return None;
        }
        let prior = *state;
        *state = RunState::Transitioning;
        Some(prior)
    }

    /// Publishes the terminal state of the transition claimed by [`begin`].
    ///
    /// [`begin`]: LifecycleCell::begin
    pub fn complete(&self, terminal: RunState) {
        let mut state = self.lock();
        debug_assert_eq!(*state, RunState::Transitioning);
        *state = terminal;
    }

    /// Moves a `Running` component straight to `Failed`.
    ///
    /// Returns false (and changes nothing) in any other state.
    pub fn set_failed(&self) -> bool {
        let mut state = self.lock();
        if *state == RunState::Running {
            *state = RunState::Failed;
            true
        } else {
            false
        }
    }
}

/// Handle given to plug-in backends at initialization.
///
/// Backends use it to pace their run loops and to signal a failure they
/// cannot recover from; the supervisor sees the `Failed` state and restarts
/// the component.
#[derive(Debug, Clone)]
pub struct ComponentHandle {
    name: String,
    cell: Arc<LifecycleCell>,
}

impl ComponentHandle {
    pub(crate) fn new(name: impl Into<String>, cell: Arc<LifecycleCell>) -> Self {
        Self {
            name: name.into(),
            cell,
        }
    }

    /// The component's instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while the owning component is `Running`. Producer and consumer
    /// loops must exit promptly once this turns false.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.cell.is_running()
    }

    /// Signals that the backend cannot continue.
    pub fn set_failed(&self) -> bool {
        let failed = self.cell.set_failed();
        if failed {
            warn!(component = %self.name, "component signalled failure");
        }
        failed
    }
}
