//! Test utilities for agenda-dispatch applications
//!
//! - [`StateRecorder`]: records every state a store emits
//! - [`RecordingSink`]: a [`DiagnosticSink`] that records change and revert calls
//! - Assertion macros for recorded states
//!
//! # Example
//!
//! ```ignore
//! use agenda_dispatch::testing::StateRecorder;
//! use agenda_dispatch::assert_states;
//!
//! let engine = Engine::default();
//! let store = engine.reduce(counter, 0)?;
//! let recorder = StateRecorder::new(&store);
//!
//! engine.next(Action::Inc)?;
//! assert_states!(recorder, [0, 1]);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::AgendaError;
use crate::lock;
use crate::sink::{DiagnosticSink, SinkContext};
use crate::store::Store;
use crate::subject::Subscription;
use crate::Action;

/// Records every state emitted by a store, starting with the replayed one.
pub struct StateRecorder<S> {
    states: Arc<Mutex<Vec<S>>>,
    _subscription: Subscription,
}

impl<S> StateRecorder<S>
where
    S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    /// Subscribe to `store` and start recording.
    pub fn new<A: Action>(store: &Store<S, A>) -> Self {
        let states = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&states);
        let subscription = store.subscribe(move |state: &S| lock(&recorded).push(state.clone()));
        Self {
            states,
            _subscription: subscription,
        }
    }

    /// Every state recorded so far.
    pub fn states(&self) -> Vec<S> {
        lock(&self.states).clone()
    }

    /// Take the recorded states, leaving the recorder empty.
    pub fn take(&self) -> Vec<S> {
        std::mem::take(&mut *lock(&self.states))
    }

    /// The most recent state, if any.
    pub fn last(&self) -> Option<S> {
        lock(&self.states).last().cloned()
    }

    /// Number of recorded states.
    pub fn len(&self) -> usize {
        lock(&self.states).len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        lock(&self.states).is_empty()
    }
}

impl<S: fmt::Debug> fmt::Debug for StateRecorder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRecorder")
            .field("states", &*lock(&self.states))
            .finish()
    }
}

/// A call received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent<A> {
    Change {
        store: String,
        agenda: u64,
        action: A,
        /// `Debug` rendering of the new state
        state: String,
    },
    Revert {
        store: String,
        agenda: u64,
        /// `Debug` renderings of the states before and after the rollback
        states: (String, String),
        error: String,
        actions: Vec<A>,
    },
}

/// Sink that keeps every notification for later inspection.
///
/// Clones share the same record.
pub struct RecordingSink<A> {
    events: Arc<Mutex<Vec<SinkEvent<A>>>>,
}

impl<A> Clone for RecordingSink<A> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<A> Default for RecordingSink<A> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<A: Action> RecordingSink<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded call, in order.
    pub fn events(&self) -> Vec<SinkEvent<A>> {
        lock(&self.events).clone()
    }

    /// Actions reported through `change`, in order.
    pub fn changes(&self) -> Vec<A> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Change { action, .. } => Some(action.clone()),
                SinkEvent::Revert { .. } => None,
            })
            .collect()
    }

    /// Actions removed by each `revert`, in order.
    pub fn reverts(&self) -> Vec<Vec<A>> {
        lock(&self.events)
            .iter()
            .filter_map(|event| match event {
                SinkEvent::Revert { actions, .. } => Some(actions.clone()),
                SinkEvent::Change { .. } => None,
            })
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl<A: Action> DiagnosticSink<A> for RecordingSink<A> {
    fn change(&self, ctx: SinkContext<'_>, action: &A, state: &dyn fmt::Debug) {
        lock(&self.events).push(SinkEvent::Change {
            store: ctx.store.to_string(),
            agenda: ctx.agenda,
            action: action.clone(),
            state: format!("{state:?}"),
        });
    }

    fn revert(
        &self,
        ctx: SinkContext<'_>,
        states: (&dyn fmt::Debug, &dyn fmt::Debug),
        error: &AgendaError,
        actions: &[Arc<A>],
    ) {
        lock(&self.events).push(SinkEvent::Revert {
            store: ctx.store.to_string(),
            agenda: ctx.agenda,
            states: (format!("{:?}", states.0), format!("{:?}", states.1)),
            error: error.to_string(),
            actions: actions.iter().map(|action| (**action).clone()).collect(),
        });
    }
}

impl<A> fmt::Debug for RecordingSink<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSink")
            .field("events", &lock(&self.events).len())
            .finish()
    }
}

/// Assert the exact sequence of states a [`StateRecorder`] has seen.
///
/// # Example
///
/// ```ignore
/// assert_states!(recorder, [0, 1, 2, 1, 2]);
/// ```
#[macro_export]
macro_rules! assert_states {
    ($recorder:expr, $expected:expr) => {
        assert_eq!(
            $recorder.states(),
            $expected,
            "Unexpected sequence of store states"
        );
    };
}

/// Assert that some recorded state matches a pattern.
///
/// # Example
///
/// ```ignore
/// assert_state_seen!(recorder, State { loading: true, .. });
/// ```
#[macro_export]
macro_rules! assert_state_seen {
    ($recorder:expr, $pattern:pat $(if $guard:expr)?) => {
        let states = $recorder.states();
        assert!(
            states.iter().any(|s| matches!(s, $pattern $(if $guard)?)),
            "Expected a state matching `{}`, but got: {:?}",
            stringify!($pattern),
            states
        );
    };
}

/// Count recorded states matching a pattern.
#[macro_export]
macro_rules! count_states {
    ($recorder:expr, $pattern:pat $(if $guard:expr)?) => {
        $recorder
            .states()
            .iter()
            .filter(|s| matches!(*s, $pattern $(if $guard)?))
            .count()
    };
}
