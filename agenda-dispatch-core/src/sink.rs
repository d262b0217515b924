//! Diagnostic sinks notified by reduction pipelines
//!
//! A sink sees every successful fold (`change`) and every rollback
//! (`revert`) of every store. With no sink configured, rollbacks are
//! reported on the default error channel (`tracing::error!`) instead.

use std::fmt;
use std::sync::Arc;

use crate::error::AgendaError;
use crate::Action;

/// Where a sink notification comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkContext<'a> {
    /// Name of the reducer that owns the store.
    pub store: &'a str,
    /// Id of the agenda being folded.
    pub agenda: u64,
}

/// Receives fold and rollback notifications.
///
/// States are passed as `&dyn Debug` because one sink serves stores of
/// different state types.
pub trait DiagnosticSink<A: Action>: Send + Sync {
    /// Called after `action` was folded into `state`.
    fn change(&self, ctx: SinkContext<'_>, action: &A, state: &dyn fmt::Debug);

    /// Called after a failed agenda was rolled back.
    ///
    /// `states` is `(state before rollback, state after rollback)`; `actions`
    /// are the failed agenda's own actions that were removed.
    fn revert(
        &self,
        ctx: SinkContext<'_>,
        states: (&dyn fmt::Debug, &dyn fmt::Debug),
        error: &AgendaError,
        actions: &[Arc<A>],
    );
}

/// A sink that does nothing.
///
/// Installing it silences the default error channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl<A: Action> DiagnosticSink<A> for NoopSink {
    fn change(&self, _ctx: SinkContext<'_>, _action: &A, _state: &dyn fmt::Debug) {}

    fn revert(
        &self,
        _ctx: SinkContext<'_>,
        _states: (&dyn fmt::Debug, &dyn fmt::Debug),
        _error: &AgendaError,
        _actions: &[Arc<A>],
    ) {
    }
}

/// Sink that logs through `tracing`
#[derive(Debug, Clone)]
pub struct TracingSink {
    /// Whether to log every change (rollbacks are always logged)
    pub log_changes: bool,
    /// Whether to include full states in log records
    pub log_states: bool,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TracingSink {
    /// Log changes and rollbacks, without full states
    pub fn new() -> Self {
        Self {
            log_changes: true,
            log_states: false,
        }
    }

    /// Log changes and rollbacks including full states
    pub fn verbose() -> Self {
        Self {
            log_changes: true,
            log_states: true,
        }
    }
}

impl<A: Action> DiagnosticSink<A> for TracingSink {
    fn change(&self, ctx: SinkContext<'_>, action: &A, state: &dyn fmt::Debug) {
        if !self.log_changes {
            return;
        }
        if self.log_states {
            tracing::debug!(
                store = ctx.store,
                agenda = ctx.agenda,
                action = %action.name(),
                state = ?state,
                "State changed"
            );
        } else {
            tracing::debug!(
                store = ctx.store,
                agenda = ctx.agenda,
                action = %action.name(),
                "State changed"
            );
        }
    }

    fn revert(
        &self,
        ctx: SinkContext<'_>,
        states: (&dyn fmt::Debug, &dyn fmt::Debug),
        error: &AgendaError,
        actions: &[Arc<A>],
    ) {
        let names: Vec<&'static str> = actions.iter().map(|a| a.name()).collect();
        if self.log_states {
            tracing::warn!(
                store = ctx.store,
                agenda = ctx.agenda,
                error = %error,
                reverted = ?names,
                from = ?states.0,
                to = ?states.1,
                "Agenda rolled back"
            );
        } else {
            tracing::warn!(
                store = ctx.store,
                agenda = ctx.agenda,
                error = %error,
                reverted = ?names,
                "Agenda rolled back"
            );
        }
    }
}

/// Fan notifications out to several sinks
pub struct ComposedSink<A: Action> {
    sinks: Vec<Arc<dyn DiagnosticSink<A>>>,
}

impl<A: Action> fmt::Debug for ComposedSink<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposedSink")
            .field("sinks_count", &self.sinks.len())
            .finish()
    }
}

impl<A: Action> Default for ComposedSink<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Action> ComposedSink<A> {
    /// Create an empty composition
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Add a sink to the composition
    pub fn add<K: DiagnosticSink<A> + 'static>(&mut self, sink: K) -> &mut Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Add an already shared sink
    pub fn add_shared(&mut self, sink: Arc<dyn DiagnosticSink<A>>) -> &mut Self {
        self.sinks.push(sink);
        self
    }
}

impl<A: Action> DiagnosticSink<A> for ComposedSink<A> {
    fn change(&self, ctx: SinkContext<'_>, action: &A, state: &dyn fmt::Debug) {
        for sink in &self.sinks {
            sink.change(ctx, action, state);
        }
    }

    fn revert(
        &self,
        ctx: SinkContext<'_>,
        states: (&dyn fmt::Debug, &dyn fmt::Debug),
        error: &AgendaError,
        actions: &[Arc<A>],
    ) {
        for sink in &self.sinks {
            sink.revert(ctx, states, error, actions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug)]
    struct Ping;

    impl Action for Ping {
        fn name(&self) -> &'static str {
            "Ping"
        }
    }

    #[derive(Default)]
    struct CountingSink {
        changes: AtomicUsize,
        reverts: AtomicUsize,
    }

    impl DiagnosticSink<Ping> for Arc<CountingSink> {
        fn change(&self, _ctx: SinkContext<'_>, _action: &Ping, _state: &dyn fmt::Debug) {
            self.changes.fetch_add(1, Ordering::SeqCst);
        }

        fn revert(
            &self,
            _ctx: SinkContext<'_>,
            _states: (&dyn fmt::Debug, &dyn fmt::Debug),
            _error: &AgendaError,
            _actions: &[Arc<Ping>],
        ) {
            self.reverts.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_composed_sink_fans_out() {
        let counter = Arc::new(CountingSink::default());
        let mut composed = ComposedSink::new();
        composed
            .add(Arc::clone(&counter))
            .add(Arc::clone(&counter))
            .add(TracingSink::verbose());

        let ctx = SinkContext {
            store: "counter",
            agenda: 1,
        };
        composed.change(ctx, &Ping, &1);
        composed.revert(ctx, (&2, &1), &AgendaError::failed("boom"), &[Arc::new(Ping)]);

        assert_eq!(counter.changes.load(Ordering::SeqCst), 2);
        assert_eq!(counter.reverts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_tracing_sink_defaults() {
        let sink = TracingSink::default();
        assert!(sink.log_changes);
        assert!(!sink.log_states);
        assert!(TracingSink::verbose().log_states);
    }
}
