//! Per-store reduction pipeline
//!
//! A pipeline subscribes to the dispatcher and folds every published agenda
//! into its store's cursor chain. Each agenda gets its own record: the
//! cursor that was current when the agenda arrived (its anchor) and the
//! actions it has applied so far. When the agenda fails, either because the
//! reducer rejected one of its actions or because its source errored, the
//! pipeline rebuilds history from the anchor without exactly those actions.
//!
//! States produced by one agenda are deduplicated per agenda, then merged
//! into a store-wide replay subject that is deduplicated again.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::action::Step;
use crate::agenda::{Inflight, Notification, SharedAgenda};
use crate::cursor::{filter_actions, Cursor, Reducer};
use crate::dispatcher::Dispatcher;
use crate::error::AgendaError;
use crate::lock;
use crate::sink::{DiagnosticSink, SinkContext};
use crate::subject::{ReplaySubject, Subscription};
use crate::Action;

pub(crate) struct Pipeline<S, A: Action> {
    name: String,
    reducer: Reducer<S, A>,
    current: Mutex<Arc<Cursor<S, A>>>,
    states: ReplaySubject<S>,
    sink: Option<Arc<dyn DiagnosticSink<A>>>,
    inflight: Inflight,
}

/// Bookkeeping for one agenda while it is being folded.
struct AgendaRecord<S, A> {
    agenda: u64,
    anchor: Arc<Cursor<S, A>>,
    applied: Vec<Arc<A>>,
    last_emitted: Option<S>,
    finished: bool,
}

impl<S, A> AgendaRecord<S, A>
where
    S: PartialEq + Clone,
{
    /// Per-agenda distinct filter: whether `state` differs from what this
    /// agenda emitted last.
    fn should_emit(&mut self, state: &S) -> bool {
        if self.last_emitted.as_ref() == Some(state) {
            return false;
        }
        self.last_emitted = Some(state.clone());
        true
    }
}

impl<S, A> Pipeline<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    A: Action,
{
    pub(crate) fn new(
        name: String,
        reducer: Reducer<S, A>,
        genesis: Arc<Cursor<S, A>>,
        sink: Option<Arc<dyn DiagnosticSink<A>>>,
    ) -> Self {
        Self {
            name,
            reducer,
            states: ReplaySubject::new(genesis.state().clone()),
            current: Mutex::new(genesis),
            sink,
            inflight: Inflight::default(),
        }
    }

    /// Fold every agenda published on `dispatcher` from now on.
    pub(crate) fn attach(self: &Arc<Self>, dispatcher: &Dispatcher<A>) -> Subscription {
        let weak = Arc::downgrade(self);
        dispatcher.subscribe(move |agenda| {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.accept(agenda);
            }
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn cursor(&self) -> Arc<Cursor<S, A>> {
        Arc::clone(&lock(&self.current))
    }

    pub(crate) fn states(&self) -> &ReplaySubject<S> {
        &self.states
    }

    pub(crate) fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Drop every in-flight agenda subscription.
    pub(crate) fn release_all(&self) {
        self.inflight.clear();
    }

    fn accept(self: &Arc<Self>, agenda: &SharedAgenda<A>) {
        let id = agenda.id();
        let record = Mutex::new(AgendaRecord {
            agenda: id,
            anchor: self.cursor(),
            applied: Vec::new(),
            last_emitted: None,
            finished: false,
        });
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = agenda.subscribe(move |notification| {
            if let Some(pipeline) = weak.upgrade() {
                pipeline.fold(&record, notification);
            }
        });
        self.inflight.track(id, subscription);
    }

    fn fold(&self, record: &Mutex<AgendaRecord<S, A>>, notification: &Notification<Arc<A>>) {
        match notification {
            Notification::Next(action) => self.apply(record, action),
            Notification::Error(err) => self.rollback(record, err.clone()),
            Notification::Complete => self.finish(record),
        }
    }

    fn apply(&self, record: &Mutex<AgendaRecord<S, A>>, action: &Arc<A>) {
        if action.is_noop() {
            return;
        }
        let agenda = {
            let record = lock(record);
            if record.finished {
                return;
            }
            record.agenda
        };

        let outcome = {
            let mut current = lock(&self.current);
            (self.reducer)(current.state(), Step::Apply(action)).map(|state| {
                *current = Cursor::advance(&current, Arc::clone(action), state.clone());
                state
            })
        };

        let state = match outcome {
            Ok(state) => state,
            Err(err) => {
                self.rollback(record, AgendaError::Reducer(err));
                return;
            }
        };

        let emit = {
            let mut record = lock(record);
            record.applied.push(Arc::clone(action));
            record.should_emit(&state)
        };
        if let Some(sink) = &self.sink {
            sink.change(self.context(agenda), action, &state);
        }
        if emit {
            self.states.next(state);
        }
    }

    fn rollback(&self, record: &Mutex<AgendaRecord<S, A>>, err: AgendaError) {
        let (agenda, anchor, applied) = {
            let mut record = lock(record);
            if record.finished {
                return;
            }
            record.finished = true;
            (
                record.agenda,
                Arc::clone(&record.anchor),
                std::mem::take(&mut record.applied),
            )
        };

        let excluded: HashSet<*const A> = applied.iter().map(Arc::as_ptr).collect();
        let (previous, rollback) = {
            let mut current = lock(&self.current);
            let previous = current.state().clone();
            let rollback = filter_actions(&anchor, &current, self.reducer, |action| {
                !excluded.contains(&Arc::as_ptr(action))
            });
            *current = Arc::clone(&rollback.cursor);
            (previous, rollback)
        };
        let state = rollback.cursor.state().clone();

        if rollback.anchor_lost {
            tracing::debug!(
                store = %self.name,
                agenda,
                "Anchor no longer in history, replayed from genesis"
            );
        }
        for (action, error) in &rollback.dropped {
            tracing::warn!(
                store = %self.name,
                agenda,
                action = %action.name(),
                error = %error,
                "Dropped action that no longer applies after rollback"
            );
        }

        match &self.sink {
            Some(sink) => sink.revert(self.context(agenda), (&previous, &state), &err, &applied),
            None => tracing::error!(
                store = %self.name,
                agenda,
                error = %err,
                reverted = applied.len(),
                "Agenda failed, rolled back"
            ),
        }

        let emit = lock(record).should_emit(&state);
        if emit {
            self.states.next(state);
        }
        self.inflight.release(agenda);
    }

    fn finish(&self, record: &Mutex<AgendaRecord<S, A>>) {
        let agenda = {
            let mut record = lock(record);
            if record.finished {
                return;
            }
            record.finished = true;
            record.applied.clear();
            record.agenda
        };
        tracing::trace!(store = %self.name, agenda, "Agenda folded");
        self.inflight.release(agenda);
    }

    fn context(&self, agenda: u64) -> SinkContext<'_> {
        SinkContext {
            store: &self.name,
            agenda,
        }
    }
}

impl<S: fmt::Debug, A: Action> fmt::Debug for Pipeline<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("inflight", &self.inflight.len())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}
