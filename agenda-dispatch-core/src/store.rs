//! Stores: the observable state of one reducer
//!
//! A [`Store`] is a cheap handle to a reducer's pipeline. It always has a
//! current value (the genesis state until the first change), replays that
//! value to every new subscriber, and only emits values that differ from the
//! previous one.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::cursor::{Cursor, Reducer};
use crate::dispatcher::Dispatcher;
use crate::lock;
use crate::pipeline::Pipeline;
use crate::sink::DiagnosticSink;
use crate::subject::Subscription;
use crate::Action;

/// Handle to the state derived by one reducer.
pub struct Store<S, A: Action> {
    inner: Arc<StoreInner<S, A>>,
}

struct StoreInner<S, A: Action> {
    pipeline: Arc<Pipeline<S, A>>,
    connection: Mutex<Option<Subscription>>,
}

impl<S, A: Action> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, A> Store<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    A: Action,
{
    /// Create a store from its genesis cursor and start folding agendas
    /// published on `dispatcher`.
    pub(crate) fn connect(
        name: String,
        reducer: Reducer<S, A>,
        genesis: Arc<Cursor<S, A>>,
        sink: Option<Arc<dyn DiagnosticSink<A>>>,
        dispatcher: &Dispatcher<A>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline::new(name, reducer, genesis, sink));
        let connection = pipeline.attach(dispatcher);
        tracing::debug!(store = pipeline.name(), "Store connected");
        Self {
            inner: Arc::new(StoreInner {
                pipeline,
                connection: Mutex::new(Some(connection)),
            }),
        }
    }

    /// Name used for this store in logs and sink notifications.
    pub fn name(&self) -> &str {
        self.inner.pipeline.name()
    }

    /// Latest emitted state.
    pub fn state(&self) -> S {
        self.inner.pipeline.states().latest()
    }

    /// Current head of the history.
    pub fn cursor(&self) -> Arc<Cursor<S, A>> {
        self.inner.pipeline.cursor()
    }

    /// Actions and the states they produced, from genesis to the current
    /// cursor. The genesis entry has no action.
    pub fn history(&self) -> Vec<(Option<Arc<A>>, S)> {
        let mut history: Vec<_> = self
            .cursor()
            .iter()
            .map(|cursor| (cursor.action().cloned(), cursor.state().clone()))
            .collect();
        history.reverse();
        history
    }

    /// Observe the store.
    ///
    /// The latest state is delivered synchronously before this returns,
    /// then every distinct change.
    pub fn subscribe(&self, observer: impl Fn(&S) + Send + Sync + 'static) -> Subscription {
        self.inner.pipeline.states().subscribe(observer)
    }

    /// Stream of states with the same replay semantics as [`subscribe`](Self::subscribe).
    pub fn updates(&self) -> StateStream<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |state: &S| {
            let _ = tx.send(state.clone());
        });
        StateStream {
            rx,
            _subscription: subscription,
        }
    }

    /// Stop folding new agendas and drop every in-flight agenda.
    ///
    /// The last state stays readable; subscribers receive nothing further.
    pub fn disconnect(&self) {
        let connection = lock(&self.inner.connection).take();
        if let Some(connection) = connection {
            connection.unsubscribe();
            self.inner.pipeline.release_all();
            tracing::debug!(store = self.name(), "Store disconnected");
        }
    }

    /// Whether the store still folds published agendas.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.connection).is_some()
    }

    /// Number of agendas currently being folded.
    pub fn inflight_agendas(&self) -> usize {
        self.inner.pipeline.inflight()
    }

    /// Whether both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<S: fmt::Debug, A: Action> fmt::Debug for Store<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("pipeline", &self.inner.pipeline)
            .field("connected", &lock(&self.inner.connection).is_some())
            .finish()
    }
}

/// Async stream of a store's states, returned by [`Store::updates`].
///
/// Unsubscribes when dropped.
pub struct StateStream<S> {
    rx: mpsc::UnboundedReceiver<S>,
    _subscription: Subscription,
}

impl<S> StateStream<S> {
    /// Wait for the next state.
    pub async fn recv(&mut self) -> Option<S> {
        self.rx.recv().await
    }

    /// Take the next state if one is already buffered.
    pub fn try_recv(&mut self) -> Option<S> {
        self.rx.try_recv().ok()
    }
}

impl<S> Stream for StateStream<S> {
    type Item = S;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S>> {
        self.rx.poll_recv(cx)
    }
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream").finish_non_exhaustive()
    }
}
