//! Agendas: ordered, possibly asynchronous sequences of actions
//!
//! An [`Agenda`] is a cold description of where actions come from. Before
//! it reaches the dispatcher it is wrapped in a [`SharedAgenda`], which
//! connects the source once (when the first observer arrives), replays
//! everything emitted so far to observers that join during publication, and
//! cancels async drivers when the last observer leaves early.
//!
//! # Example
//!
//! ```ignore
//! use agenda_dispatch_core::Agenda;
//!
//! // Eager list of actions
//! let batch = Agenda::from(vec![Action::Load, Action::Select(3)]);
//!
//! // A single value resolved later
//! let fetch = Agenda::deferred(async { api::fetch().await.map(Action::DidLoad) });
//!
//! // Driven from the outside
//! let (tx, agenda) = Agenda::channel();
//! tx.send(Action::Tick);
//! tx.close();
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::AgendaError;
use crate::lock;
use crate::scheduler::Scheduler;
use crate::subject::{Observer, Observers, Subscription};

/// Boxed future resolving to one action.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Boxed stream of actions.
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

static NEXT_AGENDA_ID: AtomicU64 = AtomicU64::new(1);

/// One event of an agenda's life.
#[derive(Debug, Clone)]
pub enum Notification<T> {
    /// The next action.
    Next(T),
    /// The agenda failed; nothing follows.
    Error(AgendaError),
    /// The agenda finished; nothing follows.
    Complete,
}

impl<T> Notification<T> {
    /// Whether nothing can follow this notification.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Notification<U> {
        match self {
            Notification::Next(value) => Notification::Next(f(value)),
            Notification::Error(err) => Notification::Error(err),
            Notification::Complete => Notification::Complete,
        }
    }
}

/// An ordered sequence of actions treated as one causally related batch.
pub struct Agenda<A> {
    source: Source<A>,
}

enum Source<A> {
    Items(Vec<A>),
    Deferred(BoxFuture<Result<A, AgendaError>>),
    Stream(BoxStream<Result<A, AgendaError>>),
    Channel(Arc<ChannelCore<A>>),
    Concat(VecDeque<Agenda<A>>),
}

impl<A> fmt::Debug for Agenda<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::Items(items) => format!("Items({})", items.len()),
            Source::Deferred(_) => "Deferred".to_string(),
            Source::Stream(_) => "Stream".to_string(),
            Source::Channel(_) => "Channel".to_string(),
            Source::Concat(parts) => format!("Concat({})", parts.len()),
        };
        f.debug_struct("Agenda").field("source", &kind).finish()
    }
}

impl<A: Send + 'static> Agenda<A> {
    /// Agenda of exactly one action.
    pub fn of(action: A) -> Self {
        Self::from(vec![action])
    }

    /// Agenda that completes without emitting anything.
    pub fn empty() -> Self {
        Self::from(Vec::new())
    }

    /// Agenda of one action produced by a future.
    ///
    /// An `Err` terminates the agenda with [`AgendaError::Source`].
    pub fn deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<A, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            source: Source::Deferred(Box::pin(async move {
                future.await.map_err(AgendaError::failed)
            })),
        }
    }

    /// Agenda of one action produced by an already boxed future.
    pub(crate) fn from_future(future: BoxFuture<Result<A, AgendaError>>) -> Self {
        Self {
            source: Source::Deferred(future),
        }
    }

    /// Agenda of every item of a stream, in order.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = A> + Send + 'static,
    {
        Self {
            source: Source::Stream(Box::pin(stream.map(Ok))),
        }
    }

    /// Agenda of a fallible stream; the first `Err` terminates the agenda.
    pub fn try_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<A, E>> + Send + 'static,
        E: fmt::Display,
    {
        Self {
            source: Source::Stream(Box::pin(
                stream.map(|item| item.map_err(AgendaError::failed)),
            )),
        }
    }

    /// Agenda driven by the returned sender.
    ///
    /// Actions sent before the agenda is connected are buffered. The agenda
    /// completes on [`AgendaSender::close`] or when the sender is dropped.
    pub fn channel() -> (AgendaSender<A>, Self) {
        let core = Arc::new(ChannelCore {
            state: Mutex::new(ChannelState {
                pending: Vec::new(),
                emitter: None,
                closed: false,
            }),
        });
        let agenda = Self {
            source: Source::Channel(Arc::clone(&core)),
        };
        (AgendaSender { core }, agenda)
    }

    /// Agenda that runs each agenda to completion before starting the next.
    ///
    /// The first failing part terminates the whole agenda.
    pub fn concat(parts: impl IntoIterator<Item = Agenda<A>>) -> Self {
        Self {
            source: Source::Concat(parts.into_iter().collect()),
        }
    }

    /// Whether connecting this agenda requires a tokio runtime.
    pub fn needs_runtime(&self) -> bool {
        match &self.source {
            Source::Deferred(_) | Source::Stream(_) => true,
            Source::Concat(parts) => parts.iter().any(Agenda::needs_runtime),
            Source::Items(_) | Source::Channel(_) => false,
        }
    }
}

impl<A> From<Vec<A>> for Agenda<A> {
    fn from(items: Vec<A>) -> Self {
        Self {
            source: Source::Items(items),
        }
    }
}

impl<A> FromIterator<A> for Agenda<A> {
    fn from_iter<I: IntoIterator<Item = A>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

// ============================================================================
// Driving sources
// ============================================================================

type Sink<A> = Arc<dyn Fn(Notification<A>) + Send + Sync>;

/// Where a running source delivers its notifications.
struct Emitter<A> {
    sink: Sink<A>,
    scheduler: Arc<dyn Scheduler>,
    runtime: Option<Handle>,
    cancel: CancellationToken,
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            scheduler: Arc::clone(&self.scheduler),
            runtime: self.runtime.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<A: Send + 'static> Emitter<A> {
    /// Deliver on the current stack (already inside scheduled work).
    fn now(&self, notification: Notification<A>) {
        (self.sink)(notification);
    }

    /// Deliver as a new unit of scheduled work.
    fn later(&self, notification: Notification<A>) {
        let sink = Arc::clone(&self.sink);
        self.scheduler.schedule(Box::new(move || sink(notification)));
    }

    fn with_sink(&self, sink: Sink<A>) -> Self {
        Self {
            sink,
            ..self.clone()
        }
    }

    /// Run `task` on the runtime until it finishes or the agenda is cancelled.
    fn drive<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(runtime) = &self.runtime else {
            self.now(Notification::Error(AgendaError::NoRuntime));
            return;
        };
        let cancel = self.cancel.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
    }
}

impl<A: Send + 'static> Source<A> {
    fn run(self, emitter: Emitter<A>) {
        match self {
            Source::Items(items) => {
                for item in items {
                    if emitter.cancel.is_cancelled() {
                        return;
                    }
                    emitter.now(Notification::Next(item));
                }
                emitter.now(Notification::Complete);
            }
            Source::Deferred(future) => {
                let out = emitter.clone();
                emitter.drive(async move {
                    match future.await {
                        Ok(action) => {
                            out.later(Notification::Next(action));
                            out.later(Notification::Complete);
                        }
                        Err(err) => out.later(Notification::Error(err)),
                    }
                });
            }
            Source::Stream(mut stream) => {
                let out = emitter.clone();
                emitter.drive(async move {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(action) => out.later(Notification::Next(action)),
                            Err(err) => {
                                out.later(Notification::Error(err));
                                return;
                            }
                        }
                    }
                    out.later(Notification::Complete);
                });
            }
            Source::Channel(core) => core.attach(emitter),
            Source::Concat(parts) => run_concat(parts, emitter),
        }
    }
}

fn run_concat<A: Send + 'static>(mut parts: VecDeque<Agenda<A>>, emitter: Emitter<A>) {
    // Eager parts drain inline; the first lazy part resumes the rest on completion.
    while let Some(part) = parts.pop_front() {
        match part.source {
            Source::Items(items) => {
                for item in items {
                    if emitter.cancel.is_cancelled() {
                        return;
                    }
                    emitter.now(Notification::Next(item));
                }
            }
            Source::Concat(inner) => {
                for agenda in inner.into_iter().rev() {
                    parts.push_front(agenda);
                }
            }
            source => {
                let rest = Mutex::new(Some(parts));
                let outer = emitter.clone();
                let child = emitter.with_sink(Arc::new(move |notification: Notification<A>| {
                    match notification {
                        Notification::Complete => {
                            let remaining = lock(&rest).take();
                            if let Some(remaining) = remaining {
                                run_concat(remaining, outer.clone());
                            }
                        }
                        other => (outer.sink)(other),
                    }
                }));
                source.run(child);
                return;
            }
        }
    }
    emitter.now(Notification::Complete);
}

// ============================================================================
// Channel-driven agendas
// ============================================================================

struct ChannelCore<A> {
    state: Mutex<ChannelState<A>>,
}

struct ChannelState<A> {
    pending: Vec<Notification<A>>,
    emitter: Option<Emitter<A>>,
    closed: bool,
}

impl<A: Send + 'static> ChannelCore<A> {
    fn push(&self, notification: Notification<A>) -> bool {
        let emitter = {
            let mut state = lock(&self.state);
            if state.closed {
                return false;
            }
            if notification.is_terminal() {
                state.closed = true;
            }
            match &state.emitter {
                Some(emitter) => emitter.clone(),
                None => {
                    state.pending.push(notification);
                    return true;
                }
            }
        };
        emitter.later(notification);
        true
    }

    fn attach(&self, emitter: Emitter<A>) {
        let pending = {
            let mut state = lock(&self.state);
            state.emitter = Some(emitter.clone());
            std::mem::take(&mut state.pending)
        };
        for notification in pending {
            emitter.now(notification);
        }
    }
}

/// Sending half of [`Agenda::channel`].
pub struct AgendaSender<A: Send + 'static> {
    core: Arc<ChannelCore<A>>,
}

impl<A: Send + 'static> AgendaSender<A> {
    /// Emit the next action. Returns `false` if the agenda already ended.
    pub fn send(&self, action: A) -> bool {
        self.core.push(Notification::Next(action))
    }

    /// Terminate the agenda with a source error.
    pub fn fail(&self, err: impl fmt::Display) -> bool {
        self.core.push(Notification::Error(AgendaError::failed(err)))
    }

    /// Complete the agenda.
    pub fn close(self) {
        drop(self);
    }

    /// Whether the agenda has ended.
    pub fn is_closed(&self) -> bool {
        lock(&self.core.state).closed
    }
}

impl<A: Send + 'static> Drop for AgendaSender<A> {
    fn drop(&mut self) {
        self.core.push(Notification::Complete);
    }
}

impl<A: Send + 'static> fmt::Debug for AgendaSender<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgendaSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Shared agendas
// ============================================================================

/// Multicast, reference-counted view of one published agenda.
///
/// Every store folds the same `SharedAgenda`; each action is wrapped in an
/// `Arc` exactly once, so all stores observe the same action identity.
pub struct SharedAgenda<A> {
    inner: Arc<SharedInner<A>>,
}

impl<A> Clone for SharedAgenda<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SharedInner<A> {
    id: u64,
    scheduler: Arc<dyn Scheduler>,
    runtime: Option<Handle>,
    state: Mutex<SharedState<A>>,
}

struct SharedState<A> {
    source: Option<Source<A>>,
    buffer: Vec<Notification<Arc<A>>>,
    sealed: bool,
    terminal: Option<Notification<Arc<A>>>,
    observers: Observers<Notification<Arc<A>>>,
    cancel: Option<CancellationToken>,
    connected: bool,
}

impl<A> fmt::Debug for SharedAgenda<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("SharedAgenda")
            .field("id", &self.inner.id)
            .field("observers", &state.observers.len())
            .field("connected", &state.connected)
            .field("terminated", &state.terminal.is_some())
            .finish()
    }
}

impl<A: Send + Sync + 'static> SharedAgenda<A> {
    /// Attach `agenda` to a scheduler (and runtime, for async sources).
    pub fn new(agenda: Agenda<A>, scheduler: Arc<dyn Scheduler>, runtime: Option<Handle>) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                id: NEXT_AGENDA_ID.fetch_add(1, Ordering::Relaxed),
                scheduler,
                runtime,
                state: Mutex::new(SharedState {
                    source: Some(agenda.source),
                    buffer: Vec::new(),
                    sealed: false,
                    terminal: None,
                    observers: Observers::default(),
                    cancel: None,
                    connected: false,
                }),
            }),
        }
    }

    /// Process-unique agenda id, used for logging and bookkeeping.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Observe the agenda.
    ///
    /// Notifications emitted before this call are replayed first (until the
    /// agenda is sealed; a terminal notification is always replayed). The
    /// first observer connects the source.
    pub fn subscribe(
        &self,
        observer: impl Fn(&Notification<Arc<A>>) + Send + Sync + 'static,
    ) -> Subscription {
        let observer: Observer<Notification<Arc<A>>> = Arc::new(observer);
        let (id, replay, connect) = {
            let mut state = lock(&self.inner.state);
            let mut replay = state.buffer.clone();
            if let Some(terminal) = &state.terminal {
                if state.sealed {
                    replay.push(terminal.clone());
                }
                (None, replay, None)
            } else {
                let id = state.observers.insert(Arc::clone(&observer));
                let connect = if state.observers.len() == 1 {
                    state.source.take()
                } else {
                    None
                };
                (Some(id), replay, connect)
            }
        };

        for notification in &replay {
            observer(notification);
        }
        if let Some(source) = connect {
            self.connect(source);
        }

        match id {
            Some(id) => {
                let weak = Arc::downgrade(&self.inner);
                Subscription::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove_observer(id);
                    }
                })
            }
            None => Subscription::empty(),
        }
    }

    /// Stop buffering for late observers.
    ///
    /// Called once publication has reached every observer; nothing can join
    /// after that except through the terminal replay.
    ///
    /// An agenda nobody is observing any more is disconnected here.
    pub fn seal(&self) {
        let cancel = {
            let mut state = lock(&self.inner.state);
            state.sealed = true;
            state.buffer.clear();
            state.release_if_unobserved()
        };
        if let Some(cancel) = cancel {
            tracing::debug!(agenda = self.inner.id, "Agenda unobserved after publication");
            cancel.cancel();
        }
    }

    /// Whether the source is currently connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.inner.state).connected
    }

    /// Whether the agenda completed or failed.
    pub fn is_terminated(&self) -> bool {
        lock(&self.inner.state).terminal.is_some()
    }

    /// Number of current observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.inner.state).observers.len()
    }

    fn connect(&self, source: Source<A>) {
        let cancel = CancellationToken::new();
        {
            let mut state = lock(&self.inner.state);
            state.cancel = Some(cancel.clone());
            state.connected = true;
        }

        let inner = Arc::clone(&self.inner);
        let emitter = Emitter {
            sink: Arc::new(move |notification: Notification<A>| inner.deliver(notification)),
            scheduler: Arc::clone(&self.inner.scheduler),
            runtime: self.inner.runtime.clone(),
            cancel,
        };
        self.inner
            .scheduler
            .schedule(Box::new(move || source.run(emitter)));
    }
}

impl<A> SharedState<A> {
    /// Disconnect once publication is over and the last observer has left.
    fn release_if_unobserved(&mut self) -> Option<CancellationToken> {
        if self.sealed && self.connected && self.observers.is_empty() {
            self.connected = false;
            self.cancel.take()
        } else {
            None
        }
    }
}

impl<A: Send + Sync + 'static> SharedInner<A> {
    fn deliver(&self, notification: Notification<A>) {
        let notification = notification.map(Arc::new);
        let observers = {
            let mut state = lock(&self.state);
            if !state.connected {
                return;
            }
            if !state.sealed {
                state.buffer.push(notification.clone());
            }
            let observers = state.observers.snapshot();
            if notification.is_terminal() {
                state.terminal = Some(notification.clone());
                state.connected = false;
                state.cancel = None;
                state.observers.clear();
            }
            observers
        };
        for observer in observers {
            observer(&notification);
        }
    }

    fn remove_observer(&self, id: u64) {
        let cancel = {
            let mut state = lock(&self.state);
            state.observers.remove(id);
            state.release_if_unobserved()
        };
        if let Some(cancel) = cancel {
            tracing::debug!(agenda = self.id, "Last observer left, disconnecting agenda");
            cancel.cancel();
        }
    }
}

// ============================================================================
// In-flight bookkeeping
// ============================================================================

/// Subscriptions to agendas that have not terminated yet, keyed by agenda id.
///
/// An agenda may terminate while it is still being subscribed to (eager
/// sources replay synchronously), so a release can arrive before the
/// matching track; such subscriptions are dropped on arrival.
#[derive(Default)]
pub(crate) struct Inflight {
    state: Mutex<InflightState>,
}

#[derive(Default)]
struct InflightState {
    subscriptions: HashMap<u64, Subscription>,
    released: HashSet<u64>,
}

impl Inflight {
    pub(crate) fn track(&self, id: u64, subscription: Subscription) {
        let stale = {
            let mut state = lock(&self.state);
            if state.released.remove(&id) {
                Some(subscription)
            } else {
                state.subscriptions.insert(id, subscription);
                None
            }
        };
        drop(stale);
    }

    pub(crate) fn release(&self, id: u64) {
        let subscription = {
            let mut state = lock(&self.state);
            let subscription = state.subscriptions.remove(&id);
            if subscription.is_none() {
                state.released.insert(id);
            }
            subscription
        };
        drop(subscription);
    }

    pub(crate) fn clear(&self) {
        let subscriptions: Vec<_> = {
            let mut state = lock(&self.state);
            state.released.clear();
            state.subscriptions.drain().map(|(_, sub)| sub).collect()
        };
        drop(subscriptions);
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.state).subscriptions.len()
    }
}
