//! The engine: accepts inputs, publishes agendas and owns the stores
//!
//! ```
//! use agenda_dispatch_core::{Action, Engine, Input, ReduceError, Step};
//!
//! #[derive(Clone, Debug)]
//! enum Counter {
//!     Inc,
//! }
//!
//! impl Action for Counter {
//!     fn name(&self) -> &'static str {
//!         "Inc"
//!     }
//! }
//!
//! fn count(state: &u32, step: Step<'_, Counter>) -> Result<u32, ReduceError> {
//!     Ok(match step {
//!         Step::Init => *state,
//!         Step::Apply(Counter::Inc) => state + 1,
//!     })
//! }
//!
//! let engine = Engine::default();
//! let store = engine.reduce(count, 0).unwrap();
//! engine.next(Input::action(Counter::Inc)).unwrap();
//! assert_eq!(store.state(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Once};

use tokio::runtime::Handle;

use crate::action::Step;
use crate::agenda::{Agenda, Inflight, Notification, SharedAgenda};
use crate::config::{EngineOptions, Logging};
use crate::cursor::{Cursor, Reducer};
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::input::{Input, ThunkContext};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::sink::{ComposedSink, DiagnosticSink, TracingSink};
use crate::store::Store;
use crate::subject::Subscription;
use crate::Action;

/// Handle to one dispatcher and every store registered on it.
///
/// Cloning is cheap; clones share everything.
pub struct Engine<A: Action> {
    inner: Arc<EngineInner<A>>,
}

struct EngineInner<A: Action> {
    dispatcher: Dispatcher<A>,
    registry: Registry,
    scheduler: Arc<dyn Scheduler>,
    runtime: Option<Handle>,
    logging: Logging,
    sink: Option<Arc<dyn DiagnosticSink<A>>>,
    agenda_logger: Option<AgendaLogger>,
}

impl<A: Action> Clone for Engine<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Action> Default for Engine<A> {
    fn default() -> Self {
        Self::new(EngineOptions::default())
    }
}

impl<A: Action> fmt::Debug for Engine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.inner.registry)
            .field("logging", &self.inner.logging)
            .field("sink", &self.inner.sink.is_some())
            .finish()
    }
}

impl<A: Action> Engine<A> {
    /// Create an engine with its own dispatcher.
    pub fn new(options: EngineOptions<A>) -> Self {
        let dispatcher = Dispatcher::new();
        let agenda_logger = options
            .logging
            .agendas()
            .then(|| AgendaLogger::attach(&dispatcher));
        Self {
            inner: Arc::new(EngineInner {
                dispatcher,
                registry: Registry::default(),
                scheduler: options.scheduler,
                runtime: options.runtime,
                logging: options.logging,
                sink: options.sink,
                agenda_logger,
            }),
        }
    }

    /// Get the store for `reducer`, registering it on first use.
    ///
    /// The first call computes the genesis state with `Step::Init` applied to
    /// `init`; later calls return the same store and ignore `init`.
    ///
    /// Stores are keyed by the reducer's function address. Rust does not
    /// promise that address is unique or stable: the linker may fold two
    /// reducers with identical machine code into one function, and one
    /// reducer may get distinct addresses in different codegen units. Give
    /// each reducer a distinct body and register it from one place.
    pub fn reduce<S>(&self, reducer: Reducer<S, A>, init: S) -> Result<Store<S, A>, EngineError>
    where
        S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.registry.get_or_try_insert(reducer, |index| {
            let name = format!("store#{index}");
            let genesis = reducer(&init, Step::Init).map_err(|source| {
                EngineError::Registration {
                    reducer: name.clone(),
                    source,
                }
            })?;
            tracing::debug!(store = %name, state = ?genesis, "Registered reducer");
            Ok(Store::connect(
                name,
                reducer,
                Cursor::genesis(genesis),
                self.store_sink(),
                &self.inner.dispatcher,
            ))
        })
    }

    /// [`reduce`](Self::reduce) starting from `S::default()`.
    pub fn reduce_default<S>(&self, reducer: Reducer<S, A>) -> Result<Store<S, A>, EngineError>
    where
        S: Clone + Default + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.reduce(reducer, S::default())
    }

    /// Submit an input.
    ///
    /// Fire-and-forget: folding happens on the engine's scheduler. Fails
    /// only for async agendas when no tokio runtime is configured or
    /// ambient.
    pub fn next(&self, input: impl Into<Input<A>>) -> Result<(), EngineError> {
        match input.into() {
            Input::Action(action) => {
                self.publish_action(action);
                Ok(())
            }
            Input::Deferred(future) => self.publish(Agenda::from_future(future)),
            Input::Agenda(agenda) => self.publish(agenda),
            Input::Thunk(thunk) => {
                let context = ThunkContext::new(self.clone());
                match thunk(&context) {
                    Some(agenda) => self.publish(agenda),
                    None => Ok(()),
                }
            }
        }
    }

    /// Bind an action creator to this engine.
    pub fn wrap_action<T, F>(&self, creator: F) -> BoundAction<T, A>
    where
        F: Fn(T) -> Input<A> + Send + Sync + 'static,
    {
        BoundAction {
            engine: self.clone(),
            creator: Arc::new(creator),
        }
    }

    /// Bind every action creator of a mapping to this engine.
    pub fn wrap_actions<K, T, F, I>(&self, creators: I) -> HashMap<K, BoundAction<T, A>>
    where
        I: IntoIterator<Item = (K, F)>,
        K: Eq + Hash,
        F: Fn(T) -> Input<A> + Send + Sync + 'static,
    {
        creators
            .into_iter()
            .map(|(key, creator)| (key, self.wrap_action(creator)))
            .collect()
    }

    /// Legacy entry point. A thunk's returned agenda is ignored.
    #[deprecated(note = "use `Engine::next` instead")]
    pub fn dispatch(&self, input: impl Into<Input<A>>) -> Result<(), EngineError> {
        static NOTICE: Once = Once::new();
        NOTICE.call_once(|| {
            tracing::warn!("Engine::dispatch is deprecated, use Engine::next instead");
        });
        match input.into() {
            Input::Thunk(thunk) => {
                let context = ThunkContext::new(self.clone());
                if thunk(&context).is_some() {
                    tracing::debug!("Ignoring agenda returned from a dispatched thunk");
                }
                Ok(())
            }
            other => self.next(other),
        }
    }

    /// Legacy entry point. Several agendas are concatenated into one.
    #[deprecated(note = "use `Engine::next` with an agenda instead")]
    pub fn schedule(&self, agendas: Vec<Agenda<A>>) -> Result<(), EngineError> {
        static NOTICE: Once = Once::new();
        NOTICE.call_once(|| {
            tracing::warn!("Engine::schedule is deprecated, use Engine::next instead");
        });
        let mut agendas = agendas;
        match agendas.len() {
            0 => Ok(()),
            1 => match agendas.pop() {
                Some(agenda) => self.publish(agenda),
                None => Ok(()),
            },
            _ => self.publish(Agenda::concat(agendas)),
        }
    }

    /// Disconnect every store.
    pub fn shutdown(&self) {
        tracing::debug!(stores = self.inner.registry.len(), "Shutting down engine");
        self.inner.registry.disconnect_all();
        if let Some(logger) = &self.inner.agenda_logger {
            logger.release_all();
        }
    }

    /// Number of registered stores.
    pub fn store_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Enabled built-in logging.
    pub fn logging(&self) -> Logging {
        self.inner.logging
    }

    /// The engine's dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<A> {
        &self.inner.dispatcher
    }

    pub(crate) fn publish_action(&self, action: A) {
        let shared = SharedAgenda::new(Agenda::of(action), Arc::clone(&self.inner.scheduler), None);
        self.publish_shared(shared);
    }

    fn publish(&self, agenda: Agenda<A>) -> Result<(), EngineError> {
        let runtime = self
            .inner
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        if runtime.is_none() && agenda.needs_runtime() {
            return Err(EngineError::NoRuntime);
        }
        let shared = SharedAgenda::new(agenda, Arc::clone(&self.inner.scheduler), runtime);
        self.publish_shared(shared);
        Ok(())
    }

    fn publish_shared(&self, shared: SharedAgenda<A>) {
        let dispatcher = self.inner.dispatcher.clone();
        self.inner
            .scheduler
            .schedule(Box::new(move || dispatcher.publish(&shared)));
    }

    fn store_sink(&self) -> Option<Arc<dyn DiagnosticSink<A>>> {
        let log_stores = self.inner.logging.stores();
        match self.inner.sink.clone() {
            Some(sink) if log_stores => {
                let mut composed = ComposedSink::new();
                composed.add_shared(sink).add(TracingSink::new());
                Some(Arc::new(composed))
            }
            Some(sink) => Some(sink),
            None => log_stores.then(|| Arc::new(TracingSink::new()) as Arc<dyn DiagnosticSink<A>>),
        }
    }
}

/// An action creator bound to an engine, from [`Engine::wrap_action`].
pub struct BoundAction<T, A: Action> {
    engine: Engine<A>,
    creator: Arc<dyn Fn(T) -> Input<A> + Send + Sync>,
}

impl<T, A: Action> Clone for BoundAction<T, A> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            creator: Arc::clone(&self.creator),
        }
    }
}

impl<T, A: Action> BoundAction<T, A> {
    /// Create the input and submit it.
    pub fn call(&self, args: T) -> Result<(), EngineError> {
        self.engine.next((self.creator)(args))
    }
}

impl<T, A: Action> fmt::Debug for BoundAction<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAction").finish_non_exhaustive()
    }
}

/// Logs every published agenda's actions and how it ended.
struct AgendaLogger {
    inflight: Arc<Inflight>,
    _connection: Subscription,
}

impl AgendaLogger {
    fn attach<A: Action>(dispatcher: &Dispatcher<A>) -> Self {
        let inflight = Arc::new(Inflight::default());
        let tracked = Arc::clone(&inflight);
        let connection = dispatcher.subscribe(move |agenda| {
            let id = agenda.id();
            tracing::debug!(agenda = id, "Agenda published");
            let released = Arc::downgrade(&tracked);
            let subscription = agenda.subscribe(move |notification| match notification {
                Notification::Next(action) => {
                    tracing::debug!(agenda = id, action = %action.name(), "Agenda action");
                }
                Notification::Error(err) => {
                    tracing::warn!(agenda = id, error = %err, "Agenda failed");
                    if let Some(inflight) = released.upgrade() {
                        inflight.release(id);
                    }
                }
                Notification::Complete => {
                    tracing::debug!(agenda = id, "Agenda completed");
                    if let Some(inflight) = released.upgrade() {
                        inflight.release(id);
                    }
                }
            });
            tracked.track(id, subscription);
        });
        Self {
            inflight,
            _connection: connection,
        }
    }

    fn release_all(&self) {
        self.inflight.clear();
    }
}
