//! Everything the engine accepts through [`Engine::next`](crate::Engine::next)
//!
//! Each [`Input`] shape is normalized into exactly one agenda (a thunk may
//! also emit further single-action agendas while it runs).

use std::fmt;
use std::future::Future;

use crate::agenda::{Agenda, BoxFuture};
use crate::cursor::Reducer;
use crate::engine::Engine;
use crate::error::{AgendaError, EngineError};
use crate::store::Store;
use crate::Action;

/// Synchronous computation that may emit actions and read stores while it
/// runs, and may return an agenda to publish afterwards.
pub type Thunk<A> = Box<dyn FnOnce(&ThunkContext<A>) -> Option<Agenda<A>> + Send + 'static>;

/// An admissible input for [`Engine::next`](crate::Engine::next).
pub enum Input<A: Action> {
    /// A single action; becomes a one-element agenda.
    Action(A),
    /// One action resolved later. An error terminates the agenda and rolls
    /// it back.
    Deferred(BoxFuture<Result<A, AgendaError>>),
    /// A thunk, invoked synchronously with a [`ThunkContext`].
    Thunk(Thunk<A>),
    /// A ready-made agenda, published as is.
    Agenda(Agenda<A>),
}

impl<A: Action> Input<A> {
    /// A single action.
    pub fn action(action: A) -> Self {
        Input::Action(action)
    }

    /// A future resolving to one action.
    pub fn deferred<F, E>(future: F) -> Self
    where
        F: Future<Output = Result<A, E>> + Send + 'static,
        E: fmt::Display,
    {
        Input::Deferred(Box::pin(async move {
            future.await.map_err(AgendaError::failed)
        }))
    }

    /// A thunk.
    pub fn thunk<F>(thunk: F) -> Self
    where
        F: FnOnce(&ThunkContext<A>) -> Option<Agenda<A>> + Send + 'static,
    {
        Input::Thunk(Box::new(thunk))
    }

    /// A ready-made agenda.
    pub fn agenda(agenda: Agenda<A>) -> Self {
        Input::Agenda(agenda)
    }
}

impl<A: Action> From<Agenda<A>> for Input<A> {
    fn from(agenda: Agenda<A>) -> Self {
        Input::Agenda(agenda)
    }
}

impl<A: Action> From<Vec<A>> for Input<A> {
    fn from(actions: Vec<A>) -> Self {
        Input::Agenda(Agenda::from(actions))
    }
}

impl<A: Action> fmt::Debug for Input<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Action(action) => f.debug_tuple("Action").field(action).finish(),
            Input::Deferred(_) => f.write_str("Deferred"),
            Input::Thunk(_) => f.write_str("Thunk"),
            Input::Agenda(agenda) => f.debug_tuple("Agenda").field(agenda).finish(),
        }
    }
}

/// Capabilities handed to a thunk.
pub struct ThunkContext<A: Action> {
    engine: Engine<A>,
}

impl<A: Action> ThunkContext<A> {
    pub(crate) fn new(engine: Engine<A>) -> Self {
        Self { engine }
    }

    /// Publish `action` right away as its own one-element agenda.
    pub fn emit(&self, action: A) {
        self.engine.publish_action(action);
    }

    /// Submit any other input, exactly like [`Engine::next`](crate::Engine::next).
    pub fn next(&self, input: impl Into<Input<A>>) -> Result<(), EngineError> {
        self.engine.next(input)
    }

    /// Register `reducer` (or look up its store), like
    /// [`Engine::reduce`](crate::Engine::reduce).
    pub fn fold<S>(&self, reducer: Reducer<S, A>, init: S) -> Result<Store<S, A>, EngineError>
    where
        S: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        self.engine.reduce(reducer, init)
    }
}

impl<A: Action> fmt::Debug for ThunkContext<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThunkContext").finish_non_exhaustive()
    }
}
