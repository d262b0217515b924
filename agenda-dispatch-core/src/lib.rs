//! Core engine for agenda-dispatch
//!
//! A reactive state-management core built around agendas: ordered, possibly
//! asynchronous batches of actions that succeed or fail as a unit.
//!
//! # Core Concepts
//!
//! - **Action**: opaque unit of state-change intent
//! - **Agenda**: ordered batch of actions (eager, deferred, streamed or driven by a channel)
//! - **Reducer**: pure `fn(&S, Step<A>) -> Result<S, ReduceError>`
//! - **Store**: replayed, distinct-valued state sequence derived from one reducer
//! - **Engine**: normalizes inputs, multicasts agendas and owns the stores
//!
//! When a reducer rejects an action, or an agenda's source fails, every
//! action of that agenda is removed from the store's history. Actions of
//! other agendas that were folded in between are kept and replayed.
//!
//! # Basic Example
//!
//! ```ignore
//! use agenda_dispatch_core::prelude::*;
//!
//! #[derive(Action, Clone, Debug)]
//! enum Counter {
//!     Inc,
//!     Boom,
//! }
//!
//! fn count(state: &u32, step: Step<'_, Counter>) -> Result<u32, ReduceError> {
//!     match step {
//!         Step::Init => Ok(*state),
//!         Step::Apply(Counter::Inc) => Ok(state + 1),
//!         Step::Apply(Counter::Boom) => Err(ReduceError::new("boom")),
//!     }
//! }
//!
//! let engine = Engine::default();
//! let store = engine.reduce(count, 0)?;
//! engine.next(Counter::Inc)?;
//! engine.next(vec![Counter::Inc, Counter::Boom])?; // rolled back
//! assert_eq!(store.state(), 1);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod action;
pub mod agenda;
pub mod config;
pub mod cursor;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod input;
mod pipeline;
mod registry;
pub mod scheduler;
pub mod sink;
pub mod store;
pub mod subject;
pub mod testing;

// Core trait exports
pub use action::{Action, Step};

// Agenda exports
pub use agenda::{Agenda, AgendaSender, BoxFuture, BoxStream, Notification, SharedAgenda};

// Engine exports
pub use config::{EngineConfig, EngineOptions, Logging, LoggingConfig, SchedulerKind};
pub use engine::{BoundAction, Engine};
pub use input::{Input, Thunk, ThunkContext};

// Store exports
pub use cursor::{filter_actions, Cursor, CursorIter, Reducer, Rollback};
pub use dispatcher::Dispatcher;
pub use store::{StateStream, Store};
pub use subject::{ReplaySubject, Subject, Subscription};

// Scheduling exports
pub use scheduler::{AsyncScheduler, ImmediateScheduler, QueueScheduler, Scheduler, Work};

// Diagnostics exports
pub use error::{AgendaError, EngineError, ReduceError};
pub use sink::{ComposedSink, DiagnosticSink, NoopSink, SinkContext, TracingSink};

// Testing exports
pub use testing::{RecordingSink, SinkEvent, StateRecorder};

/// Lock a mutex, recovering the data if a panicking observer poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{Action, Step};
    pub use crate::agenda::{Agenda, AgendaSender};
    pub use crate::config::{EngineOptions, Logging};
    pub use crate::engine::{BoundAction, Engine};
    pub use crate::error::{AgendaError, EngineError, ReduceError};
    pub use crate::input::{Input, ThunkContext};
    pub use crate::sink::{DiagnosticSink, TracingSink};
    pub use crate::store::Store;
    pub use crate::subject::Subscription;
}
