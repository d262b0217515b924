//! agenda-dispatch: reducer stores folded from concurrent agendas
//!
//! Inputs are normalized into agendas, every agenda is multicast to every
//! registered reducer, and a failing agenda is rolled back out of each
//! store's history without disturbing the agendas that ran alongside it.
//!
//! # Example
//! ```ignore
//! use agenda_dispatch::prelude::*;
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
//! let _sub = store.subscribe(|n| println!("count = {n}"));
//!
//! engine.next(Counter::Inc)?;                       // 1
//! engine.next(vec![Counter::Inc, Counter::Boom])?;  // 2, then rolled back to 1
//! engine.next(Counter::Inc)?;                       // 2
//! ```

// Re-export everything from core
pub use agenda_dispatch_core::*;

// Re-export derive macros
pub use agenda_dispatch_macros::Action;

/// Prelude for convenient imports
pub mod prelude {
    // Traits
    pub use agenda_dispatch_core::{Action, DiagnosticSink, Scheduler};

    // Engine
    pub use agenda_dispatch_core::{
        BoundAction, Engine, EngineConfig, EngineOptions, Input, Logging, ThunkContext,
    };

    // Agendas
    pub use agenda_dispatch_core::{Agenda, AgendaSender};

    // Stores
    pub use agenda_dispatch_core::{Reducer, Step, Store, Subscription};

    // Errors
    pub use agenda_dispatch_core::{AgendaError, EngineError, ReduceError};

    // Derive macros
    pub use agenda_dispatch_macros::Action;
}
