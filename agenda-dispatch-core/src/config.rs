//! Engine configuration
//!
//! [`EngineOptions`] is the programmatic builder. [`EngineConfig`] is its
//! serializable counterpart, for loading the same settings from JSON or any
//! other serde format.
//!
//! # Example
//!
//! ```
//! use agenda_dispatch_core::config::{EngineConfig, Logging, SchedulerKind};
//!
//! let config = EngineConfig::from_json(r#"{ "logging": "agendas,stores" }"#).unwrap();
//! assert_eq!(config.scheduler, SchedulerKind::Queue);
//! assert_eq!(config.logging.resolve().unwrap(), Logging::all());
//! ```

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::error::EngineError;
use crate::scheduler::{AsyncScheduler, ImmediateScheduler, QueueScheduler, Scheduler};
use crate::sink::DiagnosticSink;
use crate::Action;

bitflags! {
    /// Which built-in logging is enabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Logging: u8 {
        /// Log every published agenda's actions, completion and failure.
        const AGENDAS = 1;
        /// Log every store's changes and rollbacks through a `TracingSink`.
        const STORES = 1 << 1;
    }
}

impl Logging {
    /// Parse a comma-separated list such as `"agendas,stores"`.
    ///
    /// Accepts `agendas`, `stores`, `all` and `none`; whitespace and empty
    /// entries are ignored.
    pub fn parse(flags: &str) -> Result<Self, EngineError> {
        flags
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Logging::empty(), |acc, part| {
                let flag = match part.to_ascii_lowercase().as_str() {
                    "agendas" => Logging::AGENDAS,
                    "stores" => Logging::STORES,
                    "all" => Logging::all(),
                    "none" => Logging::empty(),
                    other => {
                        return Err(EngineError::Config(format!(
                            "unknown logging target `{other}`"
                        )))
                    }
                };
                Ok(acc | flag)
            })
    }

    /// Whether agenda logging is enabled.
    pub fn agendas(self) -> bool {
        self.contains(Logging::AGENDAS)
    }

    /// Whether store logging is enabled.
    pub fn stores(self) -> bool {
        self.contains(Logging::STORES)
    }
}

impl From<bool> for Logging {
    fn from(enabled: bool) -> Self {
        if enabled {
            Logging::all()
        } else {
            Logging::empty()
        }
    }
}

/// Built-in scheduling strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    /// [`QueueScheduler`]
    #[default]
    Queue,
    /// [`ImmediateScheduler`]
    Immediate,
    /// [`AsyncScheduler`] on the ambient tokio runtime
    Async,
}

/// Logging section of [`EngineConfig`].
///
/// Accepts `true`/`false`, `{ "agendas": bool, "stores": bool }` or a
/// comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoggingConfig {
    /// Everything or nothing.
    Enabled(bool),
    /// Per-target switches.
    Targets {
        #[serde(default)]
        agendas: bool,
        #[serde(default)]
        stores: bool,
    },
    /// Comma-separated target list.
    List(String),
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig::Enabled(false)
    }
}

impl LoggingConfig {
    /// Resolve into logging flags.
    pub fn resolve(&self) -> Result<Logging, EngineError> {
        match self {
            LoggingConfig::Enabled(enabled) => Ok(Logging::from(*enabled)),
            LoggingConfig::Targets { agendas, stores } => {
                let mut logging = Logging::empty();
                logging.set(Logging::AGENDAS, *agendas);
                logging.set(Logging::STORES, *stores);
                Ok(logging)
            }
            LoggingConfig::List(flags) => Logging::parse(flags),
        }
    }
}

/// Serializable engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduling strategy (default: queue).
    pub scheduler: SchedulerKind,
    /// Built-in logging (default: off).
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// Options for creating an [`Engine`](crate::Engine).
pub struct EngineOptions<A: Action> {
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) logging: Logging,
    pub(crate) sink: Option<Arc<dyn DiagnosticSink<A>>>,
    pub(crate) runtime: Option<Handle>,
}

impl<A: Action> Default for EngineOptions<A> {
    fn default() -> Self {
        Self {
            scheduler: Arc::new(QueueScheduler::new()),
            logging: Logging::empty(),
            sink: None,
            runtime: None,
        }
    }
}

impl<A: Action> fmt::Debug for EngineOptions<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("logging", &self.logging)
            .field("sink", &self.sink.is_some())
            .field("runtime", &self.runtime.is_some())
            .finish()
    }
}

impl<A: Action> EngineOptions<A> {
    /// Default options: queue scheduler, no logging, no sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build options from a serializable configuration.
    ///
    /// `SchedulerKind::Async` needs an ambient tokio runtime.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let scheduler: Arc<dyn Scheduler> = match config.scheduler {
            SchedulerKind::Queue => Arc::new(QueueScheduler::new()),
            SchedulerKind::Immediate => Arc::new(ImmediateScheduler),
            SchedulerKind::Async => Arc::new(AsyncScheduler::try_current().ok_or_else(|| {
                EngineError::Config("the async scheduler needs a tokio runtime".to_string())
            })?),
        };
        Ok(Self {
            scheduler,
            logging: config.logging.resolve()?,
            ..Self::default()
        })
    }

    /// Use a scheduling strategy.
    pub fn with_scheduler(self, scheduler: impl Scheduler) -> Self {
        self.with_shared_scheduler(Arc::new(scheduler))
    }

    /// Use a scheduling strategy shared with other engines.
    pub fn with_shared_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Enable built-in logging.
    pub fn with_logging(mut self, logging: impl Into<Logging>) -> Self {
        self.logging = logging.into();
        self
    }

    /// Install a diagnostic sink; it replaces the default error channel.
    pub fn with_sink(self, sink: impl DiagnosticSink<A> + 'static) -> Self {
        self.with_shared_sink(Arc::new(sink))
    }

    /// Install an already shared diagnostic sink.
    pub fn with_shared_sink(mut self, sink: Arc<dyn DiagnosticSink<A>>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Drive async agendas on this runtime instead of the ambient one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Enabled logging targets.
    pub fn logging(&self) -> Logging {
        self.logging
    }
}
