//! Action trait for opaque state-change intents

use std::fmt::Debug;

/// Marker trait for actions that can be carried by an agenda
///
/// Actions represent intents to change state. The engine never looks inside
/// them; it only needs to:
/// - Clone them: agendas are replayed to every store
/// - Debug them: for logging
/// - Send + Sync + 'static: agendas may be driven from async tasks
///
/// Use `#[derive(Action)]` from `agenda-dispatch-macros` to auto-implement this trait.
pub trait Action: Clone + Debug + Send + Sync + 'static {
    /// Get the action name for logging
    fn name(&self) -> &'static str;

    /// Whether this action carries no intent at all.
    ///
    /// No-op actions are dropped before they reach any reducer and never
    /// appear in a store's history.
    fn is_noop(&self) -> bool {
        false
    }
}

/// What a reducer is asked to do.
///
/// Every store starts by folding [`Step::Init`] over its initial value to
/// obtain the genesis state; everything afterwards is a real action.
#[derive(Debug, PartialEq, Eq)]
pub enum Step<'a, A> {
    /// Synthetic initialization action, applied exactly once per store.
    Init,
    /// A caller-supplied action.
    Apply(&'a A),
}

impl<A> Clone for Step<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A> Copy for Step<'_, A> {}

impl<'a, A> Step<'a, A> {
    /// The carried action, if this is not the init step.
    pub fn action(self) -> Option<&'a A> {
        match self {
            Step::Init => None,
            Step::Apply(action) => Some(action),
        }
    }

    /// Whether this is the synthetic init step.
    pub fn is_init(self) -> bool {
        matches!(self, Step::Init)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum TestAction {
        Ping,
        Nothing,
    }

    impl Action for TestAction {
        fn name(&self) -> &'static str {
            match self {
                TestAction::Ping => "Ping",
                TestAction::Nothing => "Nothing",
            }
        }

        fn is_noop(&self) -> bool {
            matches!(self, TestAction::Nothing)
        }
    }

    #[test]
    fn test_step_accessors() {
        let ping = TestAction::Ping;
        assert!(Step::<TestAction>::Init.is_init());
        assert_eq!(Step::<TestAction>::Init.action(), None);
        assert_eq!(Step::Apply(&ping).action(), Some(&TestAction::Ping));
        assert!(!Step::Apply(&ping).is_init());
    }

    #[test]
    fn test_noop_default() {
        assert!(!TestAction::Ping.is_noop());
        assert!(TestAction::Nothing.is_noop());
    }
}
