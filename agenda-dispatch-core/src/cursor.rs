//! Immutable history of (action, state) pairs for one store
//!
//! Each successful fold produces a new [`Cursor`] pointing at the previous
//! one; nothing is ever mutated. Rollback ([`filter_actions`]) rebuilds the
//! segment after an anchor without a failed agenda's actions, reusing every
//! cursor before the first excluded one by reference.

use std::fmt;
use std::sync::Arc;

use crate::action::Step;
use crate::error::ReduceError;

/// Pure state transition for one store.
///
/// `Step::Init` is applied exactly once to the initial value to produce the
/// genesis state. Returning an error for any other step rolls back the
/// agenda that delivered the action.
pub type Reducer<S, A> = fn(&S, Step<'_, A>) -> Result<S, ReduceError>;

/// One node of a store's history.
///
/// Invariant: `state == reducer(previous.state, action)`; the genesis cursor
/// has no action and no previous cursor.
pub struct Cursor<S, A> {
    action: Option<Arc<A>>,
    state: S,
    previous: Option<Arc<Cursor<S, A>>>,
}

impl<S, A> Cursor<S, A> {
    /// The first cursor of a history.
    pub fn genesis(state: S) -> Arc<Self> {
        Arc::new(Self {
            action: None,
            state,
            previous: None,
        })
    }

    /// Append `action` and the state it produced after `previous`.
    pub fn advance(previous: &Arc<Self>, action: Arc<A>, state: S) -> Arc<Self> {
        Arc::new(Self {
            action: Some(action),
            state,
            previous: Some(Arc::clone(previous)),
        })
    }

    /// The action that produced this cursor; `None` for genesis.
    pub fn action(&self) -> Option<&Arc<A>> {
        self.action.as_ref()
    }

    /// The state after applying this cursor's action.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// The cursor this one was derived from.
    pub fn previous(&self) -> Option<&Arc<Self>> {
        self.previous.as_ref()
    }

    /// Whether this is the first cursor of its history.
    pub fn is_genesis(&self) -> bool {
        self.previous.is_none()
    }

    /// Walk from this cursor back to genesis.
    pub fn iter(self: &Arc<Self>) -> CursorIter<S, A> {
        CursorIter {
            next: Some(Arc::clone(self)),
        }
    }

    /// Number of cursors from genesis to this one, inclusive.
    pub fn depth(self: &Arc<Self>) -> usize {
        self.iter().count()
    }
}

impl<S: fmt::Debug, A: fmt::Debug> fmt::Debug for Cursor<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("action", &self.action)
            .field("state", &self.state)
            .field("genesis", &self.is_genesis())
            .finish()
    }
}

// Unlink iteratively so long histories don't overflow the stack on drop.
impl<S, A> Drop for Cursor<S, A> {
    fn drop(&mut self) {
        let mut next = self.previous.take();
        while let Some(cursor) = next {
            match Arc::try_unwrap(cursor) {
                Ok(mut cursor) => next = cursor.previous.take(),
                Err(_) => break,
            }
        }
    }
}

/// Iterator from a cursor back to genesis, newest first.
pub struct CursorIter<S, A> {
    next: Option<Arc<Cursor<S, A>>>,
}

impl<S, A> Iterator for CursorIter<S, A> {
    type Item = Arc<Cursor<S, A>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.previous.clone();
        Some(current)
    }
}

/// Result of rebuilding a history without some actions.
pub struct Rollback<S, A> {
    /// The new current cursor.
    pub cursor: Arc<Cursor<S, A>>,
    /// Kept actions that no longer applied cleanly during replay and were
    /// dropped as well.
    pub dropped: Vec<(Arc<A>, ReduceError)>,
    /// Whether `anchor` was no longer part of the history and the replay
    /// started from genesis instead.
    pub anchor_lost: bool,
}

impl<S: fmt::Debug, A: fmt::Debug> fmt::Debug for Rollback<S, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rollback")
            .field("state", self.cursor.state())
            .field("dropped", &self.dropped.len())
            .field("anchor_lost", &self.anchor_lost)
            .finish()
    }
}

/// Rebuild the history between `anchor` and `current`, keeping only the
/// cursors whose action satisfies `keep`.
///
/// Kept actions are re-applied through `reducer` in their original relative
/// order, starting from the last cursor that needs no change. If `anchor`
/// is not an ancestor of `current` (an overlapping rollback already
/// replaced it) the whole history since genesis is filtered instead.
pub fn filter_actions<S, A>(
    anchor: &Arc<Cursor<S, A>>,
    current: &Arc<Cursor<S, A>>,
    reducer: Reducer<S, A>,
    keep: impl Fn(&Arc<A>) -> bool,
) -> Rollback<S, A> {
    let mut segment = Vec::new();
    let mut base = None;
    for cursor in current.iter() {
        if Arc::ptr_eq(&cursor, anchor) || cursor.is_genesis() {
            base = Some(cursor);
            break;
        }
        segment.push(cursor);
    }
    let Some(base) = base else {
        // A history always ends at genesis.
        return Rollback {
            cursor: Arc::clone(current),
            dropped: Vec::new(),
            anchor_lost: true,
        };
    };
    let anchor_lost = !Arc::ptr_eq(&base, anchor);
    segment.reverse();

    let first_excluded = segment
        .iter()
        .position(|cursor| cursor.action().is_some_and(|action| !keep(action)));
    let Some(first_excluded) = first_excluded else {
        return Rollback {
            cursor: Arc::clone(current),
            dropped: Vec::new(),
            anchor_lost,
        };
    };

    let mut cursor = match first_excluded {
        0 => base,
        n => Arc::clone(&segment[n - 1]),
    };
    let mut dropped = Vec::new();
    for node in &segment[first_excluded..] {
        let Some(action) = node.action() else {
            continue;
        };
        if !keep(action) {
            continue;
        }
        match reducer(cursor.state(), Step::Apply(action)) {
            Ok(state) => cursor = Cursor::advance(&cursor, Arc::clone(action), state),
            Err(err) => dropped.push((Arc::clone(action), err)),
        }
    }

    Rollback {
        cursor,
        dropped,
        anchor_lost,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(
        state: &Vec<&'static str>,
        step: Step<'_, &'static str>,
    ) -> Result<Vec<&'static str>, ReduceError> {
        match step {
            Step::Init => Ok(state.clone()),
            Step::Apply(&"bad-after-x") if !state.contains(&"x") => {
                Err(ReduceError::new("needs x"))
            }
            Step::Apply(action) => {
                let mut next = state.clone();
                next.push(action);
                Ok(next)
            }
        }
    }

    fn build(
        from: &Arc<Cursor<Vec<&'static str>, &'static str>>,
        actions: &[&'static str],
    ) -> (Arc<Cursor<Vec<&'static str>, &'static str>>, Vec<Arc<&'static str>>) {
        let mut cursor = Arc::clone(from);
        let mut applied = Vec::new();
        for action in actions {
            let action = Arc::new(*action);
            let state = push(cursor.state(), Step::Apply(&action)).unwrap();
            cursor = Cursor::advance(&cursor, Arc::clone(&action), state);
            applied.push(action);
        }
        (cursor, applied)
    }

    fn actions_of(cursor: &Arc<Cursor<Vec<&'static str>, &'static str>>) -> Vec<&'static str> {
        let mut actions: Vec<_> = cursor
            .iter()
            .filter_map(|c| c.action().map(|a| **a))
            .collect();
        actions.reverse();
        actions
    }

    #[test]
    fn test_iter_and_depth() {
        let genesis = Cursor::genesis(Vec::new());
        let (current, _) = build(&genesis, &["a", "b"]);
        assert_eq!(current.depth(), 3);
        assert_eq!(actions_of(&current), vec!["a", "b"]);
        assert!(current.iter().last().unwrap().is_genesis());
    }

    #[test]
    fn test_filter_keeps_interleaved_actions() {
        let genesis = Cursor::genesis(Vec::new());
        let (before, _) = build(&genesis, &["a"]);
        let (current, applied) = build(&before, &["x1", "y1", "x2", "y2"]);
        let failed: Vec<_> = applied
            .iter()
            .filter(|a| a.starts_with('x'))
            .cloned()
            .collect();

        let rollback = filter_actions(&before, &current, push, |a| {
            !failed.iter().any(|f| Arc::ptr_eq(f, a))
        });

        assert!(!rollback.anchor_lost);
        assert!(rollback.dropped.is_empty());
        assert_eq!(rollback.cursor.state(), &vec!["a", "y1", "y2"]);
        assert_eq!(actions_of(&rollback.cursor), vec!["a", "y1", "y2"]);
    }

    #[test]
    fn test_filter_reuses_untouched_prefix() {
        let genesis = Cursor::genesis(Vec::new());
        let (current, applied) = build(&genesis, &["y1", "x1"]);
        let x1 = Arc::clone(&applied[1]);

        let rollback = filter_actions(&genesis, &current, push, |a| !Arc::ptr_eq(a, &x1));

        let y1_cursor = current.previous().unwrap();
        assert!(Arc::ptr_eq(&rollback.cursor, y1_cursor));
    }

    #[test]
    fn test_filter_without_excluded_actions_is_identity() {
        let genesis = Cursor::genesis(Vec::new());
        let (current, _) = build(&genesis, &["a", "b"]);

        let rollback = filter_actions(&genesis, &current, push, |_| true);
        assert!(Arc::ptr_eq(&rollback.cursor, &current));
    }

    #[test]
    fn test_filter_drops_actions_that_no_longer_apply() {
        let genesis = Cursor::genesis(Vec::new());
        let (current, applied) = build(&genesis, &["x", "bad-after-x", "z"]);
        let x = Arc::clone(&applied[0]);

        let rollback = filter_actions(&genesis, &current, push, |a| !Arc::ptr_eq(a, &x));

        assert_eq!(rollback.cursor.state(), &vec!["z"]);
        assert_eq!(rollback.dropped.len(), 1);
        assert_eq!(*rollback.dropped[0].0, "bad-after-x");
    }

    #[test]
    fn test_filter_with_lost_anchor_starts_at_genesis() {
        let genesis = Cursor::genesis(Vec::new());
        let (current, applied) = build(&genesis, &["a", "x"]);
        let (unrelated, _) = build(&genesis, &["other"]);
        let x = Arc::clone(&applied[1]);

        let rollback = filter_actions(&unrelated, &current, push, |a| !Arc::ptr_eq(a, &x));

        assert!(rollback.anchor_lost);
        assert_eq!(rollback.cursor.state(), &vec!["a"]);
    }

    #[test]
    fn test_long_history_drops_without_overflow() {
        let mut cursor = Cursor::genesis(0u64);
        for n in 0..200_000u64 {
            cursor = Cursor::advance(&cursor, Arc::new(n), n);
        }
        assert_eq!(*cursor.state(), 199_999);
        drop(cursor);
    }
}
