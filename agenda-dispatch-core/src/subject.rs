//! Observer-list primitives
//!
//! [`Subject`] is a hot multicast: a map from subscriber id to callback,
//! notified in subscription order. [`ReplaySubject`] additionally retains the
//! latest value, hands it to new subscribers before anything else, and
//! suppresses consecutive duplicates.
//!
//! Neither type holds its observer lock while calling observers, so an
//! observer may subscribe, unsubscribe or emit re-entrantly. A
//! [`ReplaySubject`] does hold a reentrant delivery lock across each replay
//! and each emission, so a late subscriber never receives the replayed value
//! after a newer one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use parking_lot::ReentrantMutex;

use crate::lock;

/// Shared observer callback.
pub type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle to an active subscription.
///
/// Dropping the handle unsubscribes. Call [`Subscription::detach`] to keep
/// the observer registered for as long as its source lives.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a subscription that runs `teardown` when unsubscribed.
    pub fn new(teardown: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self { teardown: None }
    }

    /// Unsubscribe now.
    pub fn unsubscribe(mut self) {
        self.run_teardown();
    }

    /// Keep the observer registered and discard the handle.
    pub fn detach(mut self) {
        self.teardown = None;
    }

    /// Whether this handle still owns a registration.
    pub fn is_active(&self) -> bool {
        self.teardown.is_some()
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Observer callbacks keyed by subscription id, in subscription order.
pub(crate) struct Observers<T> {
    next_id: u64,
    entries: BTreeMap<u64, Observer<T>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl<T> Observers<T> {
    pub(crate) fn insert(&mut self, observer: Observer<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, observer);
        id
    }

    pub(crate) fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clone the callbacks so they can be invoked without holding a lock.
    pub(crate) fn snapshot(&self) -> Vec<Observer<T>> {
        self.entries.values().cloned().collect()
    }
}

/// Hot multicast channel without history.
pub struct Subject<T> {
    observers: Arc<Mutex<Observers<T>>>,
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            observers: Arc::clone(&self.observers),
        }
    }
}

impl<T> Default for Subject<T> {
    fn default() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Observers::default())),
        }
    }
}

impl<T: 'static> Subject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for every value emitted from now on.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = lock(&self.observers).insert(Arc::new(observer));
        unsubscriber(Arc::downgrade(&self.observers), id)
    }

    /// Emit a value to every current observer.
    pub fn next(&self, value: &T) {
        let observers = lock(&self.observers).snapshot();
        for observer in observers {
            observer(value);
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }
}

fn unsubscriber<T: 'static>(observers: Weak<Mutex<Observers<T>>>, id: u64) -> Subscription {
    Subscription::new(move || {
        if let Some(observers) = observers.upgrade() {
            lock(&observers).remove(id);
        }
    })
}

struct ReplayState<T> {
    latest: T,
    observers: Observers<T>,
}

/// Multicast that replays its latest value and drops consecutive duplicates.
pub struct ReplaySubject<T> {
    state: Arc<Mutex<ReplayState<T>>>,
    delivery: Arc<ReentrantMutex<()>>,
}

impl<T> Clone for ReplaySubject<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            delivery: Arc::clone(&self.delivery),
        }
    }
}

impl<T> ReplaySubject<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a subject whose latest value is `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(ReplayState {
                latest: initial,
                observers: Observers::default(),
            })),
            delivery: Arc::new(ReentrantMutex::new(())),
        }
    }

    /// The latest value.
    pub fn latest(&self) -> T {
        lock(&self.state).latest.clone()
    }

    /// Emit `value` unless it equals the latest value.
    ///
    /// Returns whether observers were notified.
    pub fn next(&self, value: T) -> bool {
        let _delivery = self.delivery.lock();
        let observers = {
            let mut state = lock(&self.state);
            if state.latest == value {
                return false;
            }
            state.latest = value.clone();
            state.observers.snapshot()
        };
        for observer in observers {
            observer(&value);
        }
        true
    }

    /// Register an observer; it immediately receives the latest value.
    pub fn subscribe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let observer: Observer<T> = Arc::new(observer);
        let delivery = self.delivery.lock();
        let (id, latest) = {
            let mut state = lock(&self.state);
            let id = state.observers.insert(Arc::clone(&observer));
            (id, state.latest.clone())
        };
        observer(&latest);
        drop(delivery);

        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).observers.remove(id);
            }
        })
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        lock(&self.state).observers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v: &T| sink.lock().unwrap().push(v.clone()))
    }

    #[test]
    fn test_subject_multicasts_in_order() {
        let subject = Subject::<u32>::new();
        let (first, f1) = collect();
        let (second, f2) = collect();
        let _s1 = subject.subscribe(f1);
        let _s2 = subject.subscribe(f2);

        subject.next(&1);
        subject.next(&2);

        assert_eq!(*first.lock().unwrap(), vec![1, 2]);
        assert_eq!(*second.lock().unwrap(), vec![1, 2]);
        assert_eq!(subject.observer_count(), 2);
    }

    #[test]
    fn test_subject_has_no_history() {
        let subject = Subject::<u32>::new();
        subject.next(&1);

        let (seen, f) = collect();
        let _sub = subject.subscribe(f);
        subject.next(&2);

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let subject = Subject::<u32>::new();
        let (seen, f) = collect();
        let sub = subject.subscribe(f);
        subject.next(&1);
        drop(sub);
        subject.next(&2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(subject.observer_count(), 0);
    }

    #[test]
    fn test_detach_keeps_observer() {
        let subject = Subject::<u32>::new();
        let (seen, f) = collect();
        subject.subscribe(f).detach();
        subject.next(&5);

        assert_eq!(*seen.lock().unwrap(), vec![5]);
    }

    #[test]
    fn test_reentrant_unsubscribe() {
        let subject = Subject::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(Mutex::new(0));

        let sub = {
            let slot = Arc::clone(&slot);
            let count = Arc::clone(&count);
            subject.subscribe(move |_| {
                *count.lock().unwrap() += 1;
                slot.lock().unwrap().take();
            })
        };
        *slot.lock().unwrap() = Some(sub);

        subject.next(&1);
        subject.next(&2);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_replay_subject_replays_latest() {
        let subject = ReplaySubject::new(0);
        subject.next(1);

        let (seen, f) = collect();
        let _sub = subject.subscribe(f);
        subject.next(2);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(subject.latest(), 2);
    }

    #[test]
    fn test_replay_subject_is_distinct() {
        let subject = ReplaySubject::new(0);
        let (seen, f) = collect();
        let _sub = subject.subscribe(f);

        assert!(subject.next(1));
        assert!(!subject.next(1));
        assert!(subject.next(0));

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 0]);
    }

    #[test]
    fn test_replay_is_delivered_before_concurrent_next() {
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let subject = ReplaySubject::new(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel();

        let subscriber = {
            let subject = subject.clone();
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                subject.subscribe(move |v: &u32| {
                    let mut seen = seen.lock().unwrap();
                    if seen.is_empty() {
                        let _ = started_tx.send(());
                        thread::sleep(Duration::from_millis(100));
                    }
                    seen.push(*v);
                })
            })
        };

        started_rx.recv().unwrap();
        subject.next(1);
        let _sub = subscriber.join().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(subject.latest(), 1);
    }

    #[test]
    fn test_reentrant_next_during_replay() {
        let subject = ReplaySubject::new(0);
        let (seen, f) = collect();
        let _first = subject.subscribe(f);

        let inner = subject.clone();
        let _second = subject.subscribe(move |v: &u32| {
            if *v == 0 {
                inner.next(7);
            }
        });

        assert_eq!(*seen.lock().unwrap(), vec![0, 7]);
        assert_eq!(subject.latest(), 7);
    }
}
