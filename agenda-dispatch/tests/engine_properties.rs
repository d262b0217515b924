//! Behavioral properties of the engine: registration, ordering, rollback
//! isolation and distinctness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use agenda_dispatch::testing::{RecordingSink, StateRecorder};
use agenda_dispatch::{
    assert_states, Action, Agenda, Engine, EngineOptions, ImmediateScheduler, Input, ReduceError,
    Step, Store, ThunkContext,
};

#[derive(Action, Clone, Debug, PartialEq)]
enum Op {
    Inc,
    Boom,
    Set(i64),
    Append(&'static str),
    #[action(noop)]
    Nothing,
}

fn counter(state: &i64, step: Step<'_, Op>) -> Result<i64, ReduceError> {
    match step {
        Step::Init => Ok(*state),
        Step::Apply(Op::Inc) => Ok(state + 1),
        Step::Apply(Op::Boom) => Err(ReduceError::new("boom")),
        Step::Apply(Op::Set(n)) => Ok(*n),
        Step::Apply(_) => Ok(*state),
    }
}

fn log(state: &Vec<&'static str>, step: Step<'_, Op>) -> Result<Vec<&'static str>, ReduceError> {
    match step {
        Step::Init => Ok(state.clone()),
        Step::Apply(Op::Append("x-fail")) => Err(ReduceError::new("x failed")),
        Step::Apply(Op::Append(entry)) => {
            let mut next = state.clone();
            next.push(entry);
            Ok(next)
        }
        Step::Apply(_) => Ok(state.clone()),
    }
}

static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);

fn counted_init(state: &u64, step: Step<'_, Op>) -> Result<u64, ReduceError> {
    if step.is_init() {
        INIT_CALLS.fetch_add(1, Ordering::SeqCst);
        return Ok(state * 10);
    }
    Ok(*state)
}

fn entries(store: &Store<Vec<&'static str>, Op>) -> Vec<&'static str> {
    let mut actions: Vec<&'static str> = store
        .cursor()
        .iter()
        .filter_map(|cursor| match cursor.action().map(|a| (**a).clone()) {
            Some(Op::Append(entry)) => Some(entry),
            _ => None,
        })
        .collect();
    actions.reverse();
    actions
}

#[test]
fn test_end_to_end_scenario() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();
    let recorder = StateRecorder::new(&store);

    engine.next(Op::Inc).unwrap();
    engine.next(vec![Op::Inc, Op::Boom]).unwrap();
    engine.next(Op::Inc).unwrap();

    assert_states!(recorder, [0, 1, 2, 1, 2]);
    assert_eq!(store.state(), 2);
    assert_eq!(recorder.states().iter().max(), Some(&2));
}

#[test]
fn test_idempotent_registration() {
    let engine = Engine::default();
    let first = engine.reduce(counter, 0).unwrap();
    engine.next(vec![Op::Inc, Op::Inc]).unwrap();

    let second = engine.reduce(counter, 100).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(second.state(), 2);
    assert_eq!(second.cursor().depth(), 3);
    assert_eq!(engine.store_count(), 1);
}

#[test]
fn test_local_ordering_with_duplicates_removed() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();
    let recorder = StateRecorder::new(&store);

    engine
        .next(vec![Op::Set(3), Op::Set(3), Op::Inc, Op::Nothing, Op::Set(7)])
        .unwrap();

    assert_states!(recorder, [0, 3, 4, 7]);
}

#[test]
fn test_rollback_isolation_x_then_y() {
    let engine = Engine::default();
    let store = engine.reduce_default(log).unwrap();
    let (x, x_agenda) = Agenda::channel();
    let (y, y_agenda) = Agenda::channel();
    engine.next(x_agenda).unwrap();
    engine.next(y_agenda).unwrap();

    x.send(Op::Append("x1"));
    y.send(Op::Append("y1"));
    x.send(Op::Append("x-fail"));
    y.close();

    assert_eq!(store.state(), vec!["y1"]);
    assert_eq!(entries(&store), vec!["y1"]);
    assert_eq!(store.inflight_agendas(), 0);
}

#[test]
fn test_rollback_isolation_y_then_x() {
    let engine = Engine::default();
    let store = engine.reduce_default(log).unwrap();
    let (x, x_agenda) = Agenda::channel();
    let (y, y_agenda) = Agenda::channel();
    engine.next(x_agenda).unwrap();
    engine.next(y_agenda).unwrap();

    y.send(Op::Append("y1"));
    x.send(Op::Append("x1"));
    y.send(Op::Append("y2"));
    x.fail("upstream closed");

    assert_eq!(store.state(), vec!["y1", "y2"]);
    assert_eq!(entries(&store), vec!["y1", "y2"]);
}

#[test]
fn test_overlapping_rollbacks() {
    let engine = Engine::default();
    let store = engine.reduce_default(log).unwrap();
    let recorder = StateRecorder::new(&store);
    let (x, x_agenda) = Agenda::channel();
    let (y, y_agenda) = Agenda::channel();
    let (z, z_agenda) = Agenda::channel();
    engine.next(x_agenda).unwrap();
    engine.next(y_agenda).unwrap();
    engine.next(z_agenda).unwrap();

    x.send(Op::Append("x1"));
    y.send(Op::Append("y1"));
    z.send(Op::Append("z1"));
    x.fail("x dropped");
    // Y's anchor was replaced by X's rollback.
    y.fail("y dropped");
    z.close();

    let expected: [Vec<&str>; 6] = [
        vec![],
        vec!["x1"],
        vec!["x1", "y1"],
        vec!["x1", "y1", "z1"],
        vec!["y1", "z1"],
        vec!["z1"],
    ];
    assert_states!(recorder, expected);
    assert_eq!(store.state(), vec!["z1"]);
    assert_eq!(entries(&store), vec!["z1"]);
    assert_eq!(store.inflight_agendas(), 0);
}

#[test]
fn test_late_subscriber_ends_on_latest_state() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (started_tx, started_rx) = mpsc::channel();

    let subscriber = {
        let store = store.clone();
        let seen = Arc::clone(&seen);
        thread::spawn(move || {
            store.subscribe(move |state: &i64| {
                let mut seen = seen.lock().unwrap();
                if seen.is_empty() {
                    let _ = started_tx.send(());
                    thread::sleep(Duration::from_millis(100));
                }
                seen.push(*state);
            })
        })
    };

    started_rx.recv().unwrap();
    engine.next(Op::Inc).unwrap();
    let _sub = subscriber.join().unwrap();

    assert_eq!(store.state(), 1);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
}

#[test]
fn test_rollback_reports_to_sink() {
    let sink = RecordingSink::<Op>::new();
    let engine = Engine::new(EngineOptions::new().with_sink(sink.clone()));
    let _store = engine.reduce_default(log).unwrap();

    engine.next(vec![Op::Append("a"), Op::Append("x-fail")]).unwrap();

    assert_eq!(sink.changes(), vec![Op::Append("a")]);
    assert_eq!(sink.reverts(), vec![vec![Op::Append("a")]]);
}

#[test]
fn test_store_survives_fold_errors() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();

    for _ in 0..3 {
        engine.next(vec![Op::Inc, Op::Boom]).unwrap();
        engine.next(Op::Inc).unwrap();
    }

    assert!(store.is_connected());
    assert_eq!(store.state(), 3);
    assert_eq!(store.inflight_agendas(), 0);
}

#[test]
fn test_initialization_runs_once_under_contention() {
    let engine = Engine::<Op>::default();
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let engine = engine.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.reduce(counted_init, n + 1).unwrap()
            })
        })
        .collect();
    let stores: Vec<_> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert_eq!(INIT_CALLS.load(Ordering::SeqCst), 1);
    assert!(stores.iter().all(|store| store.ptr_eq(&stores[0])));
    assert_eq!(stores[0].state() % 10, 0);
}

#[test]
fn test_distinct_states_are_not_reemitted() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();
    let recorder = StateRecorder::new(&store);

    engine.next(Op::Set(0)).unwrap();
    engine.next(Op::Append("ignored")).unwrap();
    engine.next(Op::Set(5)).unwrap();
    engine.next(Op::Set(5)).unwrap();

    assert_states!(recorder, [0, 5]);
}

#[test]
fn test_stores_share_agenda_traffic() {
    let engine = Engine::new(EngineOptions::new().with_scheduler(ImmediateScheduler));
    let numbers = engine.reduce(counter, 0).unwrap();
    let journal = engine.reduce_default(log).unwrap();

    engine.next(vec![Op::Inc, Op::Append("a"), Op::Inc]).unwrap();
    engine.next(vec![Op::Append("b"), Op::Boom]).unwrap();

    assert_eq!(numbers.state(), 2);
    assert_eq!(numbers.cursor().depth(), 4);
    // `Boom` is harmless for the log store, so its agenda stays.
    assert_eq!(journal.state(), vec!["a", "b"]);
}

#[test]
fn test_thunk_input() {
    let engine = Engine::default();
    let store = engine.reduce(counter, 0).unwrap();

    engine
        .next(Input::thunk(|ctx: &ThunkContext<Op>| {
            ctx.emit(Op::Inc);
            let current = ctx.fold(counter, 0).unwrap().state();
            Some(Agenda::of(Op::Set(current * 10)))
        }))
        .unwrap();

    assert_eq!(store.state(), 10);
}
