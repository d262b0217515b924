//! Agendas driven by futures, streams and the async scheduler.

use std::time::Duration;

use agenda_dispatch::testing::RecordingSink;
use agenda_dispatch::{
    Action, Agenda, Engine, EngineConfig, EngineError, EngineOptions, Input, ReduceError,
    SchedulerKind, StateStream, Step,
};
use tokio::time::timeout;
use tokio_stream::StreamExt;

#[derive(Action, Clone, Debug, PartialEq)]
enum Net {
    Loaded(u32),
    Reset,
}

fn total(state: &u32, step: Step<'_, Net>) -> Result<u32, ReduceError> {
    match step {
        Step::Init => Ok(*state),
        Step::Apply(Net::Loaded(n)) => Ok(state + n),
        Step::Apply(Net::Reset) => Ok(0),
    }
}

async fn next_state(updates: &mut StateStream<u32>) -> u32 {
    timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("timed out waiting for a state")
        .expect("store stream ended")
}

#[tokio::test]
async fn test_deferred_input_resolves() {
    let engine = Engine::default();
    let store = engine.reduce(total, 0).unwrap();
    let mut updates = store.updates();
    assert_eq!(next_state(&mut updates).await, 0);

    engine
        .next(Input::deferred(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, String>(Net::Loaded(42))
        }))
        .unwrap();

    assert_eq!(next_state(&mut updates).await, 42);
}

#[tokio::test]
async fn test_stream_agenda_folds_every_item() {
    let engine = Engine::default();
    let store = engine.reduce(total, 0).unwrap();
    let updates = store.updates();

    engine
        .next(Agenda::stream(tokio_stream::iter(vec![
            Net::Loaded(1),
            Net::Loaded(2),
            Net::Loaded(3),
        ])))
        .unwrap();

    let states: Vec<u32> = timeout(Duration::from_secs(5), updates.take(4).collect())
        .await
        .unwrap();
    assert_eq!(states, vec![0, 1, 3, 6]);
}

#[tokio::test]
async fn test_rejected_deferred_rolls_back_its_agenda() {
    let sink = RecordingSink::<Net>::new();
    let engine = Engine::new(EngineOptions::new().with_sink(sink.clone()));
    let store = engine.reduce(total, 0).unwrap();
    let mut updates = store.updates();
    assert_eq!(next_state(&mut updates).await, 0);

    engine.next(Net::Loaded(5)).unwrap();
    assert_eq!(next_state(&mut updates).await, 5);

    engine
        .next(Agenda::concat([
            Agenda::of(Net::Loaded(10)),
            Agenda::deferred(async { Err::<Net, _>("request timed out") }),
        ]))
        .unwrap();

    assert_eq!(next_state(&mut updates).await, 15);
    assert_eq!(next_state(&mut updates).await, 5);
    assert_eq!(sink.reverts(), vec![vec![Net::Loaded(10)]]);
    assert!(store.is_connected());
}

#[tokio::test]
async fn test_failing_stream_keeps_interleaved_actions() {
    let engine = Engine::default();
    let store = engine.reduce(total, 0).unwrap();
    let mut updates = store.updates();
    assert_eq!(next_state(&mut updates).await, 0);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Net, String>>();
    engine
        .next(Agenda::try_stream(
            tokio_stream::wrappers::UnboundedReceiverStream::new(rx),
        ))
        .unwrap();

    tx.send(Ok(Net::Loaded(100))).unwrap();
    assert_eq!(next_state(&mut updates).await, 100);

    engine.next(Net::Loaded(1)).unwrap();
    assert_eq!(next_state(&mut updates).await, 101);

    tx.send(Err("socket closed".to_string())).unwrap();
    assert_eq!(next_state(&mut updates).await, 1);
    assert_eq!(store.state(), 1);
}

#[tokio::test]
async fn test_async_scheduler_from_config() {
    let config = EngineConfig::from_json(r#"{ "scheduler": "async", "logging": "stores" }"#)
        .unwrap();
    assert_eq!(config.scheduler, SchedulerKind::Async);

    let engine = Engine::new(EngineOptions::from_config(&config).unwrap());
    let store = engine.reduce(total, 0).unwrap();
    let mut updates = store.updates();
    assert_eq!(next_state(&mut updates).await, 0);

    engine.next(vec![Net::Loaded(2), Net::Loaded(3)]).unwrap();
    engine.next(Net::Reset).unwrap();

    assert_eq!(next_state(&mut updates).await, 2);
    assert_eq!(next_state(&mut updates).await, 5);
    assert_eq!(next_state(&mut updates).await, 0);
}

#[test]
fn test_async_input_needs_runtime() {
    let engine = Engine::default();
    let _store = engine.reduce(total, 0).unwrap();

    let err = engine
        .next(Agenda::stream(tokio_stream::iter(vec![Net::Reset])))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoRuntime));
}
