//! Counter demo
//!
//! Folds a few agendas into two stores: a plain counter and a log of what
//! happened. One agenda fails halfway and is rolled back; the others run
//! alongside it and are kept.
//!
//! Run: RUST_LOG=debug cargo run -p counter

use std::time::Duration;

use agenda_dispatch::prelude::*;
use agenda_dispatch::StateStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Action, Clone, Debug, PartialEq)]
enum Counter {
    Inc,
    Add(i64),
    Boom,
    #[action(noop)]
    Idle,
}

fn count(state: &i64, step: Step<'_, Counter>) -> Result<i64, ReduceError> {
    match step {
        Step::Init => Ok(*state),
        Step::Apply(Counter::Inc) => Ok(state + 1),
        Step::Apply(Counter::Add(n)) => Ok(state + n),
        Step::Apply(Counter::Boom) => Err(ReduceError::new("boom")),
        Step::Apply(Counter::Idle) => Ok(*state),
    }
}

fn journal(state: &Vec<String>, step: Step<'_, Counter>) -> Result<Vec<String>, ReduceError> {
    let mut next = state.clone();
    match step {
        Step::Init => next.push("start".to_string()),
        Step::Apply(action) => next.push(action.name().to_string()),
    }
    Ok(next)
}

async fn wait_for(updates: &mut StateStream<i64>, target: i64) {
    while let Some(state) = updates.recv().await {
        if state == target {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "counter=info,agenda_dispatch_core=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = Engine::new(EngineOptions::new().with_logging(Logging::STORES));
    let counter = engine.reduce(count, 0)?;
    let log = engine.reduce_default(journal)?;
    let _printer = counter.subscribe(|n| tracing::info!(count = n, "Counter changed"));

    engine.next(Counter::Inc)?;
    engine.next(vec![Counter::Inc, Counter::Boom])?;
    engine.next(Counter::Inc)?;
    tracing::info!(count = counter.state(), "After the failing agenda");

    let mut updates = counter.updates();
    let (tx, slow) = Agenda::channel();
    engine.next(slow)?;
    engine.next(Input::deferred(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok::<_, String>(Counter::Add(10))
    }))?;
    engine.next(Agenda::stream(tokio_stream::iter(vec![
        Counter::Idle,
        Counter::Add(100),
    ])))?;

    tx.send(Counter::Add(1000));
    wait_for(&mut updates, 1112).await;
    tx.fail("operator cancelled");
    wait_for(&mut updates, 112).await;

    engine.next(Input::thunk(|ctx: &ThunkContext<Counter>| {
        ctx.emit(Counter::Inc);
        let seen = ctx.fold(count, 0).ok()?.state();
        (seen > 100).then(|| Agenda::of(Counter::Add(-seen)))
    }))?;

    tracing::info!(count = counter.state(), "Final count");
    tracing::info!(entries = ?log.state(), "Journal");
    for (action, state) in counter.history() {
        let name = action.map_or("init", |a| a.name());
        tracing::info!(action = name, state, "History");
    }

    engine.shutdown();
    Ok(())
}
