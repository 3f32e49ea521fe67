mod support;

use std::sync::Arc;
use std::time::Duration;

use reqcycle::config::EngineConfig;
use reqcycle::engine::{DuplicatePolicy, ExecutionEngine, InFlightRegistry};
use reqcycle::error::{CancelReason, ErrorKind};
use reqcycle::request::{Request, RequestDescriptor};
use support::{Event, EventLog, PAYLOAD, ScriptedTransport, engine};
use tokio::sync::Semaphore;

fn detail_list() -> Request {
    Request::new(RequestDescriptor::get("/detail/list").with_parameter("id", 42))
}

fn gated() -> (Arc<Semaphore>, Arc<ScriptedTransport>) {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(ScriptedTransport::new().with_gate(gate.clone()));
    (gate, transport)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_allowed_runs_identical_requests_independently() {
    let (gate, transport) = gated();
    let engine = engine(&transport, EngineConfig::default());
    let mut log = EventLog::new();

    let first = detail_list();
    let second = detail_list();
    engine.start_with(&first, log.callbacks("first")).unwrap();
    engine.start_with(&second, log.callbacks("second")).unwrap();
    transport.wait_for_calls(2).await;
    assert_eq!(engine.registry().running_count(&first.identifier()), 2);

    gate.add_permits(2);
    let mut terminals = vec![log.next().await, log.next().await];
    terminals.sort_by_key(|r| r.tag);
    assert_eq!(terminals[0].tag, "first");
    assert_eq!(terminals[0].event, Event::Success(PAYLOAD.into()));
    assert_eq!(terminals[1].tag, "second");
    assert_eq!(terminals[1].event, Event::Success(PAYLOAD.into()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_wins_rejects_the_second_start_synchronously() {
    let (gate, transport) = gated();
    let engine = engine(
        &transport,
        EngineConfig::new().with_duplicate_policy(DuplicatePolicy::FirstWins),
    );
    let mut log = EventLog::new();

    let first = detail_list();
    engine.start_with(&first, log.callbacks("first")).unwrap();

    let second = detail_list();
    let err = engine
        .start_with(&second, log.callbacks("second"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateSuppressed);
    assert!(!second.is_executing());

    gate.add_permits(1);
    let recorded = log.next().await;
    assert_eq!(recorded.tag, "first");
    assert_eq!(recorded.event, Event::Success(PAYLOAD.into()));
    log.assert_quiet(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 1);

    // once the first settled the identifier is free again
    gate.add_permits(1);
    engine.start_with(&second, log.callbacks("second")).unwrap();
    assert_eq!(
        log.until_terminal("second").await,
        vec![Event::Success(PAYLOAD.into())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_wins_cancels_the_predecessor_before_the_successor_finishes() {
    let (gate, transport) = gated();
    let engine = engine(&transport, EngineConfig::default());
    let mut log = EventLog::new();

    let first = detail_list().with_duplicate_policy(DuplicatePolicy::LastWins);
    let second = detail_list().with_duplicate_policy(DuplicatePolicy::LastWins);
    engine.start_with(&first, log.callbacks("first")).unwrap();
    transport.wait_for_calls(1).await;

    engine.start_with(&second, log.callbacks("second")).unwrap();
    gate.add_permits(1);

    let a = log.next().await;
    let b = log.next().await;
    assert_eq!((a.tag, a.event), ("first", Event::Cancelled(CancelReason::Superseded)));
    assert_eq!((b.tag, b.event), ("second", Event::Success(PAYLOAD.into())));
    log.assert_quiet(Duration::from_millis(100)).await;

    support::wait_until(|| engine.registry().is_empty()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_wins_on_one_request_keeps_its_callbacks_for_the_successor() {
    let (gate, transport) = gated();
    let engine = engine(
        &transport,
        EngineConfig::new().with_duplicate_policy(DuplicatePolicy::LastWins),
    );
    let mut log = EventLog::new();

    let request = detail_list();
    engine.start_with(&request, log.callbacks("req")).unwrap();
    transport.wait_for_calls(1).await;
    engine.start(&request).unwrap();
    gate.add_permits(1);

    assert_eq!(
        log.until_terminal("req").await,
        vec![Event::Cancelled(CancelReason::Superseded)]
    );
    assert_eq!(
        log.until_terminal("req").await,
        vec![Event::Success(PAYLOAD.into())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engines_sharing_a_registry_see_each_others_duplicates() {
    let registry = Arc::new(InFlightRegistry::new());
    let (gate, transport) = gated();
    let build = || {
        ExecutionEngine::builder()
            .config(EngineConfig::new().with_duplicate_policy(DuplicatePolicy::FirstWins))
            .transport(transport.clone())
            .registry(registry.clone())
            .build()
            .unwrap()
    };
    let (a, b) = (build(), build());

    a.start(&detail_list()).unwrap();
    let err = b.start(&detail_list()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateSuppressed);

    gate.add_permits(1);
    support::wait_until(|| registry.is_empty()).await;
}
