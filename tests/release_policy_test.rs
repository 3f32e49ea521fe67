mod support;

use std::sync::Arc;
use std::time::Duration;

use reqcycle::config::EngineConfig;
use reqcycle::engine::ReleasePolicy;
use reqcycle::request::Request;
use support::{Event, EventLog, PAYLOAD, ScriptedTransport, engine};
use tokio::sync::Semaphore;

fn gated() -> (Arc<Semaphore>, Arc<ScriptedTransport>) {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(ScriptedTransport::new().with_gate(gate.clone()));
    (gate, transport)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_request_completes_after_the_caller_drops_it() {
    let (gate, transport) = gated();
    let engine = engine(&transport, EngineConfig::default());
    let mut log = EventLog::new();

    let request = Request::get("https://api.example.com/a");
    engine.start_with(&request, log.callbacks("req")).unwrap();
    drop(request);
    transport.wait_for_calls(1).await;

    gate.add_permits(1);
    assert_eq!(
        log.until_terminal("req").await,
        vec![Event::Success(PAYLOAD.into())]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unheld_request_is_cancelled_silently_when_dropped() {
    let (gate, transport) = gated();
    let engine = engine(
        &transport,
        EngineConfig::new().with_release_policy(ReleasePolicy::NoHold),
    );
    let mut log = EventLog::new();

    let request = Request::get("https://api.example.com/a");
    engine.start_with(&request, log.callbacks("req")).unwrap();
    transport.wait_for_calls(1).await;
    assert_eq!(engine.registry().len(), 1);

    drop(request);
    support::wait_until(|| engine.registry().is_empty()).await;

    gate.add_permits(1);
    log.assert_quiet(Duration::from_millis(150)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn per_request_policy_overrides_the_engine_default() {
    let (gate, transport) = gated();
    let engine = engine(&transport, EngineConfig::default());
    let mut log = EventLog::new();

    let request =
        Request::get("https://api.example.com/a").with_release_policy(ReleasePolicy::NoHold);
    engine.start_with(&request, log.callbacks("req")).unwrap();
    transport.wait_for_calls(1).await;
    drop(request);

    gate.add_permits(1);
    support::wait_until(|| engine.registry().is_empty()).await;
    log.assert_quiet(Duration::from_millis(150)).await;
}
