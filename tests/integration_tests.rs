//! End-to-end scenarios: a real dispatcher with real runners over TCP.


use std::time::Duration;

use ci_lite::protocol::{Request, Response};
use ci_lite::scheduler::{CommitStatus, Runner};
use test_harness::{
    raw_exchange, wait_until, FakeBehavior, FakeRunner, StubExecutor, TestDispatcher, TestRunner,
};

const WAIT: Duration = Duration::from_secs(5);

async fn dispatched_to(dispatcher: &TestDispatcher, commit_id: &str) -> Option<Runner> {
    dispatcher
        .state
        .ledger
        .read()
        .await
        .dispatched_to(commit_id)
        .cloned()
}

#[tokio::test]
async fn test_dispatch_with_empty_registry() {
    let dispatcher = TestDispatcher::start().await;

    assert_eq!(dispatcher.dispatch("abc123").await, Response::NoRunners);
    assert_eq!(dispatcher.state.ledger.read().await.status("abc123"), None);
}

#[tokio::test]
async fn test_commit_runs_and_result_is_stored() {
    let dispatcher = TestDispatcher::start().await;
    let executor = StubExecutor::new("Ran 1 test\n\nOK\n", Duration::from_millis(50));
    let runner = TestRunner::start(&dispatcher.addr, executor.clone()).await;

    assert_eq!(dispatcher.dispatch("abc123").await, Response::Ok);

    let stored = wait_until(WAIT, || async {
        dispatcher.results.read("abc123").await.unwrap().is_some()
    })
    .await;
    assert!(stored, "result for abc123 should be written");

    assert_eq!(executor.runs(), vec!["abc123".to_string()]);
    assert_eq!(
        dispatcher.results.read("abc123").await.unwrap().as_deref(),
        Some("Ran 1 test\n\nOK\n")
    );
    let file = dispatcher.results.dir().join("abc123");
    assert_eq!(std::fs::read_to_string(file).unwrap(), "Ran 1 test\n\nOK\n");

    assert!(
        wait_until(WAIT, || async {
            dispatcher.state.ledger.read().await.status("abc123") == Some(CommitStatus::Completed)
        })
        .await
    );
    assert!(!runner.gate.is_busy());
}

#[tokio::test]
async fn test_dead_runner_work_moves_to_healthy_runner() {
    let dispatcher = TestDispatcher::start().await;
    let slow = TestRunner::start(
        &dispatcher.addr,
        StubExecutor::new("never delivered", Duration::from_secs(30)),
    )
    .await;

    assert_eq!(dispatcher.dispatch("c1").await, Response::Ok);
    assert!(
        wait_until(WAIT, || async {
            dispatched_to(&dispatcher, "c1").await == Some(slow.runner.clone())
        })
        .await
    );

    let healthy_executor = StubExecutor::new("rerun ok", Duration::from_millis(20));
    let healthy = TestRunner::start(&dispatcher.addr, healthy_executor.clone()).await;
    slow.stop().await;

    let moved = wait_until(WAIT, || async {
        dispatched_to(&dispatcher, "c1").await == Some(healthy.runner.clone())
            || dispatcher.results.read("c1").await.unwrap().is_some()
    })
    .await;
    assert!(moved, "c1 should be placed on the healthy runner");

    assert!(
        wait_until(WAIT, || async {
            dispatcher.results.read("c1").await.unwrap().is_some()
        })
        .await
    );
    assert_eq!(
        dispatcher.results.read("c1").await.unwrap().as_deref(),
        Some("rerun ok")
    );
    assert_eq!(dispatcher.state.runners().await, vec![healthy.runner.clone()]);
    assert_eq!(healthy_executor.runs(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn test_busy_runner_is_passed_over() {
    let dispatcher = TestDispatcher::start().await;
    let first = TestRunner::start(
        &dispatcher.addr,
        StubExecutor::new("first", Duration::from_secs(2)),
    )
    .await;
    let second_executor = StubExecutor::new("second", Duration::from_millis(20));
    let second = TestRunner::start(&dispatcher.addr, second_executor.clone()).await;

    assert_eq!(dispatcher.dispatch("c1").await, Response::Ok);
    assert!(wait_until(WAIT, || async { first.gate.is_busy() }).await);

    assert_eq!(dispatcher.dispatch("c2").await, Response::Ok);
    assert!(
        wait_until(WAIT, || async {
            dispatcher.results.read("c2").await.unwrap().is_some()
        })
        .await
    );

    assert_eq!(first.executor.runs(), vec!["c1".to_string()]);
    assert_eq!(second_executor.runs(), vec!["c2".to_string()]);
    assert!(second.lease.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_commits_queue_until_runner_is_free() {
    let dispatcher = TestDispatcher::start().await;
    let executor = StubExecutor::new("done", Duration::from_millis(100));
    let _runner = TestRunner::start(&dispatcher.addr, executor.clone()).await;

    for commit_id in ["c1", "c2", "c3"] {
        assert_eq!(dispatcher.dispatch(commit_id).await, Response::Ok);
    }

    let all_stored = wait_until(WAIT, || async {
        for commit_id in ["c1", "c2", "c3"] {
            if dispatcher.results.read(commit_id).await.unwrap().is_none() {
                return false;
            }
        }
        true
    })
    .await;
    assert!(all_stored);

    let mut runs = executor.runs();
    runs.sort();
    assert_eq!(runs, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn test_repeated_dispatch_is_idempotent() {
    let dispatcher = TestDispatcher::start().await;
    let fake = FakeRunner::start(FakeBehavior::Busy).await;
    let register = format!("register:{}:{}", fake.runner.host, fake.runner.port);
    assert_eq!(raw_exchange(&dispatcher.addr, register.as_bytes()).await, "ok");

    assert_eq!(dispatcher.dispatch("c1").await, Response::Ok);
    assert_eq!(dispatcher.dispatch("c1").await, Response::Ok);

    assert_eq!(dispatcher.state.pending().await, vec!["c1".to_string()]);
}

#[tokio::test]
async fn test_reregistered_runner_gets_its_work_again() {
    let dispatcher = TestDispatcher::start().await;
    let fake = FakeRunner::start(FakeBehavior::Accept).await;
    let register = format!("register:{}:{}", fake.runner.host, fake.runner.port);
    assert_eq!(raw_exchange(&dispatcher.addr, register.as_bytes()).await, "ok");

    assert_eq!(dispatcher.dispatch("c1").await, Response::Ok);
    assert!(
        wait_until(WAIT, || async {
            dispatched_to(&dispatcher, "c1").await == Some(fake.runner.clone())
        })
        .await
    );
    assert_eq!(fake.runtests().len(), 1);

    // The runner restarted and lost the commit it was working on.
    assert_eq!(raw_exchange(&dispatcher.addr, register.as_bytes()).await, "ok");

    assert!(wait_until(WAIT, || async { fake.runtests().len() == 2 }).await);
    assert_eq!(dispatcher.state.runners().await.len(), 1);
    assert!(
        wait_until(WAIT, || async {
            dispatched_to(&dispatcher, "c1").await == Some(fake.runner.clone())
        })
        .await
    );
}

#[tokio::test]
async fn test_result_before_acknowledgement_completes_commit() {
    let dispatcher = TestDispatcher::start().await;
    let fake = FakeRunner::start_reporting(&dispatcher.addr).await;
    let register = format!("register:{}:{}", fake.runner.host, fake.runner.port);
    assert_eq!(raw_exchange(&dispatcher.addr, register.as_bytes()).await, "ok");

    assert_eq!(dispatcher.dispatch("abc123").await, Response::Ok);

    assert!(
        wait_until(WAIT, || async {
            dispatcher.state.ledger.read().await.status("abc123") == Some(CommitStatus::Completed)
        })
        .await
    );
    assert_eq!(dispatched_to(&dispatcher, "abc123").await, None);
    assert!(dispatcher.state.pending().await.is_empty());
    assert_eq!(
        dispatcher.results.read("abc123").await.unwrap().as_deref(),
        Some("done")
    );

    // Nothing is left for the redistributor to re-run.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(fake.runtests(), vec!["abc123".to_string()]);
}

#[tokio::test]
async fn test_latest_result_wins() {
    let dispatcher = TestDispatcher::start().await;

    for payload in ["first run", "second run"] {
        let response = dispatcher
            .request(Request::Result {
                commit_id: "abc123".to_string(),
                payload: payload.to_string(),
            })
            .await;
        assert_eq!(response, Response::Ok);
    }

    assert_eq!(
        dispatcher.results.read("abc123").await.unwrap().as_deref(),
        Some("second run")
    );
}

#[tokio::test]
async fn test_result_with_unsafe_commit_id_is_rejected() {
    let dispatcher = TestDispatcher::start().await;

    let reply = raw_exchange(&dispatcher.addr, b"result:..:2:hi").await;
    assert_eq!(reply, "Invalid command");
}
