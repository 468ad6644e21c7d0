
use std::time::Duration;

use mtland::broker::Fetched;
use mtland::config::{AdapterConfig, BusyPolicy, IsolationMode};
use test_harness::{assert_eventually, find_job_pid, process_alive, wait_for, TestWorker};

async fn process_worker(delay_ms: u64) -> TestWorker {
    TestWorker::start_with(
        AdapterConfig::Dummy { delay_ms },
        IsolationMode::Process,
        BusyPolicy::Unbounded,
    )
    .await
}

async fn wait_for_pid(request_id: &str) -> u32 {
    let found = wait_for(
        || async { find_job_pid(request_id).is_some() },
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .await;
    assert!(found, "job process for {} never appeared", request_id);
    find_job_pid(request_id).unwrap()
}

#[tokio::test]
async fn test_job_runs_in_child_process() {
    let worker = process_worker(0).await;
    let msg = worker.submit("hello\nworld").await;

    assert!(worker.wait_ready(&msg.request_id).await);
    match worker.proxy.fetch_translation(&msg.request_id).await {
        Fetched::Message(fetched) => {
            assert_eq!(fetched.request_id, msg.request_id);
            assert_eq!(fetched.target_text.as_deref(), Some("HELLO\nWORLD"));
        }
        other => panic!("unexpected fetch result: {:?}", other),
    }

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_delete_kills_running_process() {
    let worker = process_worker(60_000).await;
    let msg = worker.submit("never finishes").await;
    let pid = wait_for_pid(&msg.request_id).await;

    assert!(process_alive(pid));
    assert!(!worker.proxy.is_ready(&msg.request_id).await);
    assert_eq!(
        worker.proxy.fetch_translation(&msg.request_id).await,
        Fetched::NotReady
    );

    assert!(worker.proxy.delete_translation(&msg.request_id).await);
    assert_eventually(
        || async move { !process_alive(pid) },
        Duration::from_secs(5),
        "job process survived delete",
    )
    .await;

    assert!(!worker.proxy.is_valid(&msg.request_id).await);
    assert!(!worker.store.exists(&msg.request_id));
    assert!(worker.proxy.delete_translation(&msg.request_id).await);

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_job_still_becomes_ready() {
    // Moses pointing at a missing binary: the child exits non-zero.
    let worker = TestWorker::start_with(
        AdapterConfig::Moses {
            command: "/nonexistent/moses".into(),
            config: "/nonexistent/moses.ini".into(),
            source_language: "eng".to_string(),
            target_language: "fre".to_string(),
        },
        IsolationMode::Process,
        BusyPolicy::Unbounded,
    )
    .await;
    let msg = worker.submit("hello").await;

    assert!(worker.wait_ready(&msg.request_id).await);
    match worker.proxy.fetch_translation(&msg.request_id).await {
        Fetched::Message(fetched) => assert!(fetched.target_text.is_none()),
        other => panic!("unexpected fetch result: {:?}", other),
    }

    worker.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_worker_kills_jobs_and_exits() {
    let worker = process_worker(60_000).await;
    let msg = worker.submit("stop me").await;
    let pid = wait_for_pid(&msg.request_id).await;

    assert!(worker.proxy.stop_worker().await);
    assert_eventually(
        || async move { !process_alive(pid) },
        Duration::from_secs(5),
        "job process survived stop_worker",
    )
    .await;

    worker.join().await.unwrap();
}
