use std::sync::Arc;
use std::time::{Duration, Instant};
use warden::config::WardenConfig;
use warden::process::{ProcessId, ProcessRecord, ProcessStatus, Supervisor};
use warden::state::{MemoryStore, Store};

fn create_test_supervisor() -> Supervisor {
    let config = WardenConfig {
        restart_delay_ms: 20,
        restart_retry_delay_ms: 10,
        restart_settle_ms: 10,
        ..WardenConfig::default()
    };
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    Supervisor::new(store, &config)
}

async fn wait_for<F>(supervisor: &Supervisor, id: ProcessId, check: F) -> ProcessRecord
where
    F: Fn(&ProcessRecord) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let record = supervisor.get(id).unwrap();
        if check(&record) {
            return record;
        }
        assert!(Instant::now() < deadline, "timed out, last state: {:?}", record);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_start_stop_delete_scenario() {
    let supervisor = create_test_supervisor();

    let record = supervisor.start("w", "sleep 100").await.unwrap();
    assert_eq!(record.status, ProcessStatus::Running);
    assert!(record.pid.is_some());
    assert_eq!(record.restart_attempts, 0);

    let stopped = supervisor.stop(record.id).await.unwrap();
    assert_eq!(stopped.status, ProcessStatus::Stopped);
    assert_eq!(stopped.pid, None);
    assert_eq!(supervisor.handle_count(), 0);

    let deleted = supervisor.delete(record.id).await.unwrap();
    assert!(deleted.is_some());

    let err = supervisor.get(record.id).unwrap_err();
    assert!(err.is_not_found());
    assert!(supervisor.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_crash_loop_scenario() {
    let supervisor = create_test_supervisor();

    let record = supervisor.start("flaky", "exit 1").await.unwrap();

    let exhausted = wait_for(&supervisor, record.id, |r| {
        r.status == ProcessStatus::Crashed && r.restart_attempts == 3
    })
    .await;
    assert_eq!(exhausted.pid, None);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let final_state = supervisor.get(record.id).unwrap();
    assert_eq!(final_state.status, ProcessStatus::Crashed);
    assert_eq!(final_state.restart_attempts, 3);
}

#[tokio::test]
async fn test_manual_restart_after_crash_loop() {
    let supervisor = create_test_supervisor();
    let record = supervisor.start("flaky", "exit 1").await.unwrap();

    wait_for(&supervisor, record.id, |r| {
        r.status == ProcessStatus::Crashed && r.restart_attempts == 3
    })
    .await;

    // An operator restart still works past the automatic cap
    let restarted = supervisor.restart(record.id).await.unwrap();
    assert_eq!(restarted.restart_attempts, 4);

    let crashed = wait_for(&supervisor, record.id, |r| r.status == ProcessStatus::Crashed).await;
    assert_eq!(crashed.restart_attempts, 4);
}

#[tokio::test]
async fn test_output_does_not_affect_lifecycle() {
    let supervisor = create_test_supervisor();

    let record = supervisor
        .start("chatty", "for i in 1 2 3; do echo line $i; echo oops $i >&2; done")
        .await
        .unwrap();

    let finished = wait_for(&supervisor, record.id, |r| r.status == ProcessStatus::Stopped).await;
    assert_eq!(finished.restart_attempts, 0);
}

#[tokio::test]
async fn test_concurrent_operations_on_one_id() {
    let supervisor = create_test_supervisor();
    let record = supervisor.start("w", "sleep 100").await.unwrap();

    let (stop, restart) = tokio::join!(supervisor.stop(record.id), supervisor.restart(record.id));
    assert!(stop.is_ok());
    assert!(restart.is_ok());

    // Whatever order won, the record and the handle table agree
    let current = supervisor.get(record.id).unwrap();
    assert_eq!(current.pid.is_some(), current.is_running());
    assert_eq!(supervisor.has_handle(record.id), current.is_running());

    supervisor.stop(record.id).await.unwrap();
    assert_eq!(supervisor.handle_count(), 0);
}
