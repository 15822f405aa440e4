//! Integration tests for the job scheduler.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use train_queue::config::{Config, SchedulerConfig};
use train_queue::gateway::DeviceGateway;
use train_queue::hal::{DeviceCall, MockDevice};
use train_queue::scheduler::RESULT_SUCCESS;
use train_queue::store::{JobStore, JsonFileStore, MemoryStore};
use train_queue::{JobError, JobScheduler, JobUpdate, NewJob, ScheduledJob};

type Gateway = DeviceGateway<MockDevice>;

fn setup() -> (JobScheduler<Gateway, MemoryStore>, Arc<Gateway>) {
    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
    let scheduler = JobScheduler::new(Arc::clone(&gateway), MemoryStore::new(), &Config::default());
    (scheduler, gateway)
}

async fn horns(gateway: &Gateway) -> usize {
    gateway.with_device(|d| d.count(&DeviceCall::Horn)).await
}

// ============================================================================
// Registry
// ============================================================================

#[tokio::test]
async fn create_rejects_bad_cron_without_persisting() {
    let (scheduler, _gateway) = setup();

    let err = scheduler
        .create(NewJob::new("bad", "horn", "not a schedule"))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::InvalidCron { .. }));
    assert_eq!(scheduler.store().save_count(), 0);
    assert!(scheduler.list().await.is_empty());
}

#[tokio::test]
async fn create_rejects_bad_script_with_line() {
    let (scheduler, _gateway) = setup();

    let err = scheduler
        .create(NewJob::new("bad", "horn\nspeed 200", "*/5 * * * *"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_script");
    assert_eq!(
        err.to_string(),
        "Script validation failed: Line 2: Speed must be integer -100 to 100, got '200'"
    );
    assert_eq!(scheduler.store().save_count(), 0);
}

#[tokio::test]
async fn create_rejects_waits_too_long_to_run() {
    let (scheduler, _gateway) = setup();

    let err = scheduler
        .create(NewJob::new("forever", "wait 1e300", "* * * * *"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Script validation failed: Line 1: Wait time too large, got '1e300'"
    );
    assert!(scheduler.list().await.is_empty());
}

#[tokio::test]
async fn create_fills_in_bookkeeping_and_persists() {
    let (scheduler, _gateway) = setup();

    let job = scheduler
        .create(NewJob::new("Departure", "bell on\nhorn", "0 8 * * *").with_description("8am"))
        .await
        .unwrap();

    assert_eq!(job.run_count, 0);
    assert!(job.last_run.is_none());
    assert!(job.last_result.is_none());
    assert!(job.enabled);
    assert_eq!(job.description, "8am");
    assert!(uuid::Uuid::parse_str(&job.id).is_ok());

    let stored = scheduler.store().snapshot();
    assert_eq!(stored.get(&job.id), Some(&job));
}

#[tokio::test]
async fn list_is_in_creation_order() {
    let (scheduler, _gateway) = setup();
    for name in ["first", "second", "third"] {
        scheduler
            .create(NewJob::new(name, "horn", "* * * * *"))
            .await
            .unwrap();
    }

    let names: Vec<_> = scheduler.list().await.into_iter().map(|j| j.name).collect();
    assert_eq!(names, ["first", "second", "third"]);
}

#[tokio::test]
async fn update_changes_only_supplied_fields() {
    let (scheduler, _gateway) = setup();
    let job = scheduler
        .create(NewJob::new("old", "horn", "0 8 * * *"))
        .await
        .unwrap();

    let updated = scheduler
        .update(
            &job.id,
            JobUpdate {
                name: Some("new".into()),
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "new");
    assert!(!updated.enabled);
    assert_eq!(updated.script, "horn");
    assert_eq!(updated.cron_expression, "0 8 * * *");
    assert_eq!(scheduler.store().snapshot()[&job.id].name, "new");
}

#[tokio::test]
async fn invalid_update_leaves_job_untouched() {
    let (scheduler, _gateway) = setup();
    let job = scheduler
        .create(NewJob::new("keep", "horn", "0 8 * * *"))
        .await
        .unwrap();
    let saves = scheduler.store().save_count();

    let err = scheduler
        .update(
            &job.id,
            JobUpdate {
                name: Some("changed".into()),
                script: Some("repeat 2 times\nhorn".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidScript(_)));
    assert_eq!(scheduler.get(&job.id).await.unwrap(), job);
    assert_eq!(scheduler.store().save_count(), saves);
}

#[tokio::test]
async fn unknown_ids_are_not_found() {
    let (scheduler, _gateway) = setup();

    assert_eq!(
        scheduler.get("missing").await.unwrap_err(),
        JobError::NotFound("missing".into())
    );
    assert!(matches!(
        scheduler.update("missing", JobUpdate::default()).await,
        Err(JobError::NotFound(_))
    ));
    assert!(matches!(scheduler.delete("missing").await, Err(JobError::NotFound(_))));
    assert!(matches!(scheduler.run_now("missing").await, Err(JobError::NotFound(_))));
}

#[tokio::test]
async fn delete_removes_and_persists() {
    let (scheduler, _gateway) = setup();
    let job = scheduler
        .create(NewJob::new("gone", "horn", "0 8 * * *"))
        .await
        .unwrap();

    scheduler.delete(&job.id).await.unwrap();
    assert!(scheduler.list().await.is_empty());
    assert!(scheduler.store().snapshot().is_empty());
}

// ============================================================================
// Execution
// ============================================================================

#[tokio::test]
async fn run_now_records_success() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("toot", "horn\nhorn", "0 8 * * *"))
        .await
        .unwrap();

    let outcome = scheduler.run_now(&job.id).await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.result, RESULT_SUCCESS);
    assert_eq!(outcome.report.unwrap().commands_executed, 2);
    assert_eq!(horns(&gateway).await, 2);

    let job = scheduler.get(&job.id).await.unwrap();
    assert_eq!(job.run_count, 1);
    assert_eq!(job.last_result.as_deref(), Some("Success"));
    assert_eq!(job.last_run, Some(outcome.ran_at));
    assert!(!scheduler.is_job_running(&job.id).await);
}

#[tokio::test]
async fn run_now_records_failure_without_disabling() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("toot", "horn", "0 8 * * *"))
        .await
        .unwrap();
    gateway.disconnect().await;

    let outcome = scheduler.run_now(&job.id).await.unwrap();
    assert!(!outcome.success);

    let job = scheduler.get(&job.id).await.unwrap();
    assert_eq!(
        job.last_result.as_deref(),
        Some("Error: Line 1: Error executing 'horn': Train not connected")
    );
    assert_eq!(job.run_count, 1);
    assert!(job.enabled);
}

#[tokio::test(start_paused = true)]
async fn run_now_refuses_overlap() {
    let (scheduler, _gateway) = setup();
    let job = scheduler
        .create(NewJob::new("slow", "wait 10", "0 8 * * *"))
        .await
        .unwrap();

    let first = {
        let scheduler = scheduler.clone();
        let id = job.id.clone();
        tokio::spawn(async move { scheduler.run_now(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(scheduler.is_job_running(&job.id).await);
    assert_eq!(
        scheduler.run_now(&job.id).await.unwrap_err(),
        JobError::AlreadyRunning(job.id.clone())
    );
    // the trigger loop must not start it either
    assert!(scheduler.tick(Utc::now()).await.is_empty());

    assert!(first.await.unwrap().unwrap().success);
    assert_eq!(scheduler.get(&job.id).await.unwrap().run_count, 1);
}

#[tokio::test(start_paused = true)]
async fn tick_starts_due_jobs_once() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("every minute", "horn", "* * * * *"))
        .await
        .unwrap();

    // never run, so due right away
    let now = Utc::now();
    assert_eq!(scheduler.tick(now).await, [job.id.clone()]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(horns(&gateway).await, 1);

    // ran this minute already
    assert!(scheduler.tick(now).await.is_empty());

    // a later firing makes it due again
    let later = now + chrono::Duration::minutes(2);
    assert_eq!(scheduler.tick(later).await, [job.id.clone()]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(horns(&gateway).await, 2);
    assert_eq!(scheduler.get(&job.id).await.unwrap().run_count, 2);
}

#[tokio::test(start_paused = true)]
async fn tick_skips_disabled_jobs() {
    let (scheduler, gateway) = setup();
    scheduler
        .create(NewJob::new("off", "horn", "* * * * *").with_enabled(false))
        .await
        .unwrap();

    assert!(scheduler.tick(Utc::now()).await.is_empty());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(horns(&gateway).await, 0);
}

#[tokio::test(start_paused = true)]
async fn disabled_jobs_can_still_run_manually() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("off", "horn", "* * * * *").with_enabled(false))
        .await
        .unwrap();

    assert!(scheduler.run_now(&job.id).await.unwrap().success);
    assert_eq!(horns(&gateway).await, 1);
}

#[tokio::test(start_paused = true)]
async fn delete_cancels_a_running_job() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("long", "wait 100\nhorn", "* * * * *"))
        .await
        .unwrap();

    assert_eq!(scheduler.tick(Utc::now()).await.len(), 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(scheduler.is_job_running(&job.id).await);

    scheduler.delete(&job.id).await.unwrap();
    assert!(!scheduler.is_job_running(&job.id).await);

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(horns(&gateway).await, 0);
    assert!(scheduler.store().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn deleting_during_manual_run_cancels_it() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("long", "wait 100\nhorn", "0 8 * * *"))
        .await
        .unwrap();

    let run = {
        let scheduler = scheduler.clone();
        let id = job.id.clone();
        tokio::spawn(async move { scheduler.run_now(&id).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    scheduler.delete(&job.id).await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err, JobError::Cancelled(job.id.clone()));
    assert_eq!(err.code(), "job_cancelled");
    assert!(scheduler.list().await.is_empty());

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(horns(&gateway).await, 0);
}

#[tokio::test(start_paused = true)]
async fn abandoned_manual_run_finishes_and_releases_the_job() {
    let (scheduler, gateway) = setup();
    let job = scheduler
        .create(NewJob::new("slow", "wait 5\nhorn", "0 8 * * *"))
        .await
        .unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), scheduler.run_now(&job.id)).await;
    assert!(abandoned.is_err());
    assert!(scheduler.is_job_running(&job.id).await);

    // the run keeps going without its caller
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!scheduler.is_job_running(&job.id).await);
    assert_eq!(horns(&gateway).await, 1);
    let finished = scheduler.get(&job.id).await.unwrap();
    assert_eq!(finished.run_count, 1);
    assert_eq!(finished.last_result.as_deref(), Some(RESULT_SUCCESS));

    assert!(scheduler.run_now(&job.id).await.unwrap().success);
    assert_eq!(scheduler.get(&job.id).await.unwrap().run_count, 2);

    let tomorrow = Utc::now() + chrono::Duration::days(1);
    assert_eq!(scheduler.tick(tomorrow).await, [job.id.clone()]);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn poll_loop_runs_due_jobs() {
    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
    let config = Config::default().with_scheduler(SchedulerConfig::default().with_poll_secs(30));
    let scheduler = JobScheduler::new(Arc::clone(&gateway), MemoryStore::new(), &config);
    let job = scheduler
        .create(NewJob::new("toot", "horn", "0 8 * * *"))
        .await
        .unwrap();

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.is_running());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(horns(&gateway).await, 1);
    assert_eq!(scheduler.get(&job.id).await.unwrap().run_count, 1);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_in_flight_runs() {
    let (scheduler, gateway) = setup();
    scheduler
        .create(NewJob::new("long", "wait 100\nhorn", "* * * * *"))
        .await
        .unwrap();

    scheduler.tick(Utc::now()).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    scheduler.stop().await;

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(horns(&gateway).await, 0);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn jobs_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduled_jobs.json");
    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));

    let job = {
        let scheduler =
            JobScheduler::new(Arc::clone(&gateway), JsonFileStore::new(&path), &Config::default());
        let job = scheduler
            .create(NewJob::new("persisted", "horn", "0 8 * * *"))
            .await
            .unwrap();
        scheduler.run_now(&job.id).await.unwrap();
        job
    };

    let scheduler = JobScheduler::new(gateway, JsonFileStore::new(&path), &Config::default());
    let restored = scheduler.get(&job.id).await.unwrap();
    assert_eq!(restored.name, "persisted");
    assert_eq!(restored.run_count, 1);
    assert_eq!(restored.last_result.as_deref(), Some("Success"));
}

#[tokio::test]
async fn unreadable_store_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scheduled_jobs.json");
    std::fs::write(&path, "[[[").unwrap();

    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
    let store = JsonFileStore::new(&path);
    assert!(store.load().is_err());

    let scheduler = JobScheduler::new(gateway, store, &Config::default());
    assert!(scheduler.list().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn loaded_jobs_keep_their_last_run() {
    let last_run = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let job = ScheduledJob {
        id: "hourly".into(),
        name: "hourly horn".into(),
        description: String::new(),
        script: "horn".into(),
        cron_expression: "0 * * * *".into(),
        enabled: true,
        created_at: last_run,
        last_run: Some(last_run),
        last_result: Some(RESULT_SUCCESS.into()),
        run_count: 4,
    };
    let store = MemoryStore::with_jobs([(job.id.clone(), job)].into_iter().collect());
    let gateway = Arc::new(DeviceGateway::new(MockDevice::connected()));
    let scheduler = JobScheduler::new(Arc::clone(&gateway), store, &Config::default());

    let half_past = Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap();
    assert!(scheduler.tick(half_past).await.is_empty());

    let ten = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
    assert_eq!(scheduler.tick(ten).await, ["hourly".to_string()]);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(horns(&gateway).await, 1);
    assert_eq!(scheduler.get("hourly").await.unwrap().run_count, 5);
}
