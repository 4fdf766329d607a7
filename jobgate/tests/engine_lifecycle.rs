//! Engine lifecycle tests: admission limits, cancellation paths, failure
//! recording and cleanup.
//!
//! Timing scenarios run on paused tokio time, so sleeps advance a virtual
//! clock and the assertions are exact.

use std::time::Duration;

use jobgate::cancel::CancellationHandle;
use jobgate::error::JobError;
use jobgate::job::{JobId, JobRecord, JobStatus};
use jobgate::runtime::{
    CancelOutcome, CANCELLED_BEFORE_EXECUTION_MESSAGE, CANCELLED_RUNNING_MESSAGE,
    CANCELLED_WAITING_MESSAGE,
};
use jobgate::store::JobQuery;
use jobgate_testkit::{
    engine, registry, slow_registry, wait_for_status, HandlerBehavior, InMemoryJobStore,
    RecordingHandler,
};
use tokio::time::sleep;

const LIMIT: Duration = Duration::from_secs(5);

fn status_of(store: &InMemoryJobStore, id: JobId) -> JobStatus {
    store.snapshot(id).expect("job should exist").status
}

#[tokio::test(start_paused = true)]
async fn slow_jobs_run_one_at_a_time() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");
    let admission = engine.admission();
    assert_eq!(admission.available_slots("slow"), Some(1));

    let j1 = engine.create("slow", None).await.unwrap();
    let j2 = engine.create("slow", None).await.unwrap();
    assert_eq!(j1.status, JobStatus::Pending);
    assert_eq!(j2.status, JobStatus::Pending);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(status_of(&store, j1.id), JobStatus::InProgress);
    assert_eq!(status_of(&store, j2.id), JobStatus::Pending);
    assert_eq!(admission.available_slots("slow"), Some(0));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&store, j1.id), JobStatus::Completed);
    assert_eq!(status_of(&store, j2.id), JobStatus::InProgress);
    assert_eq!(admission.available_slots("slow"), Some(0));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(status_of(&store, j1.id), JobStatus::Completed);
    assert_eq!(status_of(&store, j2.id), JobStatus::Completed);
    assert_eq!(admission.available_slots("slow"), Some(1));

    let first = store.snapshot(j1.id).unwrap();
    let second = store.snapshot(j2.id).unwrap();
    assert!(second.started_at.unwrap() >= first.completed_at.unwrap());
    assert_eq!(
        second.process_instance_id.as_ref().map(|id| id.as_str()),
        Some("instance-a")
    );
    assert_eq!(handler.peak(), 1);
    assert_eq!(admission.registered_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn only_max_concurrency_jobs_are_admitted() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, registry(&[("batch", 2, 50)]), "instance-a");

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(engine.create("batch", None).await.unwrap().id);
    }

    sleep(Duration::from_millis(5)).await;
    let in_progress = ids
        .iter()
        .filter(|id| status_of(&store, **id) == JobStatus::InProgress)
        .count();
    let pending = ids
        .iter()
        .filter(|id| status_of(&store, **id) == JobStatus::Pending)
        .count();
    assert_eq!(in_progress, 2);
    assert_eq!(pending, 1);
    assert_eq!(handler.running(), 2);

    let usage = engine.concurrency();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].in_use + usage[0].available, usage[0].max_concurrency);
    assert_eq!(usage[0].in_use, 2);

    for id in &ids {
        wait_for_status(&store, *id, JobStatus::Completed, LIMIT).await;
    }
    assert_eq!(handler.peak(), 2);
    assert_eq!(engine.admission().available_slots("batch"), Some(2));
}

#[tokio::test(start_paused = true)]
async fn cancelling_waiting_job_never_starts_it() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let j1 = engine.create("slow", None).await.unwrap();
    let j2 = engine.create("slow", None).await.unwrap();
    sleep(Duration::from_millis(5)).await;
    assert_eq!(status_of(&store, j2.id), JobStatus::Pending);

    let outcome = engine.cancel(j2.id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Signalled);

    let cancelled = wait_for_status(&store, j2.id, JobStatus::Cancelled, LIMIT).await;
    assert!(cancelled.started_at.is_none());
    assert!(cancelled.completed_at.is_some());
    assert_eq!(cancelled.message.as_deref(), Some(CANCELLED_WAITING_MESSAGE));
    assert_eq!(
        store.status_history(j2.id),
        vec![JobStatus::Pending, JobStatus::Cancelled]
    );

    wait_for_status(&store, j1.id, JobStatus::Completed, LIMIT).await;
    assert_eq!(handler.runs(), vec![j1.id]);
}

#[tokio::test(start_paused = true)]
async fn cancelling_unattended_pending_job_closes_it_directly() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let id = store.seed(JobRecord::pending("slow", None));
    let outcome = engine.cancel(id).await.unwrap();
    assert_eq!(outcome, CancelOutcome::CancelledBeforeExecution);

    let job = engine.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.started_at.is_none());
    assert_eq!(job.message.as_deref(), Some(CANCELLED_BEFORE_EXECUTION_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn cancelling_running_job_stops_it_midway() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let job = engine.create("slow", None).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(status_of(&store, job.id), JobStatus::InProgress);

    assert_eq!(engine.cancel(job.id).await.unwrap(), CancelOutcome::Signalled);

    let cancelled = wait_for_status(&store, job.id, JobStatus::Cancelled, LIMIT).await;
    assert!(cancelled.started_at.is_some());
    assert_eq!(cancelled.message.as_deref(), Some(CANCELLED_RUNNING_MESSAGE));
    assert!(!store.status_history(job.id).contains(&JobStatus::Completed));

    sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.admission().available_slots("slow"), Some(1));
    assert_eq!(engine.admission().registered_jobs(), 0);
    assert_eq!(handler.running(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_cancel_reports_invalid_state() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let job = engine.create("slow", None).await.unwrap();
    sleep(Duration::from_millis(5)).await;
    engine.cancel(job.id).await.unwrap();
    wait_for_status(&store, job.id, JobStatus::Cancelled, LIMIT).await;

    let err = engine.cancel(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        JobError::InvalidState {
            status: JobStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn unknown_ids_and_types_are_rejected() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let missing = JobId::new();
    assert!(matches!(
        engine.cancel(missing).await.unwrap_err(),
        JobError::NotFound(id) if id == missing
    ));
    assert!(matches!(
        engine.get(missing).await.unwrap_err(),
        JobError::NotFound(_)
    ));

    let err = engine.create("nope", None).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownType(ref name) if name == "nope"));
    let err = engine.create_and_run("nope", None, None).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownType(_)));
    assert!(store.is_empty(), "no record is created for an unknown type");
}

#[tokio::test(start_paused = true)]
async fn handler_error_is_recorded_as_failure() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::with_behavior(HandlerBehavior::Fail("disk full".into()));
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let job = engine
        .create_and_run("slow", Some("payload".into()), None)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message.as_deref(), Some("disk full"));
    assert!(job.completed_at.is_some());
    assert_eq!(job.payload.as_deref(), Some("payload"));
    assert_eq!(engine.admission().available_slots("slow"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn handler_panic_is_recorded_as_failure() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::with_behavior(HandlerBehavior::Panic("kaboom".into()));
    let engine = engine(&store, &handler, slow_registry(), "instance-a");

    let job = engine.create("slow", None).await.unwrap();
    let failed = wait_for_status(&store, job.id, JobStatus::Failed, LIMIT).await;
    assert_eq!(failed.message.as_deref(), Some("job handler panicked: kaboom"));

    sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.admission().available_slots("slow"), Some(1));
    assert_eq!(engine.admission().registered_jobs(), 0);

    // The pool is usable afterwards.
    handler.set_behavior(HandlerBehavior::Sleep);
    let next = engine.create_and_run("slow", None, None).await.unwrap();
    assert_eq!(next.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn store_failure_propagates_and_still_releases_slot() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, registry(&[("slow", 1, 10)]), "instance-a");

    store.fail_updates_to(Some(JobStatus::Completed));
    let err = engine.create_and_run("slow", None, None).await.unwrap_err();
    assert!(matches!(err, JobError::Store(_)));

    assert_eq!(engine.admission().available_slots("slow"), Some(1));
    assert_eq!(engine.admission().registered_jobs(), 0);

    store.fail_updates_to(None);
    let job = engine.create_and_run("slow", None, None).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn caller_signal_cancels_inline_run() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-a");
    let caller = CancellationHandle::new();

    let (result, _) = tokio::join!(
        engine.create_and_run("slow", None, Some(&caller)),
        async {
            sleep(Duration::from_millis(30)).await;
            caller.cancel();
        }
    );

    let job = result.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.message.as_deref(), Some(CANCELLED_RUNNING_MESSAGE));
    assert!(job.started_at.is_some());
    assert_eq!(engine.admission().registered_jobs(), 0);
    assert_eq!(engine.admission().available_slots("slow"), Some(1));
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_running_and_waiting_jobs() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, registry(&[("slow", 1, 60_000)]), "instance-a");

    let running = engine.create("slow", None).await.unwrap();
    let waiting = engine.create("slow", None).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    engine.shutdown().await.unwrap();
    assert_eq!(engine.running_tasks(), 0);

    let running = store.snapshot(running.id).unwrap();
    assert_eq!(running.status, JobStatus::Cancelled);
    assert_eq!(running.message.as_deref(), Some(CANCELLED_RUNNING_MESSAGE));

    let waiting = store.snapshot(waiting.id).unwrap();
    assert_eq!(waiting.status, JobStatus::Cancelled);
    assert_eq!(waiting.message.as_deref(), Some(CANCELLED_WAITING_MESSAGE));
    assert!(waiting.started_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn run_pending_drives_existing_job() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, slow_registry(), "instance-b");

    let id = store.seed(JobRecord::pending("slow", None));
    let job = engine.run_pending(id, None).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.process_instance_id.as_ref().map(|id| id.as_str()),
        Some("instance-b")
    );

    let err = engine.run_pending(id, None).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidState { action: "run", .. }));

    let stale = store.seed(JobRecord::pending("retired", None));
    let err = engine.run_pending(stale, None).await.unwrap_err();
    assert!(matches!(err, JobError::UnknownType(_)));
    assert_eq!(status_of(&store, stale), JobStatus::Pending);

    let err = engine.run_pending(JobId::new(), None).await.unwrap_err();
    assert!(matches!(err, JobError::NotFound(_)));
    assert_eq!(engine.admission().registered_jobs(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_racing_run_pending_never_revives_job() {
    // Shift the start of `run_pending` against `cancel` so each store
    // round-trip of one lands between those of the other.
    for head_start in 0..6 {
        let store = InMemoryJobStore::new();
        store.yield_on_access(true);
        let handler = RecordingHandler::new();
        let engine = engine(&store, &handler, slow_registry(), "instance-a");
        let id = store.seed(JobRecord::pending("slow", None));

        let (cancelled, ran) = tokio::join!(engine.cancel(id), async {
            for _ in 0..head_start {
                tokio::task::yield_now().await;
            }
            engine.run_pending(id, None).await
        });

        let outcome = cancelled.unwrap();
        assert_ne!(outcome, CancelOutcome::NoOp, "head start {head_start}");
        match ran {
            Ok(job) => assert_eq!(job.status, JobStatus::Cancelled),
            Err(err) => assert!(
                matches!(
                    err,
                    JobError::AlreadyRegistered(_) | JobError::InvalidState { action: "run", .. }
                ),
                "head start {head_start}: {err}"
            ),
        }

        let history = store.status_history(id);
        assert_eq!(
            history.last(),
            Some(&JobStatus::Cancelled),
            "head start {head_start}: {history:?}"
        );
        assert!(!history.contains(&JobStatus::Completed));
        assert_eq!(
            history.iter().filter(|s| s.is_terminal()).count(),
            1,
            "head start {head_start}: {history:?}"
        );
        assert_eq!(status_of(&store, id), JobStatus::Cancelled);
        assert_eq!(engine.admission().registered_jobs(), 0);
    }
}

#[tokio::test(start_paused = true)]
async fn list_and_summary_reflect_store() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(
        &store,
        &handler,
        registry(&[("email", 4, 1), ("report", 1, 1)]),
        "instance-a",
    );

    for _ in 0..3 {
        engine.create_and_run("email", None, None).await.unwrap();
    }
    handler.set_behavior(HandlerBehavior::Fail("bad template".into()));
    engine.create_and_run("report", None, None).await.unwrap();

    let page = engine
        .list(&JobQuery::new().with_job_type("email").with_page(1, 2))
        .await
        .unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.jobs.len(), 2);
    assert!(page.jobs[0].created_at >= page.jobs[1].created_at);

    let failed = engine
        .list(&JobQuery::new().with_status(JobStatus::Failed))
        .await
        .unwrap();
    assert_eq!(failed.total_count, 1);
    assert_eq!(failed.jobs[0].job_type, "report");

    let beyond = engine
        .list(&JobQuery::new().with_page(usize::MAX, 20))
        .await
        .unwrap();
    assert_eq!(beyond.total_count, 4);
    assert!(beyond.jobs.is_empty());

    let summary = engine.summary().await.unwrap();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.count(JobStatus::Completed), 3);
    assert_eq!(summary.count(JobStatus::Failed), 1);
    assert_eq!(summary.by_type["email"], 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_never_exceed_limit() {
    let store = InMemoryJobStore::new();
    let handler = RecordingHandler::new();
    let engine = engine(&store, &handler, registry(&[("burst", 3, 5)]), "instance-a");

    let mut creators = Vec::new();
    for _ in 0..30 {
        let engine = engine.clone();
        creators.push(tokio::spawn(async move {
            engine.create("burst", None).await.unwrap().id
        }));
    }

    let mut ids = Vec::new();
    for creator in creators {
        ids.push(creator.await.unwrap());
    }
    for id in ids {
        wait_for_status(&store, id, JobStatus::Completed, Duration::from_secs(10)).await;
    }

    assert!(handler.peak() <= 3, "peak {} exceeded limit", handler.peak());
    assert_eq!(handler.runs().len(), 30);
    engine.shutdown().await.unwrap();
    assert_eq!(engine.admission().available_slots("burst"), Some(3));
}
