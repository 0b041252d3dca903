//! Orchestrator scenario tests
//!
//! End-to-end runs through directive store, registry, executor, classifier,
//! annealer and escalation queue, with scripted tools. Backoff timing runs
//! on tokio's paused clock.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use doe::DoeError;
use doe::classifier::FailureClassifier;
use doe::directive::{Approval, DirectiveConfig, DirectiveStore};
use doe::domain::{Decision, Directive, FailureCategory, FailureCause, LearningDraft, RunState, event_types};
use doe::escalation::{EscalationConfig, EscalationQueue};
use doe::executor::ExecutorConfig;
use doe::observability::{EventSink, MemorySink};
use doe::orchestrator::{Orchestrator, RunOutcome};
use doe::schema::{Param, ParamType, Schema};
use doe::tools::{FnTool, ToolBinding, ToolRegistry};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    sink: Arc<MemorySink>,
    temp: TempDir,
}

fn open_orchestrator(root: &std::path::Path, executor: ExecutorConfig, sink: Arc<MemorySink>) -> Orchestrator {
    let store = Arc::new(DirectiveStore::open(root.join("directives"), DirectiveConfig::default()).unwrap());
    let registry = Arc::new(ToolRegistry::new(Arc::clone(&store)));
    let escalations =
        Arc::new(EscalationQueue::open(root.join("escalations"), &EscalationConfig::default()).unwrap());
    Orchestrator::new(
        store,
        registry,
        escalations,
        sink as Arc<dyn EventSink>,
        FailureClassifier::default(),
        executor,
    )
}

fn harness(executor: ExecutorConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let sink = Arc::new(MemorySink::new());
    let orchestrator = open_orchestrator(temp.path(), executor, Arc::clone(&sink));
    Harness {
        orchestrator: Arc::new(orchestrator),
        sink,
        temp,
    }
}

fn url_schema() -> Schema {
    Schema::new().with(Param::required("url", ParamType::String))
}

fn summary_schema() -> Schema {
    Schema::new().with(Param::required("summary", ParamType::String))
}

/// Tool failing with `cause` for the first `failures` calls, then summarizing
fn scripted(calls: Arc<AtomicU32>, failures: u32, cause: FailureCause) -> Arc<dyn doe::tools::Tool> {
    FnTool::shared("summarize", move |inputs: Value| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let cause = cause.clone();
        async move {
            if n < failures {
                Err(cause)
            } else {
                Ok(json!({ "summary": format!("summary of {}", inputs["url"].as_str().unwrap_or_default()) }))
            }
        }
    })
}

/// Directive plus binding for `task_id`; returns the tool's call counter
fn install(h: &Harness, task_id: &str, max_retries: u32, failures: u32, cause: FailureCause) -> Arc<AtomicU32> {
    h.orchestrator
        .directives()
        .create(
            Directive::new(task_id, "Summarize a web page")
                .with_input_schema(url_schema())
                .with_output_schema(summary_schema()),
        )
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let binding = ToolBinding::new(task_id, scripted(Arc::clone(&calls), failures, cause))
        .with_input_schema(url_schema())
        .with_output_schema(summary_schema())
        .with_max_retries(max_retries);
    h.orchestrator.registry().register(binding).unwrap();
    calls
}

fn document(h: &Harness, task_id: &str) -> String {
    std::fs::read_to_string(h.orchestrator.directives().document_path(task_id)).unwrap()
}

fn page() -> Value {
    json!({ "url": "https://example.com" })
}

#[tokio::test]
async fn test_always_succeeds_without_mutation() {
    let h = harness(ExecutorConfig::default());
    let calls = install(&h, "fetch-summary", 3, 0, FailureCause::unknown("unused"));
    let before = document(&h, "fetch-summary");

    let report = h
        .orchestrator
        .run("fetch-summary", page(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_succeeded());
    assert_eq!(report.trace.current(), RunState::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(document(&h, "fetch-summary"), before);
    assert_eq!(h.sink.of_type(event_types::RUN_SUCCEEDED).len(), 1);
    assert!(h.sink.of_type(event_types::LEARNING_RECORDED).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success_backs_off_increasingly() {
    for failures in 1..3u32 {
        let h = harness(ExecutorConfig::default());
        let calls = install(&h, "flaky", 3, failures, FailureCause::transient("503"));

        let report = h.orchestrator.run("flaky", page(), &CancellationToken::new()).await.unwrap();

        assert!(report.is_succeeded());
        assert_eq!(calls.load(Ordering::SeqCst), failures + 1);
        assert_eq!(report.trace.backoffs.len(), failures as usize);
        assert!(report.trace.backoffs.windows(2).all(|w| w[0] < w[1]));
        assert!(h.orchestrator.directives().learnings("flaky").unwrap().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_always_transient_exhausts_budget_and_records_one_learning() {
    let h = harness(ExecutorConfig::default());
    let calls = install(&h, "down", 3, u32::MAX, FailureCause::transient("503"));

    let report = h.orchestrator.run("down", page(), &CancellationToken::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(report.trace.backoffs.len(), 3);
    match &report.outcome {
        RunOutcome::Failed { cause, learning } => {
            assert_eq!(cause.category, FailureCategory::Transient);
            assert_eq!(learning.as_ref().unwrap().sequence, 1);
        }
        other => panic!("expected Failed, got {:?}", other),
    }

    let learnings = h.orchestrator.directives().learnings("down").unwrap();
    assert_eq!(learnings.len(), 1);
    assert_eq!(learnings[0].category, FailureCategory::Transient);

    let failed = h.sink.of_type(event_types::RUN_FAILED);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["learning"]["sequence"], 1);
}

#[test]
fn test_concurrent_appends_are_totally_ordered() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(DirectiveStore::open(temp.path(), DirectiveConfig { max_learnings: 10 }).unwrap());
    store.create(Directive::new("busy", "many writers")).unwrap();

    const N: u64 = 64;
    std::thread::scope(|scope| {
        for i in 0..N {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                store
                    .append_learning(
                        "busy",
                        LearningDraft::new(FailureCategory::Transient, format!("writer {}", i), "noted"),
                    )
                    .unwrap();
            });
        }
    });

    let entries = store.learnings("busy").unwrap();
    assert_eq!(entries.len() as u64, N);
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=N).collect::<Vec<_>>());
    let writers: BTreeSet<&str> = entries.iter().map(|e| e.failure_summary.as_str()).collect();
    assert_eq!(writers.len() as u64, N);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failing_runs_each_leave_one_learning() {
    let h = harness(ExecutorConfig::default());
    install(&h, "gone", 3, u32::MAX, FailureCause::gone("410"));

    let mut runs = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let orchestrator = Arc::clone(&h.orchestrator);
        runs.spawn(async move { orchestrator.run("gone", page(), &CancellationToken::new()).await });
    }
    let mut sequences = BTreeSet::new();
    while let Some(result) = runs.join_next().await {
        let report = result.unwrap().unwrap();
        sequences.insert(report.learning().unwrap().sequence);
    }

    assert_eq!(sequences, (1..=16).collect::<BTreeSet<u64>>());
    assert_eq!(h.orchestrator.directives().learnings("gone").unwrap().len(), 16);
}

#[tokio::test]
async fn test_missing_required_input_never_invokes_tool() {
    let h = harness(ExecutorConfig::default());
    let calls = install(&h, "fetch-summary", 3, 0, FailureCause::unknown("unused"));

    let result = h
        .orchestrator
        .run("fetch-summary", json!({ "lang": "en" }), &CancellationToken::new())
        .await;

    match result {
        Err(DoeError::InputSchemaViolation { task_id, violations }) => {
            assert_eq!(task_id, "fetch-summary");
            assert!(violations.iter().any(|v| v.contains("url")));
        }
        other => panic!("expected InputSchemaViolation, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let failed = h.sink.of_type(event_types::RUN_FAILED);
    assert_eq!(h.sink.events().len(), 1);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["rejected"], "input_schema_violation");
    assert!(failed[0].payload["problems"][0].as_str().unwrap().contains("url"));
    assert!(h.orchestrator.directives().learnings("fetch-summary").unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_is_cancelled_without_learning() {
    let h = harness(ExecutorConfig {
        backoff_base_ms: 10_000,
        ..ExecutorConfig::default()
    });
    let calls = install(&h, "slow-api", 3, u32::MAX, FailureCause::transient("503"));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let report = h.orchestrator.run("slow-api", page(), &cancel).await.unwrap();

    assert!(report.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(report.learning().is_none());
    assert!(h.orchestrator.directives().learnings("slow-api").unwrap().is_empty());
    assert_eq!(h.sink.of_type(event_types::RUN_FAILED).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_summary_rate_limited_twice_then_succeeds() {
    let h = harness(ExecutorConfig {
        backoff_base_ms: 10_000,
        ..ExecutorConfig::default()
    });
    let calls = install(
        &h,
        "fetch-summary",
        3,
        2,
        FailureCause::rate_limited("429 Too Many Requests", None),
    );

    let start = tokio::time::Instant::now();
    let report = h
        .orchestrator
        .run("fetch-summary", page(), &CancellationToken::new())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(
        report.outcome,
        RunOutcome::Succeeded {
            value: json!({ "summary": "summary of https://example.com" })
        }
    );
    assert_eq!(report.trace.backoffs, vec![Duration::from_secs(10), Duration::from_secs(20)]);
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(h.orchestrator.directives().learnings("fetch-summary").unwrap().is_empty());
}

#[tokio::test]
async fn test_unregistered_task_is_not_found() {
    let h = harness(ExecutorConfig::default());

    let result = h
        .orchestrator
        .run("unregistered-task", json!({}), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(DoeError::NotFound(_))));
    assert!(h.orchestrator.registry().list().unwrap().is_empty());
    assert!(h.orchestrator.escalations().all().unwrap().is_empty());
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_escalation_survives_restart() {
    let h = harness(ExecutorConfig::default());
    let calls = install(&h, "paid-api", 3, 1, FailureCause::metered("would spend credits", 2.5));

    let report = h.orchestrator.run("paid-api", page(), &CancellationToken::new()).await.unwrap();
    let id = report.escalation_id().unwrap().to_string();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.of_type(event_types::RUN_ESCALATED).len(), 1);

    // A fresh process sees the pending escalation and resumes it
    let sink = Arc::new(MemorySink::new());
    let restarted = open_orchestrator(h.temp.path(), ExecutorConfig::default(), Arc::clone(&sink));
    let pending = restarted.escalations().pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].inputs, page());

    let binding = ToolBinding::new("paid-api", scripted(Arc::clone(&calls), 0, FailureCause::unknown("unused")))
        .with_input_schema(url_schema())
        .with_output_schema(summary_schema());
    restarted.registry().register(binding).unwrap();

    restarted
        .decide(&id, Decision::Retry, Some("budget approved".into()), Some("ops".into()))
        .unwrap();
    let resumed = restarted.resume(&id, &CancellationToken::new()).await.unwrap();

    assert!(resumed.is_succeeded());
    assert_eq!(resumed.trace.states()[0], RunState::Escalated);
    assert!(restarted.directives().learnings("paid-api").unwrap().is_empty());
    assert!(restarted.escalations().pending().unwrap().is_empty());
    assert_eq!(sink.of_type(event_types::RUN_SUCCEEDED).len(), 1);
}

/// Escalate once, then revise the contract so the parked inputs are invalid
#[tokio::test]
async fn test_resume_with_inputs_invalidated_by_schema_revision() {
    let h = harness(ExecutorConfig::default());
    let calls = install(&h, "fetch-summary", 3, 1, FailureCause::unknown("odd markup"));

    let report = h
        .orchestrator
        .run("fetch-summary", page(), &CancellationToken::new())
        .await
        .unwrap();
    let id = report.escalation_id().unwrap().to_string();

    let token_schema = url_schema().with(Param::required("token", ParamType::String));
    let store = h.orchestrator.directives();
    let revision = store.get("fetch-summary").unwrap().revision;
    store
        .revise_schema(
            "fetch-summary",
            revision,
            token_schema.clone(),
            summary_schema(),
            Some(&Approval::by("ops")),
        )
        .unwrap();
    let binding = ToolBinding::new(
        "fetch-summary",
        scripted(Arc::clone(&calls), 0, FailureCause::unknown("unused")),
    )
    .with_input_schema(token_schema)
    .with_output_schema(summary_schema());
    h.orchestrator.registry().register(binding).unwrap();

    h.orchestrator.decide(&id, Decision::Retry, None, Some("ops".into())).unwrap();
    let resumed = h.orchestrator.resume(&id, &CancellationToken::new()).await.unwrap();

    match &resumed.outcome {
        RunOutcome::Failed { cause, learning } => {
            assert_eq!(cause.category, FailureCategory::InvalidInput);
            assert!(cause.message.contains("token"));
            assert!(learning.is_some());
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(resumed.trace.current(), RunState::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let learnings = h.orchestrator.directives().learnings("fetch-summary").unwrap();
    assert_eq!(learnings.len(), 1);
    assert_eq!(learnings[0].category, FailureCategory::InvalidInput);
    assert!(h.orchestrator.escalations().get(&id).unwrap().resumed_at.is_some());
    assert!(matches!(
        h.orchestrator.resume(&id, &CancellationToken::new()).await,
        Err(DoeError::AlreadyExists(_))
    ));
}

/// A resumed attempt cancelled mid-call leaves the escalation resumable
#[tokio::test(start_paused = true)]
async fn test_cancelled_resume_can_be_resumed_again() {
    let h = harness(ExecutorConfig::default());
    h.orchestrator
        .directives()
        .create(
            Directive::new("slow-api", "Summarize slowly")
                .with_input_schema(url_schema())
                .with_output_schema(summary_schema()),
        )
        .unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let tool = FnTool::shared("slow", move |_inputs: Value| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            match n {
                0 => Err(FailureCause::unknown("odd markup")),
                1 => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(json!({ "summary": "late" }))
                }
                _ => Ok(json!({ "summary": "done" })),
            }
        }
    });
    let binding = ToolBinding::new("slow-api", tool)
        .with_input_schema(url_schema())
        .with_output_schema(summary_schema())
        .with_timeout(Duration::from_secs(120));
    h.orchestrator.registry().register(binding).unwrap();

    let report = h.orchestrator.run("slow-api", page(), &CancellationToken::new()).await.unwrap();
    let id = report.escalation_id().unwrap().to_string();
    h.orchestrator.decide(&id, Decision::Retry, None, None).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });
    let cancelled = h.orchestrator.resume(&id, &cancel).await.unwrap();
    assert!(cancelled.is_cancelled());
    assert!(cancelled.learning().is_none());
    assert!(h.orchestrator.escalations().get(&id).unwrap().resumed_at.is_none());

    let resumed = h.orchestrator.resume(&id, &CancellationToken::new()).await.unwrap();
    assert!(resumed.is_succeeded());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(h.orchestrator.directives().learnings("slow-api").unwrap().is_empty());
}
