use doctask_core::{ExecutionMode, TaskRegistry, TaskRunner, TaskStatus};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Handle that records which tasks touched it, in call order.
#[derive(Clone, Default)]
struct Journal {
    calls: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    fn record(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

type Op = futures_util::future::BoxFuture<'static, anyhow::Result<Value>>;

fn delayed(name: &'static str, delay_ms: u64) -> impl Fn(Journal) -> Op + Send + Sync {
    move |journal: Journal| -> Op {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            journal.record(name);
            Ok::<_, anyhow::Error>(json!(name))
        })
    }
}

fn failing(name: &'static str) -> impl Fn(Journal) -> Op + Send + Sync {
    move |journal: Journal| -> Op {
        Box::pin(async move {
            journal.record(name);
            Err::<Value, _>(anyhow::anyhow!("{} rejected by driver", name))
        })
    }
}

fn registry() -> TaskRegistry<Journal> {
    let mut registry = TaskRegistry::new();
    registry.register("slowest", true, delayed("slowest", 60)).unwrap();
    registry.register("skipped", false, delayed("skipped", 0)).unwrap();
    registry.register("broken", true, failing("broken")).unwrap();
    registry.register("quick", true, delayed("quick", 1)).unwrap();
    registry
}

fn report_names(report: &doctask_core::RunReport) -> Vec<&str> {
    report.outcomes().iter().map(|o| o.name.as_str()).collect()
}

#[tokio::test]
async fn test_sequential_run_reports_selected_tasks_in_order() {
    let registry = registry();
    let journal = Journal::default();

    let report = TaskRunner::new().run(journal.clone(), registry.selected()).await;

    assert_eq!(report_names(&report), vec!["slowest", "broken", "quick"]);
    assert_eq!(journal.calls(), vec!["slowest", "broken", "quick"]);
    assert_eq!(report.get("broken").unwrap().status(), TaskStatus::Failed);
    assert_eq!(report.get("quick").unwrap().result.payload(), Some(&json!("quick")));
    assert!(report.get("skipped").is_none());
}

#[tokio::test]
async fn test_concurrent_run_keeps_registration_order() {
    let registry = registry();
    let journal = Journal::default();

    let report = TaskRunner::new()
        .with_mode(ExecutionMode::Concurrent { max_in_flight: 4 })
        .run(journal.clone(), registry.selected())
        .await;

    // completion order differs, report order does not
    assert_eq!(journal.calls().last().map(String::as_str), Some("slowest"));
    assert_eq!(report_names(&report), vec!["slowest", "broken", "quick"]);

    let summary = report.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn test_all_failed_run_still_completes() {
    let mut registry = TaskRegistry::new();
    registry.register("a", true, failing("a")).unwrap();
    registry.register("b", true, failing("b")).unwrap();
    registry.register("c", true, failing("c")).unwrap();
    let journal = Journal::default();

    let report = TaskRunner::new().run(journal.clone(), registry.selected()).await;

    assert_eq!(journal.calls(), vec!["a", "b", "c"]);
    assert!(report.all_failed());
    assert_eq!(
        report.get("c").unwrap().result.error().unwrap().message,
        "c rejected by driver"
    );
}
