use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use opgraph::{Assignment, ExecutableBuilder, Fork, NodeRef, RunConfig, SchedulerBuilder, run};
use opgraph_test_utils::builders::{capture, counted};
use opgraph_test_utils::{RecordingMonitor, init_tracing, with_timeout};
use serde_json::json;

#[tokio::test]
async fn fork_assignments_apply_only_to_their_own_fork() {
    init_tracing();

    let size = NodeRef::parameter_with_default("size", 1);
    let template = ExecutableBuilder::new("scale")
        .dependency("size", size.clone())
        .run_sync(|ctx| Ok(json!(ctx["size"].as_i64().unwrap_or(0) * 10)));

    let sched = {
        let size = size.clone();
        let template = template.clone();
        SchedulerBuilder::new("sizes").fork_sync(move |_| {
            [2, 3]
                .into_iter()
                .map(|n| -> anyhow::Result<Fork> {
                    let assignment = Assignment::new(size.clone(), NodeRef::value(n))?;
                    Ok(Fork::new(template.clone()).with_assignments(vec![assignment]))
                })
                .chain(std::iter::once(Ok(Fork::new(template.clone()))))
                .collect()
        })
    };
    let (report, seen) = capture("report", &[("all", sched)]);

    let summary = with_timeout(run(RunConfig::new(vec![report]))).await.unwrap();

    assert!(summary.successful, "{summary:?}");
    assert_eq!(seen.lock().unwrap()[0]["all"], json!([20, 30, 10]));
}

#[tokio::test]
async fn forks_reuse_operations_already_in_the_run() {
    let runs = Arc::new(AtomicUsize::new(0));
    let shared = counted("shared", &[], Arc::clone(&runs));

    let sched = {
        let shared = shared.clone();
        SchedulerBuilder::new("fan")
            .dependency("shared", shared.clone())
            .fork_sync(move |_| {
                Ok((0..3)
                    .map(|i| {
                        ExecutableBuilder::new(format!("child-{i}"))
                            .dependency("shared", shared.clone())
                            .run_sync(move |ctx| Ok(json!(ctx["shared"].as_i64().unwrap_or(0) + i)))
                            .into()
                    })
                    .collect())
            })
    };
    let (report, seen) = capture("report", &[("all", sched)]);

    let summary = with_timeout(run(RunConfig::new(vec![report]))).await.unwrap();

    assert!(summary.successful, "{summary:?}");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(seen.lock().unwrap()[0]["all"], json!([0, 1, 2]));
    assert_eq!(summary.executed.len(), 6);
}

#[tokio::test]
async fn failed_fork_starves_scheduler_dependents() {
    let sched = SchedulerBuilder::new("fan").fork_sync(|_| {
        Ok(vec![
            ExecutableBuilder::new("ok").run_sync(|_| Ok(json!(1))).into(),
            ExecutableBuilder::new("bad")
                .run_sync(|_| Err(anyhow::anyhow!("nope")))
                .into(),
        ])
    });
    let (report, seen) = capture("report", &[("all", sched)]);
    let monitor = Arc::new(RecordingMonitor::new());

    let config = RunConfig::new(vec![report]).monitor(monitor.clone());
    let summary = with_timeout(run(config)).await.unwrap();

    assert!(!summary.successful);
    assert_eq!(summary.failed_names(), vec!["bad"]);
    let mut unexecuted = summary.unexecuted_names();
    unexecuted.sort();
    assert_eq!(unexecuted, vec!["bad", "report"]);
    assert!(seen.lock().unwrap().is_empty());
    assert!(monitor.succeeded().contains(&"fan".to_string()));
}

#[tokio::test]
async fn fork_with_unresolved_parameter_fails_the_scheduler() {
    let sched = SchedulerBuilder::new("fan").fork_sync(|_| {
        Ok(vec![
            ExecutableBuilder::new("needs-p")
                .dependency("p", NodeRef::parameter("p"))
                .run_sync(|_| Ok(json!(null)))
                .into(),
        ])
    });

    let summary = with_timeout(run(RunConfig::new(vec![sched]))).await.unwrap();

    assert_eq!(summary.failed_names(), vec!["fan"]);
    assert!(summary.failure_of("fan").unwrap().to_string().contains("p"));
}

#[tokio::test]
async fn nested_schedulers_complete_their_parent() {
    let inner = SchedulerBuilder::new("inner").fork_sync(|_| {
        Ok(vec![ExecutableBuilder::new("leaf").run_sync(|_| Ok(json!("leaf"))).into()])
    });
    let outer = {
        let inner = inner.clone();
        SchedulerBuilder::new("outer").fork_sync(move |_| Ok(vec![Fork::new(inner.clone())]))
    };
    let (report, seen) = capture("report", &[("all", outer)]);

    let summary = with_timeout(run(RunConfig::new(vec![report]))).await.unwrap();

    assert!(summary.successful, "{summary:?}");
    assert_eq!(seen.lock().unwrap()[0]["all"], json!([["leaf"]]));
}

#[tokio::test]
async fn fork_waits_for_a_scheduler_whose_forks_are_still_running() {
    init_tracing();

    let s1_runs = Arc::new(AtomicUsize::new(0));
    let s1 = {
        let s1_runs = Arc::clone(&s1_runs);
        SchedulerBuilder::new("s1").fork_sync(move |_| {
            s1_runs.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                ExecutableBuilder::new("slow")
                    .run(|_| async {
                        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                        Ok(json!("slow-done"))
                    })
                    .into(),
            ])
        })
    };
    let (uses_s1, seen) = capture("uses-s1", &[("s1", s1.clone())]);
    let s2 = SchedulerBuilder::new("s2").fork(move |_, _| {
        let uses_s1 = uses_s1.clone();
        async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(vec![Fork::new(uses_s1)])
        }
    });

    let summary = with_timeout(run(RunConfig::new(vec![s1, s2]))).await.unwrap();

    assert!(summary.successful, "{summary:?}");
    assert_eq!(s1_runs.load(Ordering::SeqCst), 1);
    let mut executed = summary.executed_names();
    executed.sort();
    assert_eq!(executed, vec!["s1", "s2", "slow", "uses-s1"]);
    assert_eq!(seen.lock().unwrap()[0]["s1"], json!(["slow-done"]));
}
