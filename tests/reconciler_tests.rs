//! # Reconciler Integration Tests
//!
//! Drives VM resources through the reconciler against [`MockExecutor`]'s
//! simulated `gcloud compute instances`.
//!
//! These tests verify:
//! - Absent → Creating → Ready with a stable external id
//! - Idempotence (a second run only describes)
//! - In-place updates versus immutable changes, including VM sizing read
//!   back from the machine type
//! - Provisioning timeout and cancellation leave the resource alone
//! - Destroy confirmation and batch isolation

mod common;

use common::{test_config, MockExecutor};
use infra_reconciler::controller::executor::{ExecutionResult, ProcessExecutor};
use infra_reconciler::controller::reconciler::{
    cancellation, KindCommands, PlannedAction, Reconciler, ReconcilerError,
};
use infra_reconciler::{ResourceKind, ResourceSpec, ResourceStatus};
use std::sync::Arc;
use std::time::Duration;

fn setup(settle_after: usize) -> (Arc<MockExecutor>, Reconciler, tempfile::TempDir) {
    let store = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(MockExecutor::new(settle_after));
    let exec: Arc<dyn ProcessExecutor> = mock.clone();
    let reconciler = Reconciler::new(exec, test_config(store.path())).expect("reconciler");
    (mock, reconciler, store)
}

fn w1() -> ResourceSpec {
    ResourceSpec::new(ResourceKind::Vm, "w1")
        .with_parameter("cores", "2")
        .with_parameter("memory", "2GB")
        .with_parameter("zone", "europe-west1-b")
}

#[tokio::test]
async fn test_vm_w1_is_created_then_left_alone() {
    let (mock, reconciler, _store) = setup(2);
    let (_handle, cancel) = cancellation();

    let first = reconciler
        .reconcile(&w1(), &cancel)
        .await
        .expect("first reconcile should succeed");
    assert_eq!(first.status, ResourceStatus::Ready);
    let external_id = first.external_id.clone().expect("external id");
    assert!(!external_id.is_empty());

    assert_eq!(mock.count("gcloud compute instances create w1"), 1);
    // Absent, then two PROVISIONING polls, then RUNNING
    assert_eq!(mock.count("gcloud compute instances describe w1"), 4);
    let create = mock
        .calls()
        .into_iter()
        .find(|c| c.line().starts_with("gcloud compute instances create w1"))
        .expect("create call");
    assert!(create.args.contains(&"--custom-cpu=2".to_string()));
    assert!(create.args.contains(&"--custom-memory=2GB".to_string()));
    assert!(create.args.contains(&"--zone=europe-west1-b".to_string()));

    mock.clear_calls();
    let second = reconciler
        .reconcile(&w1(), &cancel)
        .await
        .expect("second reconcile should succeed");
    assert_eq!(second, first);
    assert_eq!(second.external_id.as_deref(), Some(external_id.as_str()));

    let calls = mock.calls();
    assert_eq!(calls.len(), 1, "unchanged VM must only be described: {calls:?}");
    assert!(calls[0].line().starts_with("gcloud compute instances describe w1"));
}

#[tokio::test]
async fn test_plan_is_read_only() {
    let (mock, reconciler, _store) = setup(0);

    let plan = reconciler.plan(&w1()).await.expect("plan");
    assert_eq!(plan.action, PlannedAction::Create);
    assert_eq!(plan.current.status, ResourceStatus::Absent);
    assert_eq!(mock.count("gcloud compute instances create"), 0);

    let (_handle, cancel) = cancellation();
    reconciler.reconcile(&w1(), &cancel).await.expect("reconcile");
    let plan = reconciler.plan(&w1()).await.expect("plan");
    assert!(plan.is_noop());
}

#[tokio::test]
async fn test_matching_self_link_is_not_drift() {
    let (mock, reconciler, _store) = setup(0);
    mock.seed_vm("w1", "custom-2-2048");
    let (_handle, cancel) = cancellation();

    let spec = w1().with_parameter("machine-type", "custom-2-2048");
    let state = reconciler.reconcile(&spec, &cancel).await.expect("reconcile");
    assert_eq!(state.status, ResourceStatus::Ready);
    assert_eq!(mock.count("gcloud compute instances update"), 0);
}

#[tokio::test]
async fn test_immutable_change_is_rejected_without_touching_the_vm() {
    let (mock, reconciler, _store) = setup(0);
    mock.seed_vm("w1", "custom-2-2048");
    let (_handle, cancel) = cancellation();

    let spec = w1().with_parameter("machine-type", "e2-standard-4");
    let err = reconciler
        .reconcile(&spec, &cancel)
        .await
        .expect_err("machine type cannot change in place");
    match &err {
        ReconcilerError::ImmutableFieldChanged {
            field, declared, ..
        } => {
            assert_eq!(field, "machine-type");
            assert_eq!(declared, "e2-standard-4");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_transient());
    assert_eq!(mock.count("gcloud compute instances update"), 0);
    assert_eq!(mock.count("gcloud compute instances delete"), 0);
    assert_eq!(mock.count("gcloud compute instances create"), 0);
}

#[tokio::test]
async fn test_resize_of_custom_vm_is_an_immutable_change() {
    let (mock, reconciler, _store) = setup(0);
    let (_handle, cancel) = cancellation();
    let created = reconciler.reconcile(&w1(), &cancel).await.expect("create");
    assert!(created
        .attribute("machineType")
        .is_some_and(|t| t.ends_with("/machineTypes/custom-2-2048")));
    assert_eq!(created.attribute("networkInterfaces[0].networkIP"), Some("10.132.0.2"));

    mock.clear_calls();
    let err = reconciler
        .reconcile(&w1().with_parameter("cores", "4"), &cancel)
        .await
        .expect_err("cores cannot change in place");
    match &err {
        ReconcilerError::ImmutableFieldChanged {
            field,
            declared,
            actual,
            ..
        } => {
            assert_eq!(field, "cores");
            assert_eq!(declared, "4");
            assert_eq!(actual, "2");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(mock.count("gcloud compute instances update"), 0);
    assert_eq!(mock.count("gcloud compute instances create"), 0);
    assert_eq!(mock.count("gcloud compute instances delete"), 0);

    let err = reconciler
        .reconcile(&w1().with_parameter("memory", "8GB"), &cancel)
        .await
        .expect_err("memory cannot change in place");
    assert!(matches!(
        err,
        ReconcilerError::ImmutableFieldChanged { ref field, ref actual, .. }
            if field == "memory" && actual == "2048MB"
    ));

    let plan = reconciler
        .plan(&w1().with_parameter("cores", "4"))
        .await
        .expect("plan");
    assert!(matches!(plan.action, PlannedAction::Blocked { ref change } if change.field == "cores"));
}

#[tokio::test]
async fn test_same_size_in_other_units_is_not_drift() {
    let (mock, reconciler, _store) = setup(0);
    mock.seed_vm("w1", "custom-2-2048");
    let (_handle, cancel) = cancellation();

    let spec = w1().with_parameter("memory", "2048MB");
    let state = reconciler.reconcile(&spec, &cancel).await.expect("reconcile");
    assert_eq!(state.status, ResourceStatus::Ready);
    let calls = mock.calls();
    assert_eq!(calls.len(), 1, "matching VM must only be described: {calls:?}");
}

#[tokio::test]
async fn test_declared_sizing_on_predefined_type_is_rejected() {
    let (mock, reconciler, _store) = setup(0);
    mock.seed_vm("w1", "e2-small");
    let (_handle, cancel) = cancellation();

    let err = reconciler
        .reconcile(&w1(), &cancel)
        .await
        .expect_err("e2-small is not custom-2-2048");
    assert!(matches!(
        err,
        ReconcilerError::ImmutableFieldChanged { ref field, ref actual, .. }
            if field == "cores" && actual == "e2-small"
    ));
    assert_eq!(mock.count("gcloud compute instances update"), 0);
}

#[tokio::test]
async fn test_min_cpu_platform_is_updated_in_place() {
    let (mock, reconciler, _store) = setup(0);
    let (_handle, cancel) = cancellation();
    reconciler
        .reconcile(&w1().with_parameter("min-cpu-platform", "Intel Cascade Lake"), &cancel)
        .await
        .expect("create");

    let state = reconciler
        .reconcile(&w1().with_parameter("min-cpu-platform", "Intel Ice Lake"), &cancel)
        .await
        .expect("update");
    assert_eq!(state.attribute("minCpuPlatform"), Some("Intel Ice Lake"));
    assert_eq!(mock.count("gcloud compute instances update w1"), 1);
}

#[tokio::test]
async fn test_mutable_labels_are_updated_in_place() {
    let (mock, reconciler, _store) = setup(0);
    let (_handle, cancel) = cancellation();

    reconciler
        .reconcile(&w1().with_parameter("labels", "env=prod"), &cancel)
        .await
        .expect("create");

    let staging = w1().with_parameter("labels", "env=staging");
    let state = reconciler.reconcile(&staging, &cancel).await.expect("update");
    assert_eq!(state.attribute("labels.env"), Some("staging"));

    let update = mock
        .calls()
        .into_iter()
        .find(|c| c.line().starts_with("gcloud compute instances update w1"))
        .expect("update call");
    assert!(update.args.contains(&"--update-labels=env=staging".to_string()));
    assert!(!update.args.iter().any(|a| a.starts_with("--custom-cpu")));
    assert_eq!(mock.count("gcloud compute instances create"), 1);

    mock.clear_calls();
    reconciler.reconcile(&staging, &cancel).await.expect("no-op");
    assert_eq!(mock.count("gcloud compute instances update"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_timeout_leaves_resource_in_place() {
    let store = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(MockExecutor::default());
    mock.seed_stuck_vm("w1");
    let mut config = test_config(store.path());
    config.provisioning_max_wait_secs = 1;
    let exec: Arc<dyn ProcessExecutor> = mock.clone();
    let reconciler = Reconciler::new(exec, config).expect("reconciler");
    let (_handle, cancel) = cancellation();

    let err = reconciler
        .reconcile(&w1(), &cancel)
        .await
        .expect_err("a VM that never settles must time out");
    match &err {
        ReconcilerError::ProvisioningTimeout {
            waited,
            last_status,
            ..
        } => {
            assert!(*waited >= Duration::from_secs(1));
            assert_eq!(*last_status, ResourceStatus::Creating);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_transient());
    assert_eq!(mock.count("gcloud compute instances delete"), 0);
    assert_eq!(mock.count("gcloud compute instances create"), 0);
}

#[tokio::test]
async fn test_cancellation_aborts_the_confirmation_poll() {
    let store = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(MockExecutor::default());
    mock.seed_stuck_vm("w1");
    let mut config = test_config(store.path());
    config.provisioning_max_wait_secs = 60;
    let exec: Arc<dyn ProcessExecutor> = mock.clone();
    let reconciler = Reconciler::new(exec, config).expect("reconciler");
    let (handle, cancel) = cancellation();

    let vm = w1();
    let (result, ()) = tokio::join!(reconciler.reconcile(&vm, &cancel), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    match result {
        Err(ReconcilerError::Cancelled { operation, .. }) => {
            assert_eq!(operation, "readiness confirmation");
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(mock.count("gcloud compute instances delete"), 0);
}

#[tokio::test]
async fn test_cancelled_signal_runs_nothing() {
    let (mock, reconciler, _store) = setup(0);
    let (handle, cancel) = cancellation();
    handle.cancel();

    let result = reconciler.reconcile(&w1(), &cancel).await;
    assert!(matches!(result, Err(ReconcilerError::Cancelled { .. })));
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_destroy_confirms_deletion_and_is_idempotent() {
    let (mock, reconciler, _store) = setup(1);
    let (_handle, cancel) = cancellation();
    reconciler.reconcile(&w1(), &cancel).await.expect("create");

    let state = reconciler.destroy(&w1(), &cancel).await.expect("destroy");
    assert_eq!(state.status, ResourceStatus::Absent);
    assert_eq!(mock.count("gcloud compute instances delete w1"), 1);

    mock.clear_calls();
    let state = reconciler.destroy(&w1(), &cancel).await.expect("destroy again");
    assert_eq!(state.status, ResourceStatus::Absent);
    assert_eq!(mock.count("gcloud compute instances delete"), 0);
}

#[tokio::test]
async fn test_reconcile_all_isolates_failures_and_keeps_order() {
    let (mock, reconciler, _store) = setup(0);
    mock.respond_always(
        "gcloud compute instances create bad",
        ExecutionResult::failure(1, "ERROR: (gcloud.compute.instances.create) Quota 'CPUS' exceeded."),
    );
    let (_handle, cancel) = cancellation();

    let specs = vec![
        ResourceSpec::new(ResourceKind::Vm, "bad"),
        w1(),
        ResourceSpec::new(ResourceKind::Vm, "w2"),
    ];
    let results = reconciler.reconcile_all(&specs, &cancel).await;

    let names: Vec<_> = results.iter().map(|(key, _)| key.name.as_str()).collect();
    assert_eq!(names, vec!["bad", "w1", "w2"]);
    match &results[0].1 {
        Err(ReconcilerError::ExternalCommandFailed {
            action, message, ..
        }) => {
            assert_eq!(*action, "create");
            assert!(message.contains("Quota"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(results[1].1.is_ok());
    assert!(results[2].1.is_ok());
}

#[tokio::test]
async fn test_failing_health_check_marks_degraded() {
    let store = tempfile::tempdir().expect("tempdir");
    let mock = Arc::new(MockExecutor::new(0));
    mock.respond_always("probe w1", ExecutionResult::failure(7, "connection refused"));
    let commands = KindCommands {
        health_check: Some(vec!["probe".to_string(), "{name}".to_string()]),
        ..KindCommands::vm_defaults()
    };
    let exec: Arc<dyn ProcessExecutor> = mock.clone();
    let reconciler = Reconciler::new(exec, test_config(store.path()))
        .expect("reconciler")
        .with_commands(ResourceKind::Vm, commands)
        .expect("override");
    let (_handle, cancel) = cancellation();

    let state = reconciler.reconcile(&w1(), &cancel).await.expect("reconcile");
    assert_eq!(state.status, ResourceStatus::Degraded);
    assert_eq!(mock.count("probe w1"), 1);
}

#[tokio::test]
async fn test_unreadable_describe_is_retried_once() {
    let (mock, reconciler, _store) = setup(0);
    mock.seed_vm("w1", "custom-2-2048");
    mock.respond_once(
        "gcloud compute instances describe w1",
        ExecutionResult::success("Updating instance metadata..."),
    );
    let (_handle, cancel) = cancellation();

    let state = reconciler.reconcile(&w1(), &cancel).await.expect("retry succeeds");
    assert_eq!(state.status, ResourceStatus::Ready);
    assert_eq!(mock.count("gcloud compute instances describe w1"), 2);

    mock.respond_once("gcloud compute instances describe w1", ExecutionResult::success("garbage"));
    mock.respond_once("gcloud compute instances describe w1", ExecutionResult::success("garbage"));
    let err = reconciler
        .reconcile(&w1(), &cancel)
        .await
        .expect_err("two unreadable outputs fail");
    assert!(matches!(err, ReconcilerError::MalformedOutput(_)));
}
