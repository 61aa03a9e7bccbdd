//! End-to-end dispatch of sync registrations against the in-memory engine.

mod common;

use common::{test_config, vars, wait_until, CallRecorder, CommitGatedHost, Scenario, WAIT};
use external_task_handler::engine::{
    ActivityDefinition, InMemoryWorkflowEngine, InstanceState, ProcessDefinition, Variables,
};
use external_task_handler::host::TokioExecutionHost;
use external_task_handler::processor::{
    sync_processor, BusinessError, ProcessingError, RetryableFailure,
};
use external_task_handler::registry::RegistrationOptions;
use external_task_handler::{ExternalTaskDispatcher, HandlerConfig};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn payment_process() -> ProcessDefinition {
    ProcessDefinition::new("payment")
        .activity(ActivityDefinition::manual_task("Received"))
        .activity(ActivityDefinition::service_task("Charge", "charge").with_error_boundary("Declined"))
        .activity(ActivityDefinition::manual_task("Receipt"))
        .activity(ActivityDefinition::manual_task("Declined"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_successful_processing_completes_task() {
    let scenario = Scenario::new(payment_process());
    let recorder = CallRecorder::new();

    let calls = recorder.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let calls = calls.clone();
                async move {
                    calls.record(context.retries);
                    assert_eq!(context.business_key.as_deref(), Some("bk-1"));
                    assert_eq!(context.variables.get("amount"), Some(&json!(42)));
                    let mut variables = Variables::new();
                    variables.insert("status".to_string(), json!("success"));
                    Ok(variables)
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", vars(&[("amount", json!(42))]));

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(
        wait_until(WAIT, || engine.process_instance(&id).is_some_and(|i| i.is_ended())).await,
        "instance should complete"
    );

    let instance = scenario.engine.process_instance(&instance_id).unwrap();
    assert_eq!(instance.state, InstanceState::Completed);
    assert_eq!(instance.variables.get("status"), Some(&json!("success")));
    assert_eq!(instance.history, vec!["Received", "Charge", "Receipt", "Declined"]);
    assert_eq!(recorder.calls(), 1);
    assert_eq!(recorder.retries_seen(), vec![None]);
    assert!(scenario.engine.incidents().is_empty());

    scenario.settle().await;
    let stats = scenario.dispatcher.stats();
    assert_eq!(stats.tasks_leased, 1);
    assert_eq!(stats.tasks_completed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_business_error_follows_error_path_without_incident() {
    let scenario = Scenario::new(payment_process());

    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move {
                let mut variables = Variables::new();
                variables.insert("declineReason".to_string(), json!("insufficient funds"));
                Err(BusinessError::new("card_declined", "Card was declined")
                    .with_variables(variables)
                    .into())
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&id).is_some_and(|i| i.is_ended())).await);

    let instance = scenario.engine.process_instance(&instance_id).unwrap();
    assert_eq!(instance.business_errors, vec!["card_declined"]);
    assert_eq!(instance.history, vec!["Received", "Charge", "Declined"]);
    assert_eq!(
        instance.variables.get("declineReason"),
        Some(&json!("insufficient funds"))
    );
    assert!(scenario.engine.incidents().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_business_error_without_boundary_ends_instance() {
    let scenario = Scenario::new(
        ProcessDefinition::new("shipping").activity(ActivityDefinition::send_task("Ship", "ship")),
    );
    scenario
        .dispatcher
        .register_sync(
            "shipping",
            "ship",
            sync_processor(|_context| async move {
                Err(ProcessingError::business("no_stock", "Nothing left to ship"))
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("shipping", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&id).is_some_and(|i| i.is_ended())).await);
    assert_eq!(
        scenario.engine.process_instance(&instance_id).unwrap().state,
        InstanceState::EndedByError {
            error_code: "no_stock".to_string()
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retryable_failure_retries_with_backoff_then_raises_incident() {
    let scenario = Scenario::new(payment_process());
    let recorder = CallRecorder::new();

    let calls = recorder.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let calls = calls.clone();
                async move {
                    calls.record(context.retries);
                    Err(RetryableFailure::new(
                        "gateway unavailable",
                        3,
                        vec![Duration::from_millis(50), Duration::from_millis(100)],
                    )
                    .into())
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(
        wait_until(WAIT, || !engine.open_incidents(&id).is_empty()).await,
        "an incident should be raised once the attempts are used up"
    );

    // no further attempt after the incident
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(recorder.calls(), 3);
    assert_eq!(recorder.retries_seen(), vec![None, Some(2), Some(1)]);

    let gaps = recorder.gaps();
    assert!(gaps[0] >= Duration::from_millis(50), "first gap was {:?}", gaps[0]);
    assert!(gaps[1] >= Duration::from_millis(100), "second gap was {:?}", gaps[1]);

    let incidents = scenario.engine.open_incidents(&instance_id);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].message, "gateway unavailable");

    let task = scenario.engine.task_for_instance(&instance_id).unwrap();
    assert_eq!(task.retries, Some(0));

    let stats = scenario.dispatcher.stats();
    assert_eq!(stats.retries_scheduled, 2);
    assert_eq!(stats.incidents_raised, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retryable_failure_without_backoff_uses_default_delay() {
    let scenario = Scenario::new(payment_process());
    let recorder = CallRecorder::new();

    let calls = recorder.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let calls = calls.clone();
                async move {
                    if calls.record(context.retries) == 1 {
                        return Err(RetryableFailure::new("flaky", 2, Vec::new()).into());
                    }
                    Ok(Variables::new())
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&id).is_some_and(|i| i.is_ended())).await);
    assert_eq!(recorder.calls(), 2);
    assert!(recorder.gaps()[0] >= Duration::from_millis(test_config().default_retry_delay_ms));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unexpected_failure_raises_incident_with_details() {
    let scenario = Scenario::new(payment_process());
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move {
                let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
                Err(anyhow::Error::new(cause).context("charging failed").into())
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || !engine.open_incidents(&id).is_empty()).await);

    let incident = &scenario.engine.open_incidents(&instance_id)[0];
    assert_eq!(incident.message, "charging failed");
    assert!(incident.details.contains("refused"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_processor_raises_incident() {
    let scenario = Scenario::new(payment_process());
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|context| async move {
                if context.retries.is_none() {
                    panic!("processor bug");
                }
                Ok(Variables::new())
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());

    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || !engine.open_incidents(&id).is_empty()).await);
    assert!(scenario.engine.open_incidents(&instance_id)[0]
        .message
        .contains("processor bug"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweep_picks_up_tasks_created_before_registration() {
    let scenario = Scenario::new(payment_process());
    let first = scenario.start("payment", Variables::new());
    let second = scenario.start("payment", Variables::new());
    scenario.settle().await;

    // nothing registered yet: the tasks just wait
    assert!(!scenario.engine.process_instance(&first).unwrap().is_ended());
    assert!(scenario
        .engine
        .external_tasks()
        .iter()
        .all(|task| task.worker_id.is_none()));

    let recorder = CallRecorder::new();
    let calls = recorder.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let calls = calls.clone();
                async move {
                    calls.record(context.retries);
                    Ok(Variables::new())
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    assert_eq!(scenario.dispatcher.sweep(), 1);

    let engine = scenario.engine.clone();
    assert!(
        wait_until(WAIT, || {
            [&first, &second]
                .iter()
                .all(|id| engine.process_instance(id).is_some_and(|i| i.is_ended()))
        })
        .await
    );
    assert_eq!(recorder.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fetch_and_dispatch_leases_only_registered_pairs() {
    let scenario = Scenario::new(payment_process());
    scenario.start("payment", Variables::new());
    scenario.settle().await;

    assert_eq!(scenario.dispatcher.fetch_and_dispatch("payment", "charge").await.unwrap(), 0);

    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move { Ok(Variables::new()) }),
            RegistrationOptions::new().with_lock_timeout(Duration::from_secs(5)),
        )
        .unwrap();

    assert_eq!(scenario.dispatcher.fetch_and_dispatch("payment", "charge").await.unwrap(), 1);
    scenario.settle().await;
    assert!(scenario.engine.external_tasks().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lease_uses_registration_variable_filter() {
    let scenario = Scenario::new(payment_process());
    let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<Variables>::new()));

    let sink = seen.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(context.variables);
                    Ok(Variables::new())
                }
            }),
            RegistrationOptions::new().fetch_variables(["amount"]),
        )
        .unwrap();

    let instance_id = scenario.start(
        "payment",
        vars(&[("amount", json!(10)), ("secret", json!("hidden"))]),
    );

    let engine = scenario.engine.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&instance_id).is_some_and(|i| i.is_ended())).await);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], vars(&[("amount", json!(10))]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_outage_is_counted_as_lease_failure() {
    let scenario = Scenario::new(payment_process());
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move { Ok(Variables::new()) }),
            RegistrationOptions::new(),
        )
        .unwrap();

    scenario.engine.set_available(false);
    scenario.dispatcher.sweep();
    scenario.settle().await;
    assert_eq!(scenario.dispatcher.stats().lease_failures, 1);

    scenario.engine.set_available(true);
    let instance_id = scenario.start("payment", Variables::new());
    let engine = scenario.engine.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&instance_id).is_some_and(|i| i.is_ended())).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_runs_until_shut_down() {
    let config = HandlerConfig {
        sweep_interval_ms: 20,
        sweep_on_startup: true,
        ..test_config()
    };
    let scenario = Scenario::with_config(payment_process(), config);
    let instance_id = scenario.start("payment", Variables::new());

    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move { Ok(Variables::new()) }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let sweeper = scenario.dispatcher.start_sweeper();
    assert!(sweeper.is_running());

    let engine = scenario.engine.clone();
    assert!(
        wait_until(WAIT, || engine.process_instance(&instance_id).is_some_and(|i| i.is_ended())).await,
        "the sweeper should lease the task started before registration"
    );

    tokio::time::timeout(WAIT, sweeper.shutdown())
        .await
        .expect("sweeper stops on shutdown");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweeper_without_startup_sweep_waits_for_interval() {
    let config = HandlerConfig {
        sweep_interval_ms: 10_000,
        sweep_on_startup: false,
        ..test_config()
    };
    let scenario = Scenario::with_config(payment_process(), config);
    let instance_id = scenario.start("payment", Variables::new());

    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move { Ok(Variables::new()) }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let sweeper = scenario.dispatcher.start_sweeper();
    tokio::time::sleep(Duration::from_millis(100)).await;
    scenario.settle().await;

    let task = scenario.engine.task_for_instance(&instance_id).unwrap();
    assert!(task.worker_id.is_none());
    assert_eq!(scenario.dispatcher.stats().tasks_leased, 0);

    sweeper.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_id_change_applies_to_next_lease() {
    let scenario = Scenario::new(payment_process());
    scenario.dispatcher.set_worker_id("worker-b");
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Variables::new())
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", Variables::new());
    let engine = scenario.engine.clone();
    assert!(
        wait_until(WAIT, || {
            engine
                .task_for_instance(&instance_id)
                .is_some_and(|task| task.worker_id.as_deref() == Some("worker-b"))
        })
        .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_lock_timeout_change_applies_to_next_lease() {
    let scenario = Scenario::new(payment_process());
    scenario
        .dispatcher
        .set_default_lock_timeout(Duration::from_secs(5))
        .unwrap();
    assert_eq!(scenario.dispatcher.config().default_lock_timeout_ms, 5_000);

    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(|_context| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Variables::new())
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let before = chrono::Utc::now();
    let instance_id = scenario.start("payment", Variables::new());
    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || engine.task_for_instance(&id).is_some_and(|t| t.worker_id.is_some())).await);

    let expiry = scenario
        .engine
        .task_for_instance(&instance_id)
        .and_then(|task| task.lock_expiration)
        .unwrap();
    assert!(expiry <= chrono::Utc::now() + chrono::Duration::seconds(5));
    assert!(expiry >= before + chrono::Duration::seconds(4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_completion_carries_exactly_the_returned_variables() {
    let scenario = Scenario::new(payment_process());
    let task_ids = Arc::new(Mutex::new(Vec::<String>::new()));

    let seen = task_ids.clone();
    scenario
        .dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(context.external_task_id.clone());
                    Ok(vars(&[("a", json!(1))]))
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = scenario.start("payment", vars(&[("amount", json!(7))]));
    let engine = scenario.engine.clone();
    let id = instance_id.clone();
    assert!(wait_until(WAIT, || engine.process_instance(&id).is_some_and(|i| i.is_ended())).await);

    let task_ids = task_ids.lock().clone();
    assert_eq!(task_ids.len(), 1);
    assert_eq!(
        scenario.engine.completion_variables(&task_ids[0]),
        Some(vars(&[("a", json!(1))]))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_leased_tasks_are_processed_only_after_commit() {
    let engine = Arc::new(InMemoryWorkflowEngine::new());
    engine.deploy(payment_process());
    let host = CommitGatedHost::new(TokioExecutionHost::current(4));
    let dispatcher = ExternalTaskDispatcher::new(
        engine.clone(),
        engine.clone(),
        Arc::new(host.clone()),
        test_config(),
    )
    .unwrap();

    let recorder = CallRecorder::new();
    let calls = recorder.clone();
    dispatcher
        .register_sync(
            "payment",
            "charge",
            sync_processor(move |context| {
                let calls = calls.clone();
                async move {
                    calls.record(context.retries);
                    Ok(Variables::new())
                }
            }),
            RegistrationOptions::new(),
        )
        .unwrap();

    let instance_id = engine
        .start_process_instance("payment", Some("bk-1"), Variables::new())
        .unwrap();
    assert_eq!(dispatcher.fetch_and_dispatch("payment", "charge").await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.calls(), 0);
    assert_eq!(host.pending(), 1);
    assert!(engine
        .task_for_instance(&instance_id)
        .is_some_and(|task| task.worker_id.as_deref() == Some("test-worker")));

    host.commit();
    assert!(wait_until(WAIT, || engine.process_instance(&instance_id).is_some_and(|i| i.is_ended())).await);
    assert_eq!(recorder.calls(), 1);
}
