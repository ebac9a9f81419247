//! Orchestrator integration tests.
//!
//! Runs whole attempts against `MockRuntime` and `MockTool`, with a wiremock
//! server standing in for the application API.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::json;
use tokio::sync::Barrier;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use berth_core::{BerthConfig, BerthError, HealthPoller};
use berth_harness::{Orchestrator, TestContext};
use berth_provision::ProvisioningStage;
use berth_provision::mock::{MockTool, ToolCall};
use berth_runtime::StackLock;
use berth_runtime::mock::{MockRuntime, RuntimeCall};

use berth_harness::ArrangementState::*;

const READY_LOGS: &str = "Starting server\nListening for HTTP requests on http://0.0.0.0:8080\n";

fn test_config(attempts: u32) -> BerthConfig {
    let mut config = BerthConfig::default();
    config.application.license = "bGljZW5zZQ==".to_owned();
    config.retry.attempts = attempts;
    config.retry.delay_secs = 0;
    config.provision.wait_for_api = false;
    config.provision.cleanup_delay_ms = 1;
    config
}

async fn api_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "Application": "Octopus Deploy" })))
        .mount(&server)
        .await;
    server
}

fn runtime_for(server: &MockServer) -> MockRuntime {
    let addr = server.address();
    MockRuntime::new()
        .with_logs(READY_LOGS)
        .with_host(addr.ip().to_string())
        .with_mapped_port(addr.port())
}

fn orchestrator(
    config: BerthConfig,
    runtime: &Arc<MockRuntime>,
    tool: &Arc<MockTool>,
) -> Orchestrator<MockRuntime, MockTool> {
    Orchestrator::new(config, Arc::clone(runtime), Arc::clone(tool))
        .with_lock(StackLock::new())
        .with_poller(HealthPoller::new(Duration::from_millis(10)))
}

fn removed_networks(runtime: &MockRuntime) -> usize {
    runtime.count(|c| matches!(c, RuntimeCall::RemoveNetwork(_)))
}

fn removed_containers(runtime: &MockRuntime) -> usize {
    runtime.count(|c| matches!(c, RuntimeCall::RemoveContainer(_)))
}

#[tokio::test]
async fn passing_body_runs_once_and_stack_is_torn_down() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(3), &runtime, &tool);
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    orchestrator
        .arrange_and_run(move |ctx: TestContext| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let root: serde_json::Value = ctx.client.get_json("/api").await.map_err(|e| e.to_string())?;
                assert_eq!(root["Application"], "Octopus Deploy");
                Ok::<_, String>(())
            }
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(removed_networks(&runtime), 1);
    assert_eq!(removed_containers(&runtime), 2);
    assert_eq!(
        orchestrator.attempt_history(),
        vec![vec![
            Idle,
            NetworkCreated,
            DatabaseReady,
            ApplicationReady,
            Provisioned,
            TestRunning,
            Passed,
            TornDown,
        ]]
    );
}

#[tokio::test]
async fn test_context_describes_the_stack() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(1), &runtime, &tool);
    let expected_uri = server.uri();

    orchestrator
        .arrange_and_run(move |ctx: TestContext| {
            let expected_uri = expected_uri.clone();
            async move {
                assert_eq!(ctx.stack.application_uri, expected_uri);
                assert!(ctx.stack.database_ip.starts_with("172.18.0."));
                assert_eq!(ctx.stack.database_port, 1433);
                assert_eq!(ctx.target.as_str(), "Spaces-1");
                assert_eq!(ctx.client.workspace().as_str(), "Spaces-1");
                Ok::<_, String>(())
            }
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn partial_build_failure_tears_down_created_resources_only() {
    let runtime = Arc::new(
        MockRuntime::new()
            .with_logs(READY_LOGS)
            .with_failing_image("octopusdeploy"),
    );
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(1), &runtime, &tool);
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let err = orchestrator
        .arrange_and_run(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::Infrastructure(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(removed_containers(&runtime), 1, "only the database existed");
    assert_eq!(removed_networks(&runtime), 1);
    assert_eq!(
        orchestrator.attempt_history(),
        vec![vec![Idle, NetworkCreated, DatabaseReady, TornDown]]
    );
}

#[tokio::test]
async fn failing_body_is_retried_with_fresh_stacks() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(3), &runtime, &tool);
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    let err = orchestrator
        .arrange_and_run(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(format!("assertion failed on call {n}"))
            }
        })
        .await
        .unwrap_err();

    match err {
        BerthError::TestBody(reason) => assert_eq!(reason, "assertion failed on call 3"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.count(|c| matches!(c, RuntimeCall::CreateNetwork(_))), 3);
    assert_eq!(removed_networks(&runtime), 3);

    let history = orchestrator.attempt_history();
    assert_eq!(history.len(), 3);
    for attempt in history {
        assert_eq!(&attempt[attempt.len() - 2..], &[Failed, TornDown]);
    }
}

#[tokio::test]
async fn body_that_passes_on_second_attempt_succeeds() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(3), &runtime, &tool);
    let calls = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&calls);
    orchestrator
        .arrange_and_run(move |_ctx| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("flaky".to_owned())
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(removed_networks(&runtime), 2);
}

#[tokio::test]
async fn missing_license_fails_before_any_resource_is_created() {
    let runtime = Arc::new(MockRuntime::new());
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(3);
    config.application.license = String::new();
    let orchestrator = orchestrator(config, &runtime, &tool);

    let err = orchestrator
        .arrange_and_run(|_ctx| async { Ok::<_, String>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::Config(_)));
    assert!(!err.is_retryable());
    assert!(runtime.calls().is_empty());
    assert!(orchestrator.attempt_history().is_empty());
}

#[tokio::test]
async fn invalid_license_encoding_is_a_config_error() {
    let runtime = Arc::new(MockRuntime::new());
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(3);
    config.application.license = "not base64!".to_owned();
    let orchestrator = orchestrator(config, &runtime, &tool);

    let err = orchestrator
        .arrange_and_run(|_ctx| async { Ok::<_, String>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::Config(_)));
    assert!(runtime.calls().is_empty());
}

#[tokio::test]
async fn workspace_created_by_first_stage_reaches_later_stages_and_body() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new().with_output("/stages/create", "octopus_space_id", json!("Spaces-2")));
    let orchestrator = orchestrator(test_config(1), &runtime, &tool).with_stages(vec![
        ProvisioningStage::new("/stages/create").output("octopus_space_id"),
        ProvisioningStage::new("/stages/populate").var("project_name", "Test"),
    ]);

    orchestrator
        .arrange_and_run(|ctx: TestContext| async move {
            assert_eq!(ctx.target.as_str(), "Spaces-2");
            assert_eq!(ctx.client.workspace().as_str(), "Spaces-2");
            Ok::<_, String>(())
        })
        .await
        .unwrap();

    let applied = tool.applied_vars();
    assert_eq!(applied.len(), 2);
    let space_of = |vars: &[berth_provision::Variable]| {
        vars.iter()
            .find(|v| v.name == "octopus_space_id")
            .map(|v| v.value.clone())
    };
    assert_eq!(space_of(&applied[0]).as_deref(), Some("Spaces-1"));
    assert_eq!(space_of(&applied[1]).as_deref(), Some("Spaces-2"));
    assert_eq!(applied[0][0].value, server.uri());
}

#[tokio::test]
async fn configured_default_target_seeds_stages_and_body() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(1);
    config.provision.default_target = "Spaces-7".to_owned();
    let orchestrator = orchestrator(config, &runtime, &tool)
        .with_stages(vec![ProvisioningStage::new("/stages/populate")]);

    orchestrator
        .arrange_and_run(|ctx: TestContext| async move {
            assert_eq!(ctx.target.as_str(), "Spaces-7");
            assert_eq!(ctx.client.workspace().as_str(), "Spaces-7");
            Ok::<_, String>(())
        })
        .await
        .unwrap();

    let applied = tool.applied_vars();
    let target = applied[0]
        .iter()
        .find(|v| v.name == "octopus_space_id")
        .map(|v| v.value.as_str());
    assert_eq!(target, Some("Spaces-7"));
}

#[tokio::test]
async fn configured_default_target_is_used_without_stages() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(1);
    config.provision.default_target = "Spaces-7".to_owned();
    let orchestrator = orchestrator(config, &runtime, &tool);

    orchestrator
        .arrange_and_run(|ctx: TestContext| async move {
            assert_eq!(ctx.target.as_str(), "Spaces-7");
            assert_eq!(ctx.client.workspace_path("projects"), "/api/Spaces-7/projects");
            Ok::<_, String>(())
        })
        .await
        .unwrap();
    assert!(tool.calls().is_empty());
}

#[tokio::test]
async fn missing_output_falls_back_to_configured_workspace() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(1);
    config.provision.fallback_target = Some("Spaces-9".to_owned());
    let orchestrator = orchestrator(config, &runtime, &tool).with_stages(vec![
        ProvisioningStage::new("/stages/create").output("octopus_space_id"),
    ]);

    orchestrator
        .arrange_and_run(|ctx: TestContext| async move {
            assert_eq!(ctx.target.as_str(), "Spaces-9");
            Ok::<_, String>(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn provisioning_failure_discards_the_attempt() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new().with_apply_failures("/stages/create", 1));
    let orchestrator = orchestrator(test_config(2), &runtime, &tool)
        .with_stages(vec![ProvisioningStage::new("/stages/create")]);

    orchestrator
        .arrange_and_run(|_ctx| async { Ok::<_, String>(()) })
        .await
        .unwrap();

    assert_eq!(removed_networks(&runtime), 2);
    assert_eq!(tool.count(|c| matches!(c, ToolCall::Apply { .. })), 2);
    let history = orchestrator.attempt_history();
    assert_eq!(history[0], vec![Idle, NetworkCreated, DatabaseReady, ApplicationReady, TornDown]);
    assert_eq!(history[1].last(), Some(&TornDown));
}

#[tokio::test]
async fn unready_api_is_a_readiness_error() {
    let server = api_server(503).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let mut config = test_config(1);
    config.application.api_timeout_secs = 0;
    let orchestrator = orchestrator(config, &runtime, &tool);

    let err = orchestrator
        .arrange_and_run(|_ctx| async { Ok::<_, String>(()) })
        .await
        .unwrap_err();

    assert!(matches!(err, BerthError::Readiness(_)));
    assert_eq!(removed_networks(&runtime), 1);
}

#[tokio::test]
async fn panicking_body_still_tears_down_the_stack() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(3), &runtime, &tool);

    let result = AssertUnwindSafe(orchestrator.arrange_and_run(|_ctx| async {
        if std::hint::black_box(true) {
            panic!("assertion inside test body");
        }
        Ok::<_, String>(())
    }))
    .catch_unwind()
    .await;

    assert!(result.is_err(), "panic should propagate");
    assert_eq!(removed_networks(&runtime), 1);
    assert_eq!(removed_containers(&runtime), 2);
    let history = orchestrator.attempt_history();
    assert_eq!(history.len(), 1, "a panic is not retried");
    assert_eq!(&history[0][history[0].len() - 2..], &[Failed, TornDown]);
}

#[tokio::test]
async fn lock_is_free_after_the_attempt() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let lock = StackLock::new();
    let orchestrator = orchestrator(test_config(1), &runtime, &tool).with_lock(lock.clone());

    let observed = lock.clone();
    orchestrator
        .arrange_and_run(move |_ctx| {
            let observed = observed.clone();
            async move {
                assert!(!observed.is_held(), "lock must not be held during the body");
                Ok::<_, String>(())
            }
        })
        .await
        .unwrap();

    assert!(!lock.is_held());
}

#[tokio::test]
async fn concurrent_attempts_build_and_tear_down_one_at_a_time() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server).with_latency(Duration::from_millis(20)));
    let tool = Arc::new(MockTool::new());
    let lock = StackLock::new();
    let first = orchestrator(test_config(1), &runtime, &tool).with_lock(lock.clone());
    let second = orchestrator(test_config(1), &runtime, &tool).with_lock(lock.clone());

    // Both bodies must be running at once for either to finish.
    let barrier = Arc::new(Barrier::new(2));
    let body = |barrier: Arc<Barrier>| {
        move |_ctx: TestContext| {
            let barrier = Arc::clone(&barrier);
            async move {
                tokio::time::timeout(Duration::from_secs(5), barrier.wait())
                    .await
                    .map(|_| ())
                    .map_err(|_| "bodies did not overlap".to_owned())
            }
        }
    };

    let (a, b) = tokio::join!(
        first.arrange_and_run(body(Arc::clone(&barrier))),
        second.arrange_and_run(body(Arc::clone(&barrier))),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(runtime.max_concurrent_mutations(), 1);
    assert_eq!(removed_networks(&runtime), 2);
    assert_eq!(removed_containers(&runtime), 4);
    assert!(!lock.is_held());
}

#[tokio::test]
async fn arranged_environment_is_torn_down_on_release() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(1), &runtime, &tool);

    let env = orchestrator.arrange().await.unwrap();
    assert_eq!(env.target().as_str(), "Spaces-1");
    assert_eq!(env.stack().application_uri, server.uri());
    assert_eq!(removed_networks(&runtime), 0);

    let errors = env.release().await;
    assert!(errors.is_empty());
    assert_eq!(removed_networks(&runtime), 1);
    assert_eq!(
        orchestrator.attempt_history()[0].last(),
        Some(&TornDown)
    );
}

#[tokio::test]
async fn dropped_environment_is_torn_down_in_background() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(1), &runtime, &tool);

    let env = orchestrator.arrange().await.unwrap();
    drop(env);

    for _ in 0..100 {
        if removed_networks(&runtime) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(removed_networks(&runtime), 1);
}

#[tokio::test]
async fn cancelled_arrange_is_torn_down_before_wait_returns() {
    let server = api_server(200).await;
    let runtime = Arc::new(runtime_for(&server).with_latency(Duration::from_millis(50)));
    let tool = Arc::new(MockTool::new());
    let orchestrator = orchestrator(test_config(1), &runtime, &tool);

    // The network exists and the database container is still starting.
    let interrupted = tokio::time::timeout(Duration::from_millis(75), orchestrator.arrange()).await;
    assert!(interrupted.is_err(), "arrange should still be building");

    orchestrator.wait_for_background_teardown().await;

    let created = runtime.count(|c| matches!(c, RuntimeCall::CreateNetwork(_)));
    assert_eq!(created, 1);
    assert_eq!(removed_networks(&runtime), 1);
    assert!(tool.calls().is_empty());
}
