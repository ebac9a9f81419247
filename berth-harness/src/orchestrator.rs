//! Arrangement orchestration -- build, gate, provision, run, tear down.
//!
//! The [`Orchestrator`] wraps a test body in a complete, disposable
//! environment and guarantees the environment is removed afterwards.
//!
//! # Attempt Sequence
//!
//! 1. Build the stack under the single-flight lock
//! 2. Wait for the application API
//! 3. Run the configured provisioning stages
//! 4. Run the test body
//! 5. Tear the stack down under the lock (always, including on panic)
//!
//! The whole sequence is one attempt. Any failure except a configuration
//! error discards the attempt and the retry policy starts over from step 1.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::task::TaskTracker;

use berth_core::config::BerthConfig;
use berth_core::{BerthError, HealthPoller, HttpProbe, RetryPolicy};
use berth_provision::{
    ProvisioningPipeline, ProvisioningStage, ProvisioningTool, TargetId, TerraformCli,
};
use berth_runtime::{
    ArrangedStack, BollardRuntime, CleanupError, ContainerRuntime, StackBuilder, StackGuard,
    StackHandle, StackLock,
};

use crate::client::ApiClient;
use crate::state::{ArrangementState, StateTracker};

/// Everything a test body gets to work with.
#[derive(Debug, Clone)]
pub struct TestContext {
    /// Containers and addresses of the arranged stack.
    pub stack: ArrangedStack,
    /// API client scoped to `target`.
    pub client: ApiClient,
    /// Workspace produced by the provisioning stages.
    pub target: TargetId,
}

/// Arranged environment whose lifetime the caller manages.
///
/// Call [`release`](Self::release) when done. Dropping it without releasing
/// still tears the stack down in the background.
pub struct ArrangedEnvironment<R: ContainerRuntime> {
    context: TestContext,
    guard: StackGuard<R>,
    tracker: StateTracker,
}

impl<R: ContainerRuntime> ArrangedEnvironment<R> {
    pub fn context(&self) -> &TestContext {
        &self.context
    }

    pub fn stack(&self) -> &ArrangedStack {
        &self.context.stack
    }

    pub fn client(&self) -> &ApiClient {
        &self.context.client
    }

    pub fn target(&self) -> &TargetId {
        &self.context.target
    }

    /// Tear the stack down under the single-flight lock.
    pub async fn release(self) -> Vec<CleanupError> {
        let errors = self.guard.release().await;
        self.tracker.transition(ArrangementState::TornDown);
        log_teardown(&errors);
        errors
    }
}

/// Test environment orchestrator.
///
/// Owns the configuration, the container runtime, the provisioning tool and
/// the single-flight lock shared with every other orchestrator in the process.
pub struct Orchestrator<R: ContainerRuntime, T: ProvisioningTool> {
    config: BerthConfig,
    runtime: Arc<R>,
    tool: Arc<T>,
    lock: StackLock,
    poller: HealthPoller,
    stages: Vec<ProvisioningStage>,
    extra_env: BTreeMap<String, String>,
    tracker: StateTracker,
    background: TaskTracker,
}

impl Orchestrator<BollardRuntime, TerraformCli> {
    /// Connect to the local Docker daemon and drive the configured
    /// provisioning binary.
    ///
    /// # Errors
    ///
    /// Returns an error if the Docker client cannot be created.
    pub fn connect(config: BerthConfig) -> Result<Self, BerthError> {
        let runtime = BollardRuntime::connect_local()?;
        let tool = TerraformCli::from_config(&config.provision);
        Ok(Self::new(config, Arc::new(runtime), Arc::new(tool)))
    }

    /// Defaults plus `BERTH_*` / `LICENSE` environment overrides.
    pub fn from_env() -> Result<Self, BerthError> {
        Self::connect(BerthConfig::from_env()?)
    }
}

impl<R: ContainerRuntime, T: ProvisioningTool> Orchestrator<R, T> {
    pub fn new(config: BerthConfig, runtime: Arc<R>, tool: Arc<T>) -> Self {
        let poller = HealthPoller::from_config(&config.health);
        Self {
            config,
            runtime,
            tool,
            lock: StackLock::global(),
            poller,
            stages: Vec::new(),
            extra_env: BTreeMap::new(),
            tracker: StateTracker::new(),
            background: TaskTracker::new(),
        }
    }

    /// Provisioning stages to run before every test body.
    pub fn with_stages(mut self, stages: Vec<ProvisioningStage>) -> Self {
        self.stages = stages;
        self
    }

    /// Replace the process-wide lock (tests use a private one).
    pub fn with_lock(mut self, lock: StackLock) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_poller(mut self, poller: HealthPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Extra application container environment. Base variables win on collision.
    pub fn with_extra_env(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra_env.extend(extra);
        self
    }

    pub fn config(&self) -> &BerthConfig {
        &self.config
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    /// State history of every attempt made so far.
    pub fn attempt_history(&self) -> Vec<Vec<ArrangementState>> {
        self.tracker.attempt_history()
    }

    /// Wait until every stack whose guard was dropped without release
    /// (a cancelled [`arrange`](Self::arrange), a dropped environment) has
    /// been torn down.
    pub async fn wait_for_background_teardown(&self) {
        self.background.close();
        self.background.wait().await;
        self.background.reopen();
    }

    /// Arrange a fresh environment, run `body` in it and tear it down.
    ///
    /// `body` may run more than once: each retry builds a new environment
    /// from scratch. A panic in `body` tears the stack down and is then
    /// resumed without further attempts.
    ///
    /// # Errors
    ///
    /// - [`BerthError::Config`] before any resource is created (never retried)
    /// - the last attempt's error once the retry budget is spent
    pub async fn arrange_and_run<F, Fut, E>(&self, body: F) -> Result<(), BerthError>
    where
        F: Fn(TestContext) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        self.preflight()?;
        RetryPolicy::from_config(&self.config.retry)
            .run_while(
                |attempt| self.run_attempt(attempt, &body),
                BerthError::is_retryable,
            )
            .await
    }

    /// Arrange and provision an environment and hand it to the caller.
    ///
    /// Retries like [`arrange_and_run`](Self::arrange_and_run); a failed
    /// attempt is torn down before the next one starts.
    pub async fn arrange(&self) -> Result<ArrangedEnvironment<R>, BerthError> {
        self.preflight()?;
        RetryPolicy::from_config(&self.config.retry)
            .run_while(|attempt| self.arrange_attempt(attempt), BerthError::is_retryable)
            .await
    }

    fn preflight(&self) -> Result<(), BerthError> {
        self.config.validate()?;
        self.config.application.require_license()?;
        Ok(())
    }

    fn new_guard(&self) -> StackGuard<R> {
        StackGuard::new(
            Arc::clone(&self.runtime),
            self.lock.clone(),
            self.config.cleanup.stop_timeout(),
        )
        .with_tracker(self.background.clone())
    }

    async fn run_attempt<F, Fut, E>(&self, attempt: u32, body: &F) -> Result<(), BerthError>
    where
        F: Fn(TestContext) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        tracing::info!(attempt, "starting arrangement attempt");
        self.tracker.begin_attempt();
        let mut guard = self.new_guard();

        let outcome = match self.build(guard.stack_mut()).await {
            Ok(stack) => AssertUnwindSafe(self.run_arranged(stack, body))
                .catch_unwind()
                .await,
            Err(e) => Ok(Err(e)),
        };

        if outcome.is_err() && self.tracker.current() == Some(ArrangementState::TestRunning) {
            self.tracker.transition(ArrangementState::Failed);
        }
        self.teardown(guard).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(attempt, "test body panicked after teardown");
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn arrange_attempt(&self, attempt: u32) -> Result<ArrangedEnvironment<R>, BerthError> {
        tracing::info!(attempt, "starting arrangement attempt");
        self.tracker.begin_attempt();
        let mut guard = self.new_guard();

        let prepared = match self.build(guard.stack_mut()).await {
            Ok(stack) => self.prepare(stack).await,
            Err(e) => Err(e),
        };

        match prepared {
            Ok(context) => Ok(ArrangedEnvironment {
                context,
                guard,
                tracker: self.tracker.clone(),
            }),
            Err(e) => {
                self.teardown(guard).await;
                Err(e)
            }
        }
    }

    /// Build the stack while holding the single-flight lock.
    async fn build(&self, stack: &mut StackHandle) -> Result<ArrangedStack, BerthError> {
        let _lock = self.lock.acquire().await;
        StackBuilder::new(self.runtime.as_ref(), &self.config)
            .with_poller(self.poller)
            .with_extra_env(self.extra_env.clone())
            .build_with_progress(stack, |progress| {
                self.tracker.transition(progress.into());
            })
            .await?;

        stack
            .snapshot()
            .ok_or_else(|| BerthError::Infrastructure("stack incomplete after build".to_owned()))
    }

    /// Gate on the API, then provision. The lock is not held here.
    async fn prepare(&self, stack: ArrangedStack) -> Result<TestContext, BerthError> {
        let app = &self.config.application;
        let probe = HttpProbe::new(
            format!("{}{}", stack.application_uri, app.api_path),
            self.config.health.request_timeout(),
        )?;
        self.poller.wait_for(&probe, app.api_timeout()).await?;

        let initial = TargetId::new(self.config.provision.default_target.as_str());
        let client = ApiClient::new(stack.application_uri.as_str(), &app.api_key)?
            .for_workspace(initial.clone());

        let target = if self.stages.is_empty() {
            initial
        } else {
            ProvisioningPipeline::new(
                self.tool.as_ref(),
                &self.config,
                stack.application_uri.as_str(),
                app.api_key.as_str(),
            )
            .with_poller(self.poller)
            .run(&self.stages, initial)
            .await?
        };
        self.tracker.transition(ArrangementState::Provisioned);
        tracing::info!(
            uri = stack.application_uri.as_str(),
            workspace = %target,
            "environment arranged"
        );

        Ok(TestContext {
            client: client.for_workspace(target.clone()),
            stack,
            target,
        })
    }

    async fn run_arranged<F, Fut, E>(&self, stack: ArrangedStack, body: &F) -> Result<(), BerthError>
    where
        F: Fn(TestContext) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let context = self.prepare(stack).await?;

        self.tracker.transition(ArrangementState::TestRunning);
        match body(context).await {
            Ok(()) => {
                self.tracker.transition(ArrangementState::Passed);
                tracing::info!("test body passed");
                Ok(())
            }
            Err(e) => {
                self.tracker.transition(ArrangementState::Failed);
                tracing::error!(error = %e, "test body failed");
                Err(BerthError::TestBody(e.to_string()))
            }
        }
    }

    async fn teardown(&self, guard: StackGuard<R>) {
        let errors = guard.release().await;
        self.tracker.transition(ArrangementState::TornDown);
        log_teardown(&errors);
    }
}

fn log_teardown(errors: &[CleanupError]) {
    if errors.is_empty() {
        tracing::info!("stack torn down");
    } else {
        tracing::warn!(failures = errors.len(), "stack torn down with cleanup failures");
    }
}
