//! 프로비저닝 파이프라인
//!
//! 단계 목록을 순서대로 실행하면서 target ID를 다음 단계로 넘깁니다.
//!
//! # 단계별 순서
//! 1. stale state 정리 (재시도, 실패해도 계속)
//! 2. `init` (`skip_init`이면 생략)
//! 3. API readiness 대기 (`wait_for_api`일 때, 실패해도 계속)
//! 4. `apply` -- server, API key, target 변수 뒤에 단계 변수
//! 5. output이 선언된 단계면 값을 읽어 target을 교체
//!
//! 어느 단계든 init/apply가 실패하면 나머지 단계는 실행하지 않습니다.

use std::path::Path;
use std::time::Duration;

use berth_core::config::{BerthConfig, ProvisionConfig};
use berth_core::{HealthPoller, HttpProbe, RetryPolicy};
use tracing::{error, info, warn};

use crate::error::ProvisionError;
use crate::stage::{ProvisioningStage, TargetId, Variable};
use crate::state::clean_stale_state;
use crate::tool::ProvisioningTool;

/// 단계 목록을 실행하는 파이프라인
pub struct ProvisioningPipeline<'a, T> {
    tool: &'a T,
    config: &'a ProvisionConfig,
    server: String,
    api_key: String,
    api_path: String,
    request_timeout: Duration,
    poller: HealthPoller,
    cleanup: RetryPolicy,
}

impl<'a, T: ProvisioningTool> ProvisioningPipeline<'a, T> {
    /// `server`는 애플리케이션의 외부 URI, `api_key`는 관리자 API key입니다.
    pub fn new(
        tool: &'a T,
        config: &'a BerthConfig,
        server: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let provision = &config.provision;
        Self {
            tool,
            config: provision,
            server: server.into(),
            api_key: api_key.into(),
            api_path: config.application.api_path.clone(),
            request_timeout: config.health.request_timeout(),
            poller: HealthPoller::from_config(&config.health),
            cleanup: RetryPolicy::new(provision.cleanup_attempts, provision.cleanup_delay()),
        }
    }

    pub fn with_poller(mut self, poller: HealthPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn config(&self) -> &ProvisionConfig {
        self.config
    }

    /// 첫 단계가 받을 target (`provision.default_target`)
    pub fn initial_target(&self) -> TargetId {
        TargetId::new(self.config.default_target.as_str())
    }

    /// 모든 단계를 실행하고 마지막 target을 반환합니다.
    pub async fn run(
        &self,
        stages: &[ProvisioningStage],
        target: TargetId,
    ) -> Result<TargetId, ProvisionError> {
        let mut target = target;
        for (index, stage) in stages.iter().enumerate() {
            target = self.run_stage(index, stage, target).await?;
        }
        info!(stages = stages.len(), workspace = %target, "provisioning complete");
        Ok(target)
    }

    async fn run_stage(
        &self,
        index: usize,
        stage: &ProvisioningStage,
        target: TargetId,
    ) -> Result<TargetId, ProvisionError> {
        let dir = stage.dir();
        info!(stage = index, dir = %dir.display(), workspace = %target, "running provisioning stage");

        if let Err(e) = self.cleanup.run(|_| clean_stale_state(dir)).await {
            warn!(dir = %dir.display(), error = %e, "stale state cleanup failed, continuing");
        }

        if self.config.skip_init {
            info!(dir = %dir.display(), "skipping init");
        } else {
            self.tool.init(dir).await?;
        }

        if self.config.wait_for_api {
            self.wait_for_api(&target).await;
        }

        let vars = self.stage_vars(stage, &target);
        if let Err(e) = self.tool.apply(dir, &vars).await {
            error!(
                dir = %dir.display(),
                server = self.server.as_str(),
                workspace = %target,
                error = %e,
                "apply failed"
            );
            return Err(e);
        }

        let Some(name) = stage.output.as_deref() else {
            return Ok(target);
        };

        match self.read_output(dir, name).await {
            Ok(id) => {
                info!(output = name, workspace = id.as_str(), "target replaced by stage output");
                Ok(TargetId::new(id))
            }
            Err(e) => {
                if self.config.dump_state {
                    self.dump_state(dir).await;
                }
                match &self.config.fallback_target {
                    Some(fallback) => {
                        warn!(
                            output = name,
                            fallback = fallback.as_str(),
                            error = %e,
                            "output unavailable, using fallback target"
                        );
                        Ok(TargetId::new(fallback.clone()))
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// 고정 변수 3개 다음에 단계 변수가 옵니다.
    fn stage_vars(&self, stage: &ProvisioningStage, target: &TargetId) -> Vec<Variable> {
        let mut vars = Vec::with_capacity(stage.vars.len() + 3);
        vars.push(Variable::new(&self.config.server_var, &self.server));
        vars.push(Variable::new(&self.config.api_key_var, &self.api_key));
        vars.push(Variable::new(&self.config.target_var, target.as_str()));
        vars.extend(stage.vars.iter().cloned());
        vars
    }

    async fn read_output(&self, dir: &Path, name: &str) -> Result<String, ProvisionError> {
        match self.tool.output(dir, name).await? {
            serde_json::Value::String(value) if !value.trim().is_empty() => {
                Ok(value.trim().to_owned())
            }
            serde_json::Value::String(_) | serde_json::Value::Null => {
                Err(ProvisionError::OutputEmpty {
                    dir: dir.display().to_string(),
                    name: name.to_owned(),
                })
            }
            other => Err(ProvisionError::OutputMissing {
                dir: dir.display().to_string(),
                name: name.to_owned(),
                reason: format!("expected a string, got {other}"),
            }),
        }
    }

    async fn dump_state(&self, dir: &Path) {
        match self.tool.show_state(dir).await {
            Ok(state) => info!(dir = %dir.display(), state = %state, "provisioning state"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to dump provisioning state"),
        }
    }

    async fn wait_for_api(&self, target: &TargetId) {
        let base = format!("{}{}", self.server.trim_end_matches('/'), self.api_path);
        let urls = [base.clone(), format!("{base}/{target}")];
        for url in urls {
            let probe = match HttpProbe::new(url, self.request_timeout) {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(error = %e, "cannot check API readiness, continuing");
                    continue;
                }
            };
            if let Err(e) = self
                .poller
                .wait_for(&probe, self.config.readiness_timeout())
                .await
            {
                warn!(error = %e, "API not ready before apply, continuing");
            }
        }
    }
}
