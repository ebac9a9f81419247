//! 테스트용 프로비저닝 도구
//!
//! 호출을 기록하고, 디렉토리별로 output 값과 실패를 지정할 수 있습니다.
//! 다른 크레이트의 테스트에서는 `mock` feature로 사용합니다.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::ProvisionError;
use crate::stage::Variable;
use crate::tool::ProvisioningTool;

/// 기록된 도구 호출
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Init { dir: PathBuf },
    Apply { dir: PathBuf, vars: Vec<Variable> },
    Output { dir: PathBuf, name: String },
    ShowState { dir: PathBuf },
}

/// 메모리 기반 Mock 프로비저닝 도구
#[derive(Debug, Default)]
pub struct MockTool {
    calls: Mutex<Vec<ToolCall>>,
    outputs: HashMap<(PathBuf, String), serde_json::Value>,
    default_outputs: HashMap<String, serde_json::Value>,
    failing_init: HashSet<PathBuf>,
    apply_failures: Mutex<HashMap<PathBuf, u32>>,
}

impl MockTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// `dir`의 `name` output 값을 지정합니다. 지정하지 않은 output은 없는 것으로 취급합니다.
    pub fn with_output(
        mut self,
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.outputs.insert((dir.into(), name.into()), value);
        self
    }

    /// 디렉토리와 관계없이 `name` output 값을 지정합니다. 임시 디렉토리에서 실행되는 단계에 사용합니다.
    pub fn with_default_output(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.default_outputs.insert(name.into(), value);
        self
    }

    pub fn with_failing_init(mut self, dir: impl Into<PathBuf>) -> Self {
        self.failing_init.insert(dir.into());
        self
    }

    /// `dir`의 apply가 항상 실패합니다.
    pub fn with_failing_apply(self, dir: impl Into<PathBuf>) -> Self {
        self.with_apply_failures(dir, u32::MAX)
    }

    /// `dir`의 apply가 처음 `times`번 실패한 뒤 성공합니다.
    pub fn with_apply_failures(self, dir: impl Into<PathBuf>, times: u32) -> Self {
        lock(&self.apply_failures).insert(dir.into(), times);
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, pred: impl Fn(&ToolCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    /// 기록된 apply 호출의 변수 목록
    pub fn applied_vars(&self) -> Vec<Vec<Variable>> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ToolCall::Apply { vars, .. } => Some(vars.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ToolCall) {
        lock(&self.calls).push(call);
    }

    fn failed(command: &str, dir: &Path, stderr: &str) -> ProvisionError {
        ProvisionError::ToolFailed {
            command: format!("mock {command}"),
            dir: dir.display().to_string(),
            code: Some(1),
            stderr: stderr.to_owned(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProvisioningTool for MockTool {
    async fn init(&self, dir: &Path) -> Result<String, ProvisionError> {
        self.record(ToolCall::Init {
            dir: dir.to_path_buf(),
        });
        if self.failing_init.contains(dir) {
            return Err(Self::failed("init", dir, "mock init failure"));
        }
        Ok("Terraform has been successfully initialized!".to_owned())
    }

    async fn apply(&self, dir: &Path, vars: &[Variable]) -> Result<String, ProvisionError> {
        self.record(ToolCall::Apply {
            dir: dir.to_path_buf(),
            vars: vars.to_vec(),
        });
        let fail = match lock(&self.apply_failures).get_mut(dir) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if fail {
            return Err(Self::failed("apply", dir, "mock apply failure"));
        }
        Ok("Apply complete!".to_owned())
    }

    async fn output(&self, dir: &Path, name: &str) -> Result<serde_json::Value, ProvisionError> {
        self.record(ToolCall::Output {
            dir: dir.to_path_buf(),
            name: name.to_owned(),
        });
        self.outputs
            .get(&(dir.to_path_buf(), name.to_owned()))
            .or_else(|| self.default_outputs.get(name))
            .cloned()
            .ok_or_else(|| ProvisionError::OutputMissing {
                dir: dir.display().to_string(),
                name: name.to_owned(),
                reason: "output not found".to_owned(),
            })
    }

    async fn show_state(&self, dir: &Path) -> Result<serde_json::Value, ProvisionError> {
        self.record(ToolCall::ShowState {
            dir: dir.to_path_buf(),
        });
        Ok(serde_json::json!({ "format_version": "1.0" }))
    }
}
