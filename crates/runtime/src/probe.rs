//! 컨테이너 기반 probe
//!
//! - [`ExecProbe`]: 컨테이너 안에서 명령을 실행하고 종료 코드를 확인
//! - [`LogMarkerProbe`]: 컨테이너 로그에 준비 완료 문자열이 나타났는지 확인

use berth_core::health::Probe;

use crate::docker::ContainerRuntime;

/// 컨테이너 안에서 명령을 실행하는 probe
pub struct ExecProbe<'a, R: ?Sized> {
    runtime: &'a R,
    container_id: String,
    command: Vec<String>,
    expected_exit_code: i64,
}

impl<'a, R: ContainerRuntime + ?Sized> ExecProbe<'a, R> {
    /// 종료 코드 0을 기대하는 probe를 생성합니다.
    pub fn new(runtime: &'a R, container_id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            command,
            expected_exit_code: 0,
        }
    }

    pub fn expect_exit_code(mut self, code: i64) -> Self {
        self.expected_exit_code = code;
        self
    }
}

impl<R: ContainerRuntime + ?Sized> Probe for ExecProbe<'_, R> {
    fn describe(&self) -> String {
        let program = self.command.first().map(String::as_str).unwrap_or("<empty>");
        format!("exec {program} in container {}", self.container_id)
    }

    async fn check(&self) -> Result<(), String> {
        let code = self
            .runtime
            .exec(&self.container_id, &self.command)
            .await
            .map_err(|e| e.to_string())?;

        if code == self.expected_exit_code {
            Ok(())
        } else {
            Err(format!(
                "exit code {code}, expected {}",
                self.expected_exit_code
            ))
        }
    }
}

/// 컨테이너 로그에서 문자열을 찾는 probe
pub struct LogMarkerProbe<'a, R: ?Sized> {
    runtime: &'a R,
    container_id: String,
    marker: String,
}

impl<'a, R: ContainerRuntime + ?Sized> LogMarkerProbe<'a, R> {
    pub fn new(runtime: &'a R, container_id: impl Into<String>, marker: impl Into<String>) -> Self {
        Self {
            runtime,
            container_id: container_id.into(),
            marker: marker.into(),
        }
    }
}

impl<R: ContainerRuntime + ?Sized> Probe for LogMarkerProbe<'_, R> {
    fn describe(&self) -> String {
        format!(
            "log marker {:?} in container {}",
            self.marker, self.container_id
        )
    }

    async fn check(&self) -> Result<(), String> {
        let logs = self
            .runtime
            .logs(&self.container_id)
            .await
            .map_err(|e| e.to_string())?;

        if logs.contains(&self.marker) {
            Ok(())
        } else {
            Err("marker not logged yet".to_owned())
        }
    }
}
