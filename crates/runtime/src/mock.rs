//! 테스트용 Mock 컨테이너 런타임
//!
//! 설정 가능한 응답을 반환하여 Docker 없이도 스택 생성과 정리를 테스트할 수
//! 있습니다. 호출 순서는 [`MockRuntime::calls`]로 확인합니다.
//!
//! 다른 크레이트의 테스트에서는 `mock` feature로 사용할 수 있습니다.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::docker::{ContainerRuntime, ContainerSpec};
use crate::error::RuntimeError;
use crate::logs::LogStream;

/// 기록되는 런타임 호출
///
/// 조회성 호출(logs, container_ip 등)은 기록하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    CreateNetwork(String),
    RemoveNetwork(String),
    RunContainer { name: String, image: String },
    Exec { id: String, cmd: Vec<String> },
    StreamLogs(String),
    StopContainer(String),
    RemoveContainer(String),
}

/// 테스트용 Mock 런타임
#[derive(Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    containers: Mutex<HashMap<String, ContainerSpec>>,
    next_id: AtomicU64,
    /// 이 문자열을 포함하는 이미지는 실행에 실패
    failing_images: Vec<String>,
    fail_network: bool,
    fail_remove_network: bool,
    fail_stop: bool,
    fail_log_stream: bool,
    exec_exit_code: i64,
    logs: String,
    host: Option<String>,
    mapped_port: Option<u16>,
    /// 생성/삭제 호출마다 걸리는 시간
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// `image`를 포함하는 이미지의 컨테이너 실행이 실패하도록 설정합니다.
    pub fn with_failing_image(mut self, image: impl Into<String>) -> Self {
        self.failing_images.push(image.into());
        self
    }

    pub fn with_failing_network(mut self) -> Self {
        self.fail_network = true;
        self
    }

    pub fn with_failing_remove_network(mut self) -> Self {
        self.fail_remove_network = true;
        self
    }

    pub fn with_failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn with_failing_log_stream(mut self) -> Self {
        self.fail_log_stream = true;
        self
    }

    pub fn with_exec_exit_code(mut self, code: i64) -> Self {
        self.exec_exit_code = code;
        self
    }

    /// 모든 컨테이너가 반환할 로그
    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// 모든 포트가 매핑될 호스트 포트
    pub fn with_mapped_port(mut self, port: u16) -> Self {
        self.mapped_port = Some(port);
        self
    }

    /// 네트워크/컨테이너 생성과 삭제가 `latency`만큼 걸리도록 설정합니다.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// 동시에 진행 중이던 생성/삭제 호출의 최대 개수
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// 지금까지 기록된 호출
    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// 조건에 맞는 호출 수
    pub fn count(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        lock(&self.calls).iter().filter(|c| pred(c)).count()
    }

    /// 이름으로 실행된 컨테이너의 스펙을 찾습니다.
    pub fn container_spec(&self, name: &str) -> Option<ContainerSpec> {
        lock(&self.containers)
            .values()
            .find(|spec| spec.name == name)
            .cloned()
    }

    fn record(&self, call: RuntimeCall) {
        lock(&self.calls).push(call);
    }

    /// 생성/삭제 호출 하나를 진행 중으로 표시하고 `latency`만큼 기다립니다.
    async fn mutate(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn known(&self, id: &str) -> Result<ContainerSpec, RuntimeError> {
        lock(&self.containers)
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_owned()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ContainerRuntime for MockRuntime {
    async fn create_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::CreateNetwork(name.to_owned()));
        self.mutate().await;
        if self.fail_network {
            return Err(RuntimeError::DockerApi("mock network failure".to_owned()));
        }
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveNetwork(name.to_owned()));
        self.mutate().await;
        if self.fail_remove_network {
            return Err(RuntimeError::DockerApi("mock remove failure".to_owned()));
        }
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(RuntimeCall::RunContainer {
            name: spec.name.clone(),
            image: spec.image.clone(),
        });
        self.mutate().await;
        if self.failing_images.iter().any(|i| spec.image.contains(i)) {
            return Err(RuntimeError::DockerApi(format!(
                "mock failure starting {}",
                spec.image
            )));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{n:012x}");
        lock(&self.containers).insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn container_name(&self, id: &str) -> Result<String, RuntimeError> {
        Ok(self.known(id)?.name)
    }

    async fn container_ip(&self, id: &str, _network: &str) -> Result<String, RuntimeError> {
        self.known(id)?;
        let n = u64::from_str_radix(id, 16).unwrap_or(0);
        Ok(format!("172.18.0.{}", n + 1))
    }

    fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "localhost".to_owned())
    }

    async fn mapped_port(&self, id: &str, container_port: u16) -> Result<u16, RuntimeError> {
        self.known(id)?;
        Ok(self
            .mapped_port
            .unwrap_or_else(|| container_port.saturating_add(30000)))
    }

    async fn exec(&self, id: &str, cmd: &[String]) -> Result<i64, RuntimeError> {
        self.record(RuntimeCall::Exec {
            id: id.to_owned(),
            cmd: cmd.to_vec(),
        });
        self.known(id)?;
        Ok(self.exec_exit_code)
    }

    async fn logs(&self, id: &str) -> Result<String, RuntimeError> {
        self.known(id)?;
        Ok(self.logs.clone())
    }

    async fn stream_logs(&self, id: &str) -> Result<LogStream, RuntimeError> {
        self.record(RuntimeCall::StreamLogs(id.to_owned()));
        if self.fail_log_stream {
            return Err(RuntimeError::DockerApi("mock log stream failure".to_owned()));
        }
        let spec = self.known(id)?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { token.cancelled().await });
        Ok(LogStream::new(spec.name, cancel, task))
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::StopContainer(id.to_owned()));
        if self.fail_stop {
            return Err(RuntimeError::DockerApi("mock stop failure".to_owned()));
        }
        self.known(id)?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(RuntimeCall::RemoveContainer(id.to_owned()));
        self.mutate().await;
        lock(&self.containers)
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::ContainerNotFound(id.to_owned()))
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
}
