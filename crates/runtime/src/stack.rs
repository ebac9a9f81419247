//! 리소스 핸들 레지스트리와 정리(teardown)
//!
//! [`StackHandle`]은 한 번의 arrangement 시도에서 실제로 만들어진 리소스만
//! 기록합니다. 각 리소스는 생성 직후 바로 기록되므로, 생성 도중 실패해도
//! 이미 존재하는 리소스만 정확히 정리할 수 있습니다.
//!
//! # 정리 순서
//! 1. 로그 스트리밍 중지
//! 2. 애플리케이션 컨테이너 stop → terminate
//! 3. 데이터베이스 컨테이너 stop → terminate
//! 4. 네트워크 제거
//!
//! 각 단계는 앞 단계의 성공 여부와 관계없이 실행됩니다. 실패는 수집되고
//! 로그로 남을 뿐 상위로 전파되지 않습니다.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::docker::ContainerRuntime;
use crate::error::CleanupError;
use crate::logs::LogStream;

/// 내부 네트워크
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub name: String,
}

/// 데이터베이스 컨테이너
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub container_id: String,
    pub name: String,
    /// 네트워크 내부 주소 (준비 확인 후 채워짐)
    pub internal_ip: Option<String>,
    pub port: u16,
}

/// 애플리케이션 컨테이너
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationHandle {
    pub container_id: String,
    pub name: String,
    /// 호스트에서 접근 가능한 URI (준비 확인 후 채워짐)
    pub uri: Option<String>,
}

/// 한 시도에서 만들어진 리소스 목록
#[derive(Debug, Default)]
pub struct StackHandle {
    pub network: Option<NetworkHandle>,
    pub database: Option<DatabaseHandle>,
    pub application: Option<ApplicationHandle>,
    pub log_stream: Option<LogStream>,
}

/// 완성된 스택의 스냅샷 (테스트 본문에 전달됨)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrangedStack {
    pub network: String,
    pub database_container_id: String,
    pub database_name: String,
    pub database_ip: String,
    pub database_port: u16,
    pub application_container_id: String,
    pub application_name: String,
    pub application_uri: String,
}

impl StackHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 아무 리소스도 기록되지 않았는지 여부
    pub fn is_empty(&self) -> bool {
        self.network.is_none()
            && self.database.is_none()
            && self.application.is_none()
            && self.log_stream.is_none()
    }

    /// 모든 리소스가 준비되었으면 스냅샷을 반환합니다.
    pub fn snapshot(&self) -> Option<ArrangedStack> {
        let network = self.network.as_ref()?;
        let database = self.database.as_ref()?;
        let application = self.application.as_ref()?;

        Some(ArrangedStack {
            network: network.name.clone(),
            database_container_id: database.container_id.clone(),
            database_name: database.name.clone(),
            database_ip: database.internal_ip.clone()?,
            database_port: database.port,
            application_container_id: application.container_id.clone(),
            application_name: application.name.clone(),
            application_uri: application.uri.clone()?,
        })
    }

    /// 기록된 리소스를 정리합니다.
    ///
    /// 필드를 `take()`하므로 두 번 호출해도 각 리소스는 한 번만 정리됩니다.
    /// 반환된 에러는 이미 로그로 남았습니다.
    pub async fn teardown<R>(&mut self, runtime: &R, stop_timeout: Duration) -> Vec<CleanupError>
    where
        R: ContainerRuntime + ?Sized,
    {
        let mut errors = Vec::new();

        if let Some(stream) = self.log_stream.take() {
            let container = stream.container().to_owned();
            if let Err(reason) = stream.stop().await {
                errors.push(CleanupError::new(
                    format!("log stream for {container}"),
                    "stop",
                    reason,
                ));
            }
        }

        if let Some(app) = self.application.take() {
            let resource = format!("application container {}", app.name);
            stop_and_remove(runtime, &app.container_id, &resource, stop_timeout, &mut errors)
                .await;
        }

        if let Some(db) = self.database.take() {
            let resource = format!("database container {}", db.name);
            stop_and_remove(runtime, &db.container_id, &resource, stop_timeout, &mut errors)
                .await;
        }

        if let Some(network) = self.network.take() {
            if let Err(e) = runtime.remove_network(&network.name).await {
                errors.push(CleanupError::new(
                    format!("network {}", network.name),
                    "remove",
                    e,
                ));
            }
        }

        for error in &errors {
            warn!(error = %error, "cleanup step failed");
        }
        if errors.is_empty() {
            info!("stack torn down");
        } else {
            warn!(failures = errors.len(), "stack torn down with errors");
        }

        errors
    }
}

async fn stop_and_remove<R>(
    runtime: &R,
    container_id: &str,
    resource: &str,
    stop_timeout: Duration,
    errors: &mut Vec<CleanupError>,
) where
    R: ContainerRuntime + ?Sized,
{
    if let Err(e) = runtime.stop_container(container_id, stop_timeout).await {
        errors.push(CleanupError::new(resource, "stop", e));
    }
    if let Err(e) = runtime.remove_container(container_id).await {
        errors.push(CleanupError::new(resource, "terminate", e));
    }
}

static GLOBAL_STACK_LOCK: LazyLock<StackLock> = LazyLock::new(StackLock::new);

/// 스택 생성/정리 구간을 직렬화하는 락
///
/// 컨테이너 런타임은 동시 변경에 안전하지 않다고 간주합니다. 헬스 폴링과
/// 프로비저닝, 테스트 본문은 이 락을 잡지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct StackLock {
    inner: Arc<Mutex<()>>,
}

impl StackLock {
    /// 독립된 락을 생성합니다 (테스트용).
    pub fn new() -> Self {
        Self::default()
    }

    /// 프로세스 전역 락
    pub fn global() -> Self {
        GLOBAL_STACK_LOCK.clone()
    }

    pub async fn acquire(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.inner).lock_owned().await
    }

    /// 현재 누군가 락을 잡고 있는지 여부
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// 스택 정리를 보장하는 가드
///
/// [`release`](Self::release)로 명시적으로 정리하는 것이 기본 경로입니다.
/// 정리되지 않은 채 drop되면 (예: future가 취소됨) 현재 tokio 런타임에
/// 정리 작업을 띄웁니다. 이 작업은 [`with_tracker`](Self::with_tracker)로
/// 넘긴 [`TaskTracker`]에서 기다릴 수 있습니다.
pub struct StackGuard<R: ContainerRuntime> {
    stack: Option<StackHandle>,
    runtime: Arc<R>,
    lock: StackLock,
    stop_timeout: Duration,
    background: TaskTracker,
}

impl<R: ContainerRuntime> StackGuard<R> {
    pub fn new(runtime: Arc<R>, lock: StackLock, stop_timeout: Duration) -> Self {
        Self {
            stack: Some(StackHandle::new()),
            runtime,
            lock,
            stop_timeout,
            background: TaskTracker::new(),
        }
    }

    /// drop 시 띄우는 정리 작업을 `tracker`에 등록합니다.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.background = tracker;
        self
    }

    /// 리소스를 기록할 핸들
    pub fn stack_mut(&mut self) -> &mut StackHandle {
        self.stack.get_or_insert_with(StackHandle::new)
    }

    pub fn stack(&self) -> Option<&StackHandle> {
        self.stack.as_ref()
    }

    /// 락을 잡고 스택을 정리합니다.
    pub async fn release(mut self) -> Vec<CleanupError> {
        match self.stack.take() {
            Some(mut stack) => {
                let _guard = self.lock.acquire().await;
                stack.teardown(self.runtime.as_ref(), self.stop_timeout).await
            }
            None => Vec::new(),
        }
    }
}

impl<R: ContainerRuntime> Drop for StackGuard<R> {
    fn drop(&mut self) {
        let Some(mut stack) = self.stack.take() else {
            return;
        };
        if stack.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("stack guard dropped without release, tearing down in background");
                let runtime = Arc::clone(&self.runtime);
                let lock = self.lock.clone();
                let stop_timeout = self.stop_timeout;
                self.background.spawn_on(
                    async move {
                        let _guard = lock.acquire().await;
                        stack.teardown(runtime.as_ref(), stop_timeout).await;
                    },
                    &handle,
                );
            }
            Err(_) => {
                warn!(
                    network = ?stack.network.as_ref().map(|n| n.name.as_str()),
                    "stack guard dropped outside a tokio runtime, resources leaked"
                );
            }
        }
    }
}
