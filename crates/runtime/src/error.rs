//! 컨테이너 런타임 에러 타입
//!
//! [`RuntimeError`]는 네트워크/컨테이너 생성, 조회, 준비 대기 중 발생하는 에러를
//! 표현합니다. `From<RuntimeError> for BerthError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! 정리(teardown) 단계의 실패는 [`CleanupError`]로 따로 수집되며
//! 절대 상위로 전파되지 않습니다.

use berth_core::error::{BerthError, HealthError};

/// 컨테이너 런타임 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker 데몬 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 컨테이너 포트가 호스트에 매핑되지 않음
    #[error("port {port} of container '{container_id}' is not mapped to the host")]
    PortNotMapped {
        /// 대상 컨테이너 ID
        container_id: String,
        /// 컨테이너 내부 포트
        port: u16,
    },

    /// 네트워크 내부 IP를 찾을 수 없음
    #[error("container '{container_id}' has no address on network '{network}'")]
    AddressNotFound {
        /// 대상 컨테이너 ID
        container_id: String,
        /// 네트워크 이름
        network: String,
    },

    /// 준비 상태 대기 실패
    #[error(transparent)]
    Readiness(#[from] HealthError),
}

impl From<RuntimeError> for BerthError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Readiness(e) => BerthError::Readiness(e),
            other => BerthError::Infrastructure(other.to_string()),
        }
    }
}

/// 정리 단계 하나의 실패
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to {action} {resource}: {reason}")]
pub struct CleanupError {
    /// 대상 리소스 (예: "application container 3f2a…")
    pub resource: String,
    /// 실패한 동작 (stop, terminate, remove, ...)
    pub action: &'static str,
    /// 실패 사유
    pub reason: String,
}

impl CleanupError {
    pub fn new(resource: impl Into<String>, action: &'static str, reason: impl ToString) -> Self {
        Self {
            resource: resource.into(),
            action,
            reason: reason.to_string(),
        }
    }
}
