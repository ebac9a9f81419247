//! 에러 타입: 도메인별 에러 정의
//!
//! [`BerthError`]는 하나의 arrangement 시도가 실패할 수 있는 모든 경로를
//! 분류합니다. 각 하위 크레이트의 에러는 `From` 변환으로 이 타입에 합류합니다.

use std::time::Duration;

/// berth 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum BerthError {
    /// 설정 에러 (재시도하지 않음)
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 네트워크/컨테이너 생성 및 조회 실패
    #[error("infrastructure error: {0}")]
    Infrastructure(String),

    /// 헬스 게이트 타임아웃
    #[error("readiness error: {0}")]
    Readiness(#[from] HealthError),

    /// 프로비저닝 도구 init/apply 실패
    #[error("provisioning error: {0}")]
    Provisioning(String),

    /// 선언된 output을 읽지 못했고 fallback도 없음
    #[error("output read error: {0}")]
    OutputRead(String),

    /// 테스트 본문이 에러를 반환함
    #[error("test body failed: {0}")]
    TestBody(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BerthError {
    /// Whether the outer retry policy may run the whole arrangement again.
    ///
    /// Configuration problems fail immediately; everything else is retried
    /// up to the attempt budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// 라이선스 누락 또는 base64 형식 오류
    #[error(
        "the LICENSE environment variable must be set to a base 64 encoded license key: {reason}"
    )]
    InvalidLicense { reason: String },
}

/// 헬스 폴링 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthError {
    /// 타임아웃 내에 probe가 성공하지 못함
    #[error("{probe} did not become ready within {timeout:?}: {last_error}")]
    Timeout {
        /// probe 설명
        probe: String,
        /// 대기한 시간
        timeout: Duration,
        /// 마지막 probe 실패 사유
        last_error: String,
    },

    /// probe용 HTTP 클라이언트를 만들 수 없음
    #[error("failed to build HTTP client for {url}: {reason}")]
    ClientBuild { url: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_not_retryable() {
        let err: BerthError = ConfigError::InvalidLicense {
            reason: "missing".to_owned(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn runtime_failures_are_retryable() {
        assert!(BerthError::Infrastructure("network create failed".to_owned()).is_retryable());
        assert!(BerthError::Provisioning("apply failed".to_owned()).is_retryable());
        assert!(BerthError::OutputRead("no output".to_owned()).is_retryable());
        assert!(BerthError::TestBody("assertion".to_owned()).is_retryable());
    }

    #[test]
    fn timeout_display_includes_probe_and_reason() {
        let err = HealthError::Timeout {
            probe: "GET http://localhost:8080/api".to_owned(),
            timeout: Duration::from_secs(5),
            last_error: "status 503".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://localhost:8080/api"));
        assert!(msg.contains("status 503"));
    }

    #[test]
    fn license_error_mentions_variable() {
        let err = ConfigError::InvalidLicense {
            reason: "not base64".to_owned(),
        };
        assert!(err.to_string().contains("LICENSE"));
    }
}
