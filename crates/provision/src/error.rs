//! 프로비저닝 에러 타입
//!
//! [`ProvisionError`]는 도구 실행, output 읽기, state 정리 중 발생하는 에러를
//! 표현합니다. `BerthError`로 변환될 때 output 관련 에러는 `OutputRead`,
//! 나머지는 `Provisioning`으로 분류됩니다.

use std::time::Duration;

use berth_core::error::BerthError;

/// 프로비저닝 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// 도구 프로세스를 시작하지 못함
    #[error("failed to launch '{command}': {reason}")]
    ToolLaunch {
        /// 실행한 명령
        command: String,
        /// 실패 사유
        reason: String,
    },

    /// 도구가 0이 아닌 종료 코드로 끝남
    #[error("'{command}' failed in {dir} (exit code {code:?}): {stderr}")]
    ToolFailed {
        /// 실행한 명령
        command: String,
        /// 단계 디렉토리
        dir: String,
        /// 종료 코드 (시그널로 종료되면 None)
        code: Option<i32>,
        /// 캡처된 stderr
        stderr: String,
    },

    /// 도구가 제한 시간 안에 끝나지 않음
    #[error("'{command}' in {dir} did not finish within {timeout:?}")]
    ToolTimeout {
        /// 실행한 명령
        command: String,
        /// 단계 디렉토리
        dir: String,
        /// 제한 시간
        timeout: Duration,
    },

    /// 선언된 output을 읽지 못함
    #[error("output '{name}' could not be read from {dir}: {reason}")]
    OutputMissing {
        /// 단계 디렉토리
        dir: String,
        /// output 이름
        name: String,
        /// 실패 사유
        reason: String,
    },

    /// output 값이 비어 있음
    #[error("output '{name}' in {dir} is empty")]
    OutputEmpty {
        /// 단계 디렉토리
        dir: String,
        /// output 이름
        name: String,
    },

    /// stale state 파일 삭제 실패
    #[error("failed to remove stale state {path}: {reason}")]
    StateCleanup {
        /// 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// output 읽기 실패인지 여부 (fallback 대상)
    pub fn is_output_error(&self) -> bool {
        matches!(self, Self::OutputMissing { .. } | Self::OutputEmpty { .. })
    }
}

impl From<ProvisionError> for BerthError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::Io(e) => BerthError::Io(e),
            e if e.is_output_error() => BerthError::OutputRead(e.to_string()),
            e => BerthError::Provisioning(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_failed_display_includes_stderr() {
        let err = ProvisionError::ToolFailed {
            command: "terraform apply".to_owned(),
            dir: "/tmp/stage".to_owned(),
            code: Some(1),
            stderr: "Error: Octopus API error".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("terraform apply"));
        assert!(msg.contains("Octopus API error"));
    }

    #[test]
    fn output_errors_map_to_output_read() {
        let err: BerthError = ProvisionError::OutputEmpty {
            dir: "/tmp/a".to_owned(),
            name: "octopus_space_id".to_owned(),
        }
        .into();
        assert!(matches!(err, BerthError::OutputRead(_)));
    }

    #[test]
    fn tool_errors_map_to_provisioning() {
        let err: BerthError = ProvisionError::ToolLaunch {
            command: "terraform init".to_owned(),
            reason: "not found".to_owned(),
        }
        .into();
        assert!(matches!(err, BerthError::Provisioning(_)));
        assert!(err.is_retryable());
    }
}
