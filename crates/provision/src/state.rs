//! stale state 정리
//!
//! 이전 실행이 남긴 lock/state 파일이 있으면 다음 init/apply가 막히므로
//! 각 단계 전에 삭제합니다. 이미 없는 파일은 무시합니다.

use std::path::Path;

use tracing::debug;

use crate::error::ProvisionError;

/// 단계 디렉토리에서 삭제하는 파일
pub const STATE_ARTIFACTS: [&str; 3] = [
    ".terraform.lock.hcl",
    "terraform.tfstate",
    ".terraform.tfstate.lock.info",
];

/// stale state 파일을 삭제합니다. 여러 번 호출해도 안전합니다.
pub async fn clean_stale_state(dir: &Path) -> Result<(), ProvisionError> {
    for artifact in STATE_ARTIFACTS {
        let path = dir.join(artifact);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale state"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ProvisionError::StateCleanup {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(())
}
