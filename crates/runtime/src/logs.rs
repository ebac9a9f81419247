//! 컨테이너 로그 스트리밍
//!
//! 애플리케이션 컨테이너의 stdout/stderr를 `berth::container` 타깃의 tracing
//! 이벤트로 전달합니다. 진단용이므로 실패해도 스택 생성은 계속됩니다.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 로그 이벤트의 tracing 타깃
pub const CONTAINER_LOG_TARGET: &str = "berth::container";

/// 실행 중인 로그 전달 작업 핸들
///
/// [`stop`](Self::stop)으로 종료합니다. drop되면 작업은 취소만 되고
/// 완료를 기다리지 않습니다.
#[derive(Debug)]
pub struct LogStream {
    container: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogStream {
    /// 취소 토큰이 끊길 때까지 실행되는 작업으로 스트림을 만듭니다.
    pub fn new(container: impl Into<String>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            container: container.into(),
            cancel,
            task: Some(task),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// 로그 전달을 멈추고 작업이 끝날 때까지 기다립니다.
    pub async fn stop(mut self) -> Result<(), String> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => task.await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// bollard 로그 스트림을 tracing으로 전달하는 작업을 시작합니다.
pub(crate) fn forward_container_logs(
    docker: Arc<bollard::Docker>,
    container_id: String,
    container_name: String,
) -> LogStream {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let name = container_name.clone();

    let task = tokio::spawn(async move {
        use bollard::container::LogsOptions;

        let stream = docker.logs(
            &container_id,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                tail: "all".to_owned(),
                ..Default::default()
            }),
        );
        let mut stream = std::pin::pin!(stream);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(container = name.as_str(), "log streaming stopped");
                    break;
                }
                next = stream.next() => match next {
                    Some(Ok(output)) => {
                        for line in output.to_string().lines() {
                            info!(target: CONTAINER_LOG_TARGET, container = name.as_str(), "{line}");
                        }
                    }
                    Some(Err(e)) => {
                        warn!(container = name.as_str(), error = %e, "log stream failed");
                        break;
                    }
                    None => {
                        debug!(container = name.as_str(), "log stream ended");
                        break;
                    }
                },
            }
        }
    });

    LogStream::new(container_name, cancel, task)
}
