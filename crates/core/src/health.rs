//! 헬스 폴러: 준비 상태 게이트
//!
//! [`HealthPoller::wait_for`]는 [`Probe`]를 짧은 간격으로 반복 실행하다가
//! 처음 성공하면 반환하고, 타임아웃이 지나면 [`HealthError::Timeout`]을
//! 반환합니다.
//!
//! 컨테이너 안에서 명령을 실행하는 probe나 로그 마커 probe는
//! 컨테이너 런타임이 필요하므로 `berth-runtime`에 있습니다.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::HealthConfig;
use crate::error::HealthError;

/// 준비 상태 probe
///
/// `check`는 준비되었으면 `Ok(())`, 아니면 사람이 읽을 수 있는 사유를
/// 반환합니다.
pub trait Probe: Send + Sync {
    /// 로그와 타임아웃 에러에 쓰이는 설명
    fn describe(&self) -> String;

    /// probe를 한 번 실행합니다.
    fn check(&self) -> impl Future<Output = Result<(), String>> + Send;
}

/// 폴링 루프
#[derive(Debug, Clone, Copy)]
pub struct HealthPoller {
    interval: Duration,
}

impl HealthPoller {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.poll_interval())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// probe가 성공할 때까지 기다립니다.
    ///
    /// 실패하면 `interval`만큼 쉬고, 다시 실행하기 전에 마감 시각을 확인합니다.
    /// 한 번의 `check`가 마감 시각을 넘기면 그 자체로 타임아웃입니다.
    pub async fn wait_for<P>(&self, probe: &P, timeout: Duration) -> Result<(), HealthError>
    where
        P: Probe + ?Sized,
    {
        let description = probe.describe();
        let deadline = Instant::now() + timeout;
        let mut checks: u32 = 0;

        info!(
            probe = %description,
            timeout_secs = timeout.as_secs(),
            "waiting for readiness"
        );

        loop {
            checks += 1;
            let last_error = match tokio::time::timeout_at(deadline, probe.check()).await {
                Ok(Ok(())) => {
                    info!(probe = %description, checks, "probe succeeded");
                    return Ok(());
                }
                Ok(Err(reason)) => reason,
                Err(_elapsed) => "probe did not complete before the deadline".to_owned(),
            };

            debug!(probe = %description, checks, reason = %last_error, "probe not ready");

            tokio::time::sleep(self.interval).await;
            if Instant::now() >= deadline {
                return Err(HealthError::Timeout {
                    probe: description,
                    timeout,
                    last_error,
                });
            }
        }
    }
}

impl Default for HealthPoller {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

/// HTTP GET probe: 2xx 응답이면 성공
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// 요청마다 `request_timeout`이 적용되는 probe를 생성합니다.
    ///
    /// # Errors
    ///
    /// HTTP 클라이언트를 만들 수 없으면 [`HealthError::ClientBuild`]를 반환합니다.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, HealthError> {
        let url = url.into();
        match reqwest::Client::builder().timeout(request_timeout).build() {
            Ok(client) => Ok(Self::with_client(client, url)),
            Err(e) => Err(HealthError::ClientBuild {
                url,
                reason: e.to_string(),
            }),
        }
    }

    /// 기존 클라이언트를 재사용합니다.
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Probe for HttpProbe {
    fn describe(&self) -> String {
        format!("GET {}", self.url)
    }

    async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("unexpected status {status}"))
        }
    }
}

/// 클로저 probe
pub struct FnProbe<F> {
    description: String,
    check: F,
}

impl<F, Fut> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    pub fn new(description: impl Into<String>, check: F) -> Self {
        Self {
            description: description.into(),
            check,
        }
    }
}

impl<F, Fut> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send,
{
    fn describe(&self) -> String {
        self.description.clone()
    }

    fn check(&self) -> impl Future<Output = Result<(), String>> + Send {
        (self.check)()
    }
}
