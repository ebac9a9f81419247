//! 고정 간격 재시도 정책
//!
//! [`RetryPolicy`]는 작업을 최대 `attempts`번 실행하고, 실패할 때마다
//! `delay`만큼 기다립니다. 백오프 증가나 지터는 없습니다.
//!
//! 두 곳에서만 사용합니다.
//! - arrangement 시도 전체 (스택 생성 → 게이트 → 프로비저닝 → 테스트 본문)
//! - 프로비저닝 단계 전 stale state 파일 삭제
//!
//! 프로비저닝 apply 자체는 재시도하지 않습니다. 실패한 단계는 시도 전체를
//! 실패시키고 바깥 정책이 처음부터 다시 실행합니다.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;

/// 고정 간격 재시도 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// 새 정책을 생성합니다. `attempts`가 0이면 1로 보정합니다.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.attempts, config.delay())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// `op`을 성공할 때까지 최대 `attempts`번 실행합니다.
    ///
    /// `op`은 1부터 시작하는 시도 번호를 받습니다. 모든 시도가 실패하면
    /// 마지막 에러를 반환합니다.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_while(op, |_| true).await
    }

    /// [`run`](Self::run)과 같지만 `retryable`이 false를 반환하는 에러는
    /// 즉시 반환합니다.
    pub async fn run_while<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.attempts || !retryable(&e) => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
