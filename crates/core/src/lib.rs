//! berth 공통 크레이트
//!
//! 모든 berth 크레이트가 공유하는 기반 타입을 정의합니다.
//!
//! - [`error`]: 최상위 에러 [`BerthError`]와 재시도 가능 여부 분류
//! - [`config`]: `berth.toml` + 환경변수 설정
//! - [`retry`]: 고정 간격 재시도 정책
//! - [`health`]: 준비 상태 probe와 폴링 루프

pub mod config;
pub mod error;
pub mod health;
pub mod retry;

// --- 주요 타입 re-export ---

// 에러
pub use error::{BerthError, ConfigError, HealthError};

// 설정
pub use config::BerthConfig;

// 재시도 / 헬스
pub use health::{FnProbe, HealthPoller, HttpProbe, Probe};
pub use retry::RetryPolicy;
