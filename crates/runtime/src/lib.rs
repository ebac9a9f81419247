//! berth 컨테이너 런타임
//!
//! 테스트 한 번에 필요한 스택(내부 네트워크, 데이터베이스 컨테이너,
//! 애플리케이션 컨테이너)을 만들고, 준비될 때까지 기다리고, 만든 것만
//! 정확히 정리합니다.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`RuntimeError`, `CleanupError`)
//! - [`docker`]: Container runtime abstraction (`ContainerRuntime` trait, `BollardRuntime`)
//! - [`logs`]: Container log forwarding (`LogStream`)
//! - [`probe`]: Container probes (`ExecProbe`, `LogMarkerProbe`)
//! - [`stack`]: Resource registry and teardown (`StackHandle`, `StackLock`, `StackGuard`)
//! - [`builder`]: Stack construction (`StackBuilder`, `merge_environment`)
//!
//! # Architecture
//!
//! ```text
//! StackLock ─┬─> StackBuilder.build() ──> StackHandle (filled step by step)
//!            │
//!            └─> StackHandle.teardown()   log stream → app → db → network
//! ```

pub mod builder;
pub mod docker;
pub mod error;
pub mod logs;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod probe;
pub mod stack;

// --- Public API Re-exports ---

// Builder
pub use builder::{BuildProgress, StackBuilder, merge_environment};

// Runtime
pub use docker::{BollardRuntime, ContainerRuntime, ContainerSpec};

// Error
pub use error::{CleanupError, RuntimeError};

// Logs
pub use logs::LogStream;

// Probes
pub use probe::{ExecProbe, LogMarkerProbe};

// Stack
pub use stack::{
    ApplicationHandle, ArrangedStack, DatabaseHandle, NetworkHandle, StackGuard, StackHandle,
    StackLock,
};
