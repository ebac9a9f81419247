//! berth 프로비저닝
//!
//! 준비된 애플리케이션에 외부 선언형 프로비저닝 도구를 단계별로 실행합니다.
//! 단계가 만든 workspace ID(output)는 다음 단계의 target 변수가 됩니다.
//!
//! # Module Structure
//!
//! - [`stage`]: 단계와 변수, target ID
//! - [`state`]: stale state 파일 정리
//! - [`tool`]: 프로비저닝 도구 추상화 (`ProvisioningTool`, `TerraformCli`)
//! - [`pipeline`]: 단계 실행과 target 전달 (`ProvisioningPipeline`)
//! - [`act`]: workspace 생성 + 채우기 헬퍼 (`WorkspaceProvisioner`)
//!
//! # Flow
//!
//! ```text
//! target ──> [clean → init → wait → apply → output?] ──> target' ──> [...] ──> final target
//! ```

pub mod act;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod pipeline;
pub mod stage;
pub mod state;
pub mod tool;

// --- Public API Re-exports ---

pub use act::{WorkspaceProvisioner, random_workspace_name};
pub use error::ProvisionError;
pub use pipeline::ProvisioningPipeline;
pub use stage::{ProvisioningStage, TargetId, Variable};
pub use state::clean_stale_state;
pub use tool::{ProvisioningTool, TerraformCli};
