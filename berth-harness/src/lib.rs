//! berth test harness.
//!
//! Integration tests call [`Orchestrator::arrange_and_run`] with a test body;
//! the harness builds a private application stack, provisions it and always
//! tears it down again.
//!
//! ```no_run
//! use berth_harness::{Orchestrator, TestContext};
//!
//! # async fn example() -> Result<(), berth_core::BerthError> {
//! let orchestrator = Orchestrator::from_env()?;
//! orchestrator
//!     .arrange_and_run(|ctx: TestContext| async move {
//!         let root: serde_json::Value = ctx.client.get_json("/api").await?;
//!         assert!(root.is_object());
//!         Ok::<_, berth_harness::ClientError>(())
//!     })
//!     .await
//! # }
//! ```

pub mod client;
pub mod logging;
pub mod orchestrator;
pub mod state;

pub use client::{ApiClient, ClientError};
pub use logging::{init_test_tracing, init_tracing};
pub use orchestrator::{ArrangedEnvironment, Orchestrator, TestContext};
pub use state::{ArrangementState, StateTracker};
