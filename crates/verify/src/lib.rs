//! Timeline editor smoke verification
//!
//! This crate drives a headless browser through Playwright to check that the
//! timeline editor renders against a fully mocked backend:
//! - Mocks the PocketBase API with session-local route fixtures
//! - Restores a signed-in session through local storage and a cookie
//! - Waits for the key UI elements and captures screenshot artifacts
//! - Reports the outcome through the process exit code
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Verification Runner (Rust)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  VerifyRunner                                               │
//! │    ├── wait_until_reachable(target)      (optional)         │
//! │    ├── clear_stale(artifacts)                               │
//! │    ├── PlaywrightHandle::run(scenario) -> DriverOutcome     │
//! │    │     └── node verify.js  ──JSON lines──▶ Transcript     │
//! │    └── build_report(outcome) -> VerificationReport          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML or built-in)                                │
//! │    ├── target, browser, viewport                            │
//! │    ├── mocks: [MockRoute { pattern, status, body }]         │
//! │    ├── auth: AuthInjection                                  │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate / reload / inject_auth                │
//! │          ├── expect_visible { locator, timeout_ms }         │
//! │          ├── click { locator } / press { key }              │
//! │          └── screenshot { path }                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod auth;
pub mod error;
pub mod mock;
pub mod playwright;
pub mod protocol;
pub mod runner;
pub mod scenario;
pub mod target;

pub use error::{VerifyError, VerifyResult};
pub use mock::{MockRoute, MockTable, UrlGlob};
pub use runner::{RunnerConfig, SuiteReport, VerificationReport, VerifyRunner};
pub use scenario::{Locator, Scenario, Step};
