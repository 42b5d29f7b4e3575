//! Verification runner that orchestrates the target probe, the driver and
//! artifact checks

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::artifact::{self, Artifact};
use crate::error::{VerifyError, VerifyResult};
use crate::playwright::{Browser, DriverOutcome, PlaywrightConfig, PlaywrightHandle};
use crate::protocol::{ScriptEvent, UnmockedRequest};
use crate::scenario::{Scenario, Step};
use crate::target;

/// Result of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// A request answered by a mock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockedRequest {
    pub route: usize,
    pub pattern: String,
    pub url: String,
    pub status: u16,
}

/// Result of verifying one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub name: String,
    pub target: String,
    pub started_at: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub mocked_requests: Vec<MockedRequest>,
    pub unmocked_requests: Vec<UnmockedRequest>,
    pub page_errors: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub browser_closed: bool,
    pub error: Option<String>,

    /// Driver stdout lines that were not protocol events
    #[serde(default)]
    pub driver_output: Vec<String>,
}

impl VerificationReport {
    /// Report for a scenario that could not be carried out
    fn aborted(
        scenario: &Scenario,
        started_at: String,
        duration_ms: u64,
        error: &VerifyError,
    ) -> Self {
        Self {
            name: scenario.name.clone(),
            target: scenario.target.clone(),
            started_at,
            success: false,
            duration_ms,
            steps: vec![],
            mocked_requests: vec![],
            unmocked_requests: vec![],
            page_errors: vec![],
            artifacts: vec![],
            browser_closed: false,
            error: Some(error.to_string()),
            driver_output: vec![],
        }
    }
}

/// Result of verifying several scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,

    /// Failed scenarios that never produced a verdict
    #[serde(default)]
    pub errors: usize,

    pub duration_ms: u64,
    pub results: Vec<VerificationReport>,
}

impl SuiteReport {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// 0 when everything passed, 2 if any scenario could not be run, else 1
    pub fn exit_code(&self) -> i32 {
        if self.errors > 0 {
            2
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Configuration for the runner
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    pub playwright: PlaywrightConfig,

    /// Replaces every scenario's target page
    pub target: Option<String>,

    /// Replaces every scenario's browser
    pub browser: Option<Browser>,

    /// Show the browser window
    pub headed: bool,

    /// Wait this long for the target to answer before launching
    pub wait_for_target: Option<Duration>,
}

/// Main verification runner
pub struct VerifyRunner {
    config: RunnerConfig,
}

impl VerifyRunner {
    /// Create a runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    /// Create a runner with custom configuration
    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Apply command-line overrides to a scenario
    pub fn prepare(&self, scenario: Scenario) -> Scenario {
        let mut scenario = match &self.config.target {
            Some(target) => scenario.with_target(target.clone()),
            None => scenario,
        };
        if let Some(browser) = self.config.browser {
            scenario.browser = browser;
        }
        if self.config.headed {
            scenario.headless = false;
        }
        scenario
    }

    /// The driver script a scenario would run, without running it
    pub fn script_for(&self, scenario: Scenario) -> VerifyResult<String> {
        let handle = PlaywrightHandle::without_preflight(self.config.playwright.clone())?;
        handle.build_script(&self.prepare(scenario))
    }

    /// Run one scenario
    pub async fn run(&self, scenario: Scenario) -> VerifyResult<VerificationReport> {
        let handle = PlaywrightHandle::new(self.config.playwright.clone())?;
        self.run_with(&handle, self.prepare(scenario)).await
    }

    /// Run scenarios one after another, each in its own browser.
    ///
    /// A scenario that cannot be carried out is recorded as failed and the
    /// suite moves on.
    pub async fn run_all(&self, scenarios: Vec<Scenario>) -> VerifyResult<SuiteReport> {
        let start = Instant::now();
        let handle = PlaywrightHandle::new(self.config.playwright.clone())?;

        let total = scenarios.len();
        let mut results = Vec::with_capacity(total);
        let mut passed = 0;
        let mut failed = 0;
        let mut errors = 0;

        info!("Running {} scenario(s)...", total);

        for scenario in scenarios {
            let scenario = self.prepare(scenario);
            let scenario_start = Instant::now();
            let started_at = chrono::Utc::now().to_rfc3339();

            match self.run_with(&handle, scenario.clone()).await {
                Ok(report) => {
                    if report.success {
                        passed += 1;
                        info!("✓ {} ({} ms)", report.name, report.duration_ms);
                    } else {
                        failed += 1;
                        error!(
                            "✗ {} - {}",
                            report.name,
                            report.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    results.push(report);
                }
                Err(e) => {
                    failed += 1;
                    errors += 1;
                    error!("✗ {} - {}", scenario.name, e);
                    results.push(VerificationReport::aborted(
                        &scenario,
                        started_at,
                        scenario_start.elapsed().as_millis() as u64,
                        &e,
                    ));
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Results: {} passed, {} failed, {} error(s) ({} ms)",
            passed, failed, errors, duration_ms
        );

        Ok(SuiteReport {
            total,
            passed,
            failed,
            errors,
            duration_ms,
            results,
        })
    }

    async fn run_with(
        &self,
        handle: &PlaywrightHandle,
        scenario: Scenario,
    ) -> VerifyResult<VerificationReport> {
        let start = Instant::now();
        let started_at = chrono::Utc::now().to_rfc3339();

        info!("Verifying '{}' against {}", scenario.name, scenario.target);

        if let Some(wait) = self.config.wait_for_target {
            target::wait_until_reachable(&scenario.target, wait).await?;
        }

        std::fs::create_dir_all(handle.artifact_dir())?;
        artifact::clear_stale(handle.artifact_dir(), &scenario.screenshot_paths())?;

        let outcome = handle.run(&scenario).await?;
        let mut report = build_report(&scenario, handle.artifact_dir(), &outcome, started_at)?;
        report.duration_ms = start.elapsed().as_millis() as u64;

        Ok(report)
    }

    /// Write a suite report as JSON
    pub fn write_results(&self, results: &SuiteReport, path: &Path) -> VerifyResult<PathBuf> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}

impl Default for VerifyRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn a driver transcript into a report.
///
/// A driver that died before reporting an outcome (browser failed to launch,
/// script crashed) is an error; a failed step or a missing artifact is a
/// failed report.
pub fn build_report(
    scenario: &Scenario,
    artifact_dir: &Path,
    outcome: &DriverOutcome,
    started_at: String,
) -> VerifyResult<VerificationReport> {
    let transcript = &outcome.transcript;

    if let Some(fatal) = transcript.fatal() {
        return Err(VerifyError::Playwright(with_stderr(fatal, &outcome.stderr)));
    }

    let finished = transcript.finished();
    if finished.is_none() && !outcome.timed_out {
        return Err(VerifyError::Playwright(with_stderr(
            &format!(
                "driver exited ({}) without reporting an outcome",
                outcome
                    .exit_code
                    .map(|c| format!("code {}", c))
                    .unwrap_or_else(|| "signal".to_string())
            ),
            &outcome.stderr,
        )));
    }

    let mut steps = Vec::new();
    let mut mocked_requests = Vec::new();
    let mut failed_step = None;

    for event in transcript.events() {
        match event {
            ScriptEvent::StepPassed { index, name, duration_ms, .. } => steps.push(StepResult {
                index: *index,
                name: name.clone(),
                success: true,
                duration_ms: *duration_ms,
                error: None,
            }),
            ScriptEvent::StepFailed { index, name, duration_ms, error } => {
                failed_step = Some(VerifyError::StepFailed {
                    step: name.clone(),
                    reason: error.clone(),
                });
                steps.push(StepResult {
                    index: *index,
                    name: name.clone(),
                    success: false,
                    duration_ms: *duration_ms,
                    error: Some(error.clone()),
                });
            }
            ScriptEvent::Mocked { route, url, status } => mocked_requests.push(MockedRequest {
                route: *route,
                pattern: scenario
                    .mocks
                    .routes()
                    .get(*route)
                    .map(|r| r.pattern.to_string())
                    .unwrap_or_default(),
                url: url.clone(),
                status: *status,
            }),
            _ => {}
        }
    }

    let mut artifacts = Vec::new();
    let mut artifact_error = None;
    for (path, reason) in transcript.screenshots() {
        match Artifact::inspect(path, reason) {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                warn!("Screenshot {} unusable: {}", path.display(), e);
                artifact_error.get_or_insert(e);
            }
        }
    }

    let mut error: Option<VerifyError> = None;

    if outcome.timed_out {
        error = Some(VerifyError::Timeout("driver run deadline".to_string()));
    } else if let Some((false, reason)) = finished {
        error = Some(failed_step.unwrap_or_else(|| {
            VerifyError::Playwright(reason.unwrap_or("unknown error").to_string())
        }));
    } else if outcome.exit_code != Some(0) {
        error = Some(VerifyError::Playwright(with_stderr(
            &format!("driver reported success but exited with {:?}", outcome.exit_code),
            &outcome.stderr,
        )));
    } else {
        // Every screenshot step must have left a usable file behind
        for step in &scenario.steps {
            if let Step::Screenshot { path, .. } = step {
                let expected = artifact_dir.join(path);
                if !artifacts.iter().any(|a| a.path == expected) {
                    error = Some(
                        artifact_error
                            .take()
                            .unwrap_or(VerifyError::MissingArtifact(expected)),
                    );
                    break;
                }
            }
        }
    }

    let close_count = transcript.close_count();
    if close_count != 1 {
        warn!("Browser reported closing {} time(s)", close_count);
    }

    debug!(
        "{} step(s), {} mocked request(s), {} artifact(s)",
        steps.len(),
        mocked_requests.len(),
        artifacts.len()
    );

    Ok(VerificationReport {
        name: scenario.name.clone(),
        target: scenario.target.clone(),
        started_at,
        success: error.is_none(),
        duration_ms: 0,
        steps,
        mocked_requests,
        unmocked_requests: transcript.unmocked().to_vec(),
        page_errors: transcript.page_errors(),
        artifacts,
        browser_closed: close_count == 1,
        error: error.map(|e| e.to_string()),
        driver_output: transcript.raw_lines().to_vec(),
    })
}

fn with_stderr(message: &str, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        message.to_string()
    } else {
        // The tail carries the stack trace
        let tail: Vec<&str> = stderr.lines().rev().take(10).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        format!("{}\nstderr:\n{}", message, tail.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Transcript;
    use image::RgbaImage;

    fn outcome(lines: &[String], exit_code: i32) -> DriverOutcome {
        let scenario = Scenario::timeline_editor().unwrap();
        let mut transcript = Transcript::new();
        for line in lines {
            transcript.ingest(line, &scenario.mocks, scenario.watch_prefix.as_deref());
        }
        DriverOutcome {
            transcript,
            exit_code: Some(exit_code),
            stderr: String::new(),
            timed_out: false,
        }
    }

    #[test]
    fn test_successful_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("verification.png");
        RgbaImage::new(4, 4).save(&shot).unwrap();

        let lines = vec![
            r#"{"event":"launched","browser":"chromium"}"#.to_string(),
            "(node:4242) Warning: Setting the NODE_TLS_REJECT_UNAUTHORIZED".to_string(),
            r#"{"event":"mocked","route":2,"url":"http://localhost:3000/api/collections/Timelines/records/tl1","status":200}"#.to_string(),
            r#"{"event":"step_passed","index":0,"name":"navigate","duration_ms":12}"#.to_string(),
            format!(r#"{{"event":"screenshot","path":{:?},"reason":"step"}}"#, shot.to_string_lossy()),
            r#"{"event":"finished","success":true}"#.to_string(),
            r#"{"event":"closed"}"#.to_string(),
        ];

        let scenario = Scenario::timeline_editor().unwrap();
        let report = build_report(&scenario, dir.path(), &outcome(&lines, 0), "now".into()).unwrap();

        assert!(report.success, "{:?}", report.error);
        assert!(report.browser_closed);
        assert_eq!(report.mocked_requests.len(), 1);
        assert_eq!(
            report.mocked_requests[0].pattern,
            "**/api/collections/Timelines/records/tl1*"
        );
        assert_eq!(report.artifacts.len(), 1);
        assert_eq!(
            report.driver_output,
            vec!["(node:4242) Warning: Setting the NODE_TLS_REJECT_UNAUTHORIZED".to_string()]
        );
    }

    #[test]
    fn test_suite_exit_codes() {
        let suite = |failed, errors| SuiteReport {
            total: 2,
            passed: 2 - failed,
            failed,
            errors,
            duration_ms: 0,
            results: vec![],
        };
        assert_eq!(suite(0, 0).exit_code(), 0);
        assert_eq!(suite(1, 0).exit_code(), 1);
        assert_eq!(suite(2, 1).exit_code(), 2);
    }

    #[test]
    fn test_missing_final_screenshot_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            r#"{"event":"finished","success":true}"#.to_string(),
            r#"{"event":"closed"}"#.to_string(),
        ];

        let scenario = Scenario::timeline_editor().unwrap();
        let report = build_report(&scenario, dir.path(), &outcome(&lines, 0), "now".into()).unwrap();

        assert!(!report.success);
        assert!(report.error.unwrap().contains("verification.png"));
    }

    #[test]
    fn test_failed_step_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let lines = vec![
            r#"{"event":"step_failed","index":3,"name":"expect_visible:text=\"Test Timeline\"","duration_ms":10000,"error":"Timeout 10000ms exceeded."}"#.to_string(),
            r#"{"event":"finished","success":false,"error":"Timeout 10000ms exceeded."}"#.to_string(),
            r#"{"event":"closed"}"#.to_string(),
        ];

        let scenario = Scenario::timeline_editor().unwrap();
        let report = build_report(&scenario, dir.path(), &outcome(&lines, 1), "now".into()).unwrap();

        assert!(!report.success);
        assert!(report.browser_closed);
        assert_eq!(report.steps.len(), 1);
        assert!(!report.steps[0].success);
        let error = report.error.unwrap();
        assert!(error.contains("Test Timeline"), "{}", error);
        assert!(error.contains("Timeout 10000ms exceeded"), "{}", error);
    }

    #[test]
    fn test_driver_without_outcome_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::timeline_editor().unwrap();

        let crashed = outcome(&[], 1);
        assert!(matches!(
            build_report(&scenario, dir.path(), &crashed, "now".into()),
            Err(VerifyError::Playwright(_))
        ));

        let fatal = outcome(&[r#"{"event":"fatal","error":"Executable doesn't exist"}"#.to_string()], 2);
        let err = build_report(&scenario, dir.path(), &fatal, "now".into()).unwrap_err();
        assert!(err.to_string().contains("Executable doesn't exist"));
    }

    #[test]
    fn test_overrides_are_applied() {
        let runner = VerifyRunner::with_config(RunnerConfig {
            target: Some("http://127.0.0.1:4000/timelines/tl1".into()),
            browser: Some(Browser::Firefox),
            headed: true,
            ..Default::default()
        });

        let scenario = runner.prepare(Scenario::timeline_editor().unwrap());
        assert_eq!(scenario.target, "http://127.0.0.1:4000/timelines/tl1");
        assert_eq!(scenario.browser, Browser::Firefox);
        assert!(!scenario.headless);
    }
}
