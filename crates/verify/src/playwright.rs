//! Playwright browser automation
//!
//! A scenario is compiled into a standalone Node.js script that drives the
//! `playwright` package and reports progress as JSON lines on stdout (see
//! [`crate::protocol`]). The script owns the browser: it launches it first
//! and closes it in a `finally` block. This side owns the Node.js process and
//! terminates it if the run deadline passes.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::INJECT_AUTH_JS;
use crate::error::{VerifyError, VerifyResult};
use crate::protocol::Transcript;
use crate::scenario::{Locator, Scenario, Step};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser '{}' (chromium, firefox, webkit)", other)),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub workdir: PathBuf,

    /// Directory screenshots are written to
    pub artifact_dir: PathBuf,

    /// Hard deadline for one driver run
    pub run_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            workdir: PathBuf::from("."),
            artifact_dir: PathBuf::from("verification"),
            run_timeout: Duration::from_secs(120),
        }
    }
}

/// What one driver run produced
#[derive(Debug)]
pub struct DriverOutcome {
    pub transcript: Transcript,
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
}

/// Playwright driver handle
pub struct PlaywrightHandle {
    node_binary: PathBuf,
    workdir: PathBuf,
    artifact_dir: PathBuf,
    run_timeout: Duration,
}

impl PlaywrightHandle {
    /// Create a handle after checking that Node.js can load Playwright
    pub fn new(config: PlaywrightConfig) -> VerifyResult<Self> {
        let handle = Self::without_preflight(config)?;
        handle.check_playwright_installed()?;
        std::fs::create_dir_all(&handle.artifact_dir)?;
        Ok(handle)
    }

    /// Create a handle without touching Node.js or the filesystem
    pub fn without_preflight(config: PlaywrightConfig) -> VerifyResult<Self> {
        Ok(Self {
            node_binary: config.node_binary,
            workdir: absolute(&config.workdir)?,
            artifact_dir: absolute(&config.artifact_dir)?,
            run_timeout: config.run_timeout,
        })
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Check that `require('playwright')` resolves
    fn check_playwright_installed(&self) -> VerifyResult<()> {
        let status = Command::new(&self.node_binary)
            .args(["-e", "require.resolve('playwright')"])
            .current_dir(&self.workdir)
            .env("NODE_PATH", self.node_path())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(VerifyError::PlaywrightNotFound {
                node: self.node_binary.display().to_string(),
            }),
        }
    }

    fn node_path(&self) -> OsString {
        let local = self.workdir.join("node_modules");
        let mut paths = vec![local.clone()];
        if let Some(existing) = std::env::var_os("NODE_PATH") {
            paths.extend(std::env::split_paths(&existing));
        }
        std::env::join_paths(paths).unwrap_or_else(|_| local.into_os_string())
    }

    /// Build the driver script for a scenario
    pub fn build_script(&self, scenario: &Scenario) -> VerifyResult<String> {
        let mut script = String::new();

        // Header
        script.push_str(&format!(
            r#"const playwright = require('playwright');

const emit = (event) => process.stdout.write(JSON.stringify(event) + '\n');

(async () => {{
  const browser = await playwright[{browser}].launch({{ headless: {headless} }});
  emit({{ event: 'launched', browser: {browser} }});

  try {{
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    const page = await context.newPage();

    page.on('console', (msg) => emit({{ event: 'console', level: msg.type(), text: msg.text() }}));
    page.on('pageerror', (err) => emit({{ event: 'page_error', message: err.message }}));
    page.on('request', (req) => emit({{ event: 'request', method: req.method(), url: req.url() }}));

    const screenshot = async (path, reason, fullPage) => {{
      await page.screenshot({{ path, fullPage }});
      emit({{ event: 'screenshot', path, reason }});
    }};

    const captureTimeout = async () => {{
      try {{
        await screenshot({timeout_path}, 'timeout', false);
      }} catch (error) {{
        emit({{ event: 'console', level: 'error', text: 'timeout screenshot failed: ' + error.message }});
      }}
    }};

    const step = async (index, name, milestone, body, onFailure) => {{
      const started = Date.now();
      emit({{ event: 'step_started', index, name }});
      try {{
        await body();
      }} catch (error) {{
        emit({{ event: 'step_failed', index, name, duration_ms: Date.now() - started, error: error.message }});
        if (onFailure) await onFailure();
        throw error;
      }}
      emit({{ event: 'step_passed', index, name, duration_ms: Date.now() - started, milestone }});
    }};
"#,
            browser = js(&scenario.browser.as_str())?,
            headless = scenario.headless,
            width = scenario.viewport.width,
            height = scenario.viewport.height,
            timeout_path = js(&self.artifact_path(&scenario.timeout_screenshot))?,
        ));

        // Routes are registered before the first navigation
        for (i, route) in scenario.mocks.routes().iter().enumerate() {
            let fulfill = match &route.body {
                Some(_) => format!(
                    "{{ status: {}, contentType: {}, body: {} }}",
                    route.status,
                    js(&route.content_type)?,
                    js(&route.body_text()?)?
                ),
                None => format!("{{ status: {} }}", route.status),
            };
            script.push_str(&format!(
                r#"
    // Mock {n}: {pattern}
    await page.route(new RegExp({regex}), async (route) => {{
      emit({{ event: 'mocked', route: {i}, url: route.request().url(), status: {status} }});
      await route.fulfill({fulfill});
    }});
"#,
                n = i + 1,
                pattern = route.pattern,
                regex = js(&route.pattern.regex_source())?,
                i = i,
                status = route.status,
                fulfill = fulfill,
            ));
        }

        // Generate step code
        for (i, step) in scenario.steps.iter().enumerate() {
            let on_failure = match step {
                Step::ExpectVisible { .. } => ", captureTimeout",
                _ => "",
            };
            script.push_str(&format!(
                r#"
    // Step {n}: {name}
    await step({i}, {name_js}, {milestone_js}, async () => {{
{body}
    }}{on_failure});
"#,
                n = i + 1,
                name = step.name().replace('\n', " "),
                i = i,
                name_js = js(&step.name())?,
                milestone_js = js(&step.milestone())?,
                body = self.step_to_js(step, scenario)?,
                on_failure = on_failure,
            ));
        }

        // Footer
        script.push_str(
            r#"
    emit({ event: 'finished', success: true });
  } catch (error) {
    emit({ event: 'finished', success: false, error: error.message });
    process.exitCode = 1;
  } finally {
    await browser.close();
    emit({ event: 'closed' });
  }
})().catch((error) => {
  emit({ event: 'fatal', error: error.message });
  process.exitCode = 2;
});
"#,
        );

        Ok(script)
    }

    /// Convert a step to the body of its `step(...)` callback
    fn step_to_js(&self, step: &Step, scenario: &Scenario) -> VerifyResult<String> {
        let code = match step {
            Step::Navigate { url } => {
                let url = scenario.resolve_url(url.as_deref());
                format!("      await page.goto({}, {{ waitUntil: 'load' }});", js(&url)?)
            }
            Step::InjectAuth => {
                let auth = scenario.auth.as_ref().ok_or_else(|| {
                    VerifyError::ScenarioParse(format!(
                        "scenario '{}' injects auth but defines no auth record",
                        scenario.name
                    ))
                })?;
                format!(
                    "      await page.evaluate({}, {});",
                    INJECT_AUTH_JS,
                    js(&auth.page_argument())?
                )
            }
            Step::Reload => "      await page.reload({ waitUntil: 'load' });".to_string(),
            Step::ExpectVisible { locator, timeout_ms } => format!(
                "      await {}.waitFor({{ state: 'visible', timeout: {} }});",
                locator_to_js(locator)?,
                timeout_ms
            ),
            Step::Click { locator, timeout_ms } => match timeout_ms {
                Some(t) => format!("      await {}.click({{ timeout: {} }});", locator_to_js(locator)?, t),
                None => format!("      await {}.click();", locator_to_js(locator)?),
            },
            Step::Press { key } => format!("      await page.keyboard.press({});", js(key)?),
            Step::Screenshot { path, full_page } => format!(
                "      await screenshot({}, 'step', {});",
                js(&self.artifact_path(path))?,
                full_page
            ),
            Step::Log { message } => format!(
                "      emit({{ event: 'console', level: 'info', text: {} }});",
                js(&format!("[SCENARIO] {}", message))?
            ),
        };
        Ok(code)
    }

    fn artifact_path(&self, relative: &Path) -> String {
        self.artifact_dir.join(relative).to_string_lossy().to_string()
    }

    /// Run a scenario to completion or until the run deadline
    pub async fn run(&self, scenario: &Scenario) -> VerifyResult<DriverOutcome> {
        let script = self.build_script(scenario)?;

        // Write script to temp file
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("verify.js");
        std::fs::write(&script_path, &script)?;

        debug!("Running driver script: {}", script_path.display());

        let mut child = TokioCommand::new(&self.node_binary)
            .arg(&script_path)
            .current_dir(&self.workdir)
            .env("NODE_PATH", self.node_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VerifyError::Playwright(format!(
                    "Failed to spawn {}: {}",
                    self.node_binary.display(),
                    e
                ))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VerifyError::Playwright("driver stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| VerifyError::Playwright("driver stderr not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let mut transcript = Transcript::new();
        let watch_prefix = scenario.watch_prefix.as_deref();
        let mut lines = BufReader::new(stdout).lines();

        let read_all = async {
            while let Some(line) = lines.next_line().await? {
                transcript.ingest(&line, &scenario.mocks, watch_prefix);
            }
            Ok::<_, std::io::Error>(())
        };

        let timed_out = match timeout(self.run_timeout, read_all).await {
            Ok(result) => {
                result?;
                false
            }
            Err(_) => {
                warn!(
                    "Driver exceeded {:?}, terminating (pid: {:?})",
                    self.run_timeout,
                    child.id()
                );
                terminate(&mut child).await;
                true
            }
        };

        let status = match timeout(Duration::from_secs(10), child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("Driver did not exit after closing stdout, terminating");
                terminate(&mut child).await;
                child.wait().await?
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        if !stderr.trim().is_empty() {
            debug!("driver stderr:\n{}", stderr.trim_end());
        }

        info!("Driver exited with {}", status);

        Ok(DriverOutcome {
            transcript,
            exit_code: status.code(),
            stderr,
            timed_out,
        })
    }
}

/// Ask the driver to stop, then force it
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            // Playwright closes its browsers on SIGTERM
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && timeout(Duration::from_secs(5), child.wait()).await.is_ok()
            {
                return;
            }
        }
    }

    let _ = child.kill().await;
}

fn locator_to_js(locator: &Locator) -> VerifyResult<String> {
    let code = match locator {
        Locator::Role { role, name: Some(name) } => {
            format!("page.getByRole({}, {{ name: {} }})", js(role)?, js(name)?)
        }
        Locator::Role { role, name: None } => format!("page.getByRole({})", js(role)?),
        Locator::Text { text } => format!("page.getByText({})", js(text)?),
        Locator::Title { title } => format!("page.getByTitle({})", js(title)?),
        Locator::Selector { selector } => format!("page.locator({})", js(selector)?),
    };
    Ok(code)
}

/// JSON is a valid JavaScript literal
fn js<T: Serialize + ?Sized>(value: &T) -> VerifyResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn absolute(path: &Path) -> VerifyResult<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
