//! Declarative verification scenarios
//!
//! A scenario bundles everything one browser session needs: the page to open,
//! the routes to mock, the session to inject and the ordered steps to run.
//! Scenarios are YAML documents; the timeline editor smoke check is also
//! available in code as [`Scenario::timeline_editor`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::auth::AuthInjection;
use crate::error::{VerifyError, VerifyResult};
use crate::mock::{MockRoute, MockTable};
use crate::playwright::Browser;

/// A complete verification scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Page opened by `navigate` steps without an explicit URL
    pub target: String,

    #[serde(default)]
    pub browser: Browser,

    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Viewport size for the browser
    #[serde(default = "default_viewport")]
    pub viewport: Viewport,

    /// Written when a visibility wait fails, relative to the artifact directory
    #[serde(default = "default_timeout_screenshot")]
    pub timeout_screenshot: PathBuf,

    /// Requests whose URL contains this and that no mock covers are reported
    #[serde(default = "default_watch_prefix")]
    pub watch_prefix: Option<String>,

    /// Routes fulfilled without contacting a server, in registration order
    #[serde(default)]
    pub mocks: MockTable,

    /// Session injected by `inject_auth`
    #[serde(default)]
    pub auth: Option<AuthInjection>,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

fn default_headless() -> bool {
    true
}

fn default_viewport() -> Viewport {
    Viewport { width: 1280, height: 720 }
}

fn default_timeout_screenshot() -> PathBuf {
    PathBuf::from("timeout.png")
}

fn default_watch_prefix() -> Option<String> {
    Some("/api/".to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    /// ARIA role, optionally narrowed by accessible name
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
    },
    /// Visible text
    Text { text: String },
    /// `title` attribute
    Title { title: String },
    /// Raw Playwright selector such as `text=Recent` or `#id`
    Selector { selector: String },
}

impl Locator {
    pub fn text(text: impl Into<String>) -> Self {
        Locator::Text { text: text.into() }
    }

    pub fn title(title: impl Into<String>) -> Self {
        Locator::Title { title: title.into() }
    }

    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Locator::Role {
            role: role.into(),
            name: Some(name.into()),
        }
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        Locator::Selector {
            selector: selector.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role { role, name: Some(name) } => write!(f, "role={}[name={:?}]", role, name),
            Locator::Role { role, name: None } => write!(f, "role={}", role),
            Locator::Text { text } => write!(f, "text={:?}", text),
            Locator::Title { title } => write!(f, "title={:?}", title),
            Locator::Selector { selector } => f.write_str(selector),
        }
    }
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Navigate and wait for the `load` event. Without a URL, opens the
    /// scenario target; a URL starting with `/` is resolved against its origin.
    Navigate {
        #[serde(default)]
        url: Option<String>,
    },

    /// Write the scenario's auth record into local storage and a cookie
    InjectAuth,

    /// Reload and wait for the `load` event
    Reload,

    /// Wait for an element to become visible
    ExpectVisible {
        locator: Locator,
        #[serde(default = "default_visible_timeout")]
        timeout_ms: u64,
    },

    /// Click an element
    Click {
        locator: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Press a key on the page keyboard
    Press { key: String },

    /// Capture the page, relative to the artifact directory
    Screenshot {
        path: PathBuf,
        #[serde(default)]
        full_page: bool,
    },

    /// Log a message (for debugging)
    Log { message: String },
}

fn default_visible_timeout() -> u64 {
    5000 // Playwright's default expect timeout
}

impl Step {
    /// Short identifier used in logs and reports
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url: Some(url) } => format!("navigate:{}", url),
            Step::Navigate { url: None } => "navigate".to_string(),
            Step::InjectAuth => "inject_auth".to_string(),
            Step::Reload => "reload".to_string(),
            Step::ExpectVisible { locator, .. } => format!("expect_visible:{}", locator),
            Step::Click { locator, .. } => format!("click:{}", locator),
            Step::Press { key } => format!("press:{}", key),
            Step::Screenshot { path, .. } => format!("screenshot:{}", path.display()),
            Step::Log { message } => format!("log:{}", message.chars().take(30).collect::<String>()),
        }
    }

    /// Progress line logged after the step succeeds. Screenshots and log
    /// steps report themselves.
    pub fn milestone(&self) -> Option<String> {
        match self {
            Step::Navigate { .. } => Some("Page loaded".to_string()),
            Step::InjectAuth => Some("Auth injected".to_string()),
            Step::Reload => Some("Reloaded".to_string()),
            Step::ExpectVisible { locator, .. } => Some(format!("{} visible", locator)),
            Step::Click { locator, .. } => Some(format!("Clicked {}", locator)),
            Step::Press { key } => Some(format!("Pressed {}", key)),
            Step::Screenshot { .. } | Step::Log { .. } => None,
        }
    }

    fn touches_page(&self) -> bool {
        !matches!(self, Step::Navigate { .. } | Step::Log { .. })
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> VerifyResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> VerifyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            VerifyError::ScenarioParse(reason) => {
                VerifyError::ScenarioParse(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })
    }

    /// Load all scenarios from a directory, sorted by file path
    pub fn load_all(dir: &Path) -> VerifyResult<Vec<Self>> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Reject scenarios that cannot run
    pub fn validate(&self) -> VerifyResult<()> {
        if self.steps.is_empty() {
            return Err(VerifyError::ScenarioParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }

        let mut navigated = false;
        for (i, step) in self.steps.iter().enumerate() {
            if matches!(step, Step::Navigate { .. }) {
                navigated = true;
            } else if step.touches_page() && !navigated {
                return Err(VerifyError::ScenarioParse(format!(
                    "scenario '{}' step {} ({}) runs before any navigate step",
                    self.name,
                    i + 1,
                    step.name()
                )));
            }

            if matches!(step, Step::InjectAuth) && self.auth.is_none() {
                return Err(VerifyError::ScenarioParse(format!(
                    "scenario '{}' injects auth but defines no auth record",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Replace the target page
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Absolute URL a navigate step opens
    pub fn resolve_url(&self, url: Option<&str>) -> String {
        match url {
            None => self.target.clone(),
            Some(path) if path.starts_with('/') => format!("{}{}", origin_of(&self.target), path),
            Some(absolute) => absolute.to_string(),
        }
    }

    /// Screenshot paths this scenario may write, relative to the artifact dir
    pub fn screenshot_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .steps
            .iter()
            .filter_map(|step| match step {
                Step::Screenshot { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect();
        if self.has_visibility_waits() {
            paths.push(self.timeout_screenshot.clone());
        }
        paths
    }

    pub fn has_visibility_waits(&self) -> bool {
        self.steps.iter().any(|s| matches!(s, Step::ExpectVisible { .. }))
    }

    /// The timeline editor smoke check.
    ///
    /// Opens timeline `tl1` with its backend fully mocked, restores a signed-in
    /// session, then checks the clip browser sort menu and the recommendation
    /// settings modal.
    pub fn timeline_editor() -> VerifyResult<Self> {
        let mocks = MockTable::new(vec![
            MockRoute::json(
                "**/api/collections/users/auth-refresh",
                json!({
                    "record": { "id": "user1", "email": "test@test.com" },
                    "token": "test-token"
                }),
            )?,
            MockRoute::json(
                "**/api/collections/Workspaces/records**",
                json!({
                    "items": [{ "id": "ws1", "name": "Test Workspace", "members": ["user1"] }]
                }),
            )?,
            MockRoute::json(
                "**/api/collections/Timelines/records/tl1*",
                json!({
                    "id": "tl1",
                    "name": "Test Timeline",
                    "WorkspaceRef": "ws1",
                    "clips": [],
                    "duration": 100,
                    "expand": { "TimelineClips_via_TimelineRef": [] }
                }),
            )?,
            MockRoute::json(
                "**/api/collections/MediaClips/records**",
                json!({ "items": [], "totalItems": 0 }),
            )?,
            MockRoute::json(
                "**/api/collections/TimelineRecommendations/records**",
                json!({ "items": [], "totalItems": 0 }),
            )?,
            MockRoute::empty("**/api/files/**", 404)?,
        ]);

        Ok(Self {
            name: "timeline-editor".to_string(),
            description: "Timeline editor loads with a mocked backend; sort menu and settings modal render"
                .to_string(),
            target: "http://localhost:3000/timelines/tl1".to_string(),
            browser: Browser::Chromium,
            headless: true,
            viewport: default_viewport(),
            timeout_screenshot: default_timeout_screenshot(),
            watch_prefix: default_watch_prefix(),
            mocks,
            auth: Some(AuthInjection::new("test-token", "user1", "test@test.com")),
            steps: vec![
                Step::Navigate { url: None },
                Step::InjectAuth,
                Step::Reload,
                Step::ExpectVisible {
                    locator: Locator::text("Test Timeline"),
                    timeout_ms: 10_000,
                },
                Step::Click {
                    locator: Locator::selector("text=Recent"),
                    timeout_ms: None,
                },
                Step::ExpectVisible {
                    locator: Locator::role("option", "Creation Time"),
                    timeout_ms: default_visible_timeout(),
                },
                Step::Press {
                    key: "Escape".to_string(),
                },
                Step::ExpectVisible {
                    locator: Locator::title("Settings"),
                    timeout_ms: default_visible_timeout(),
                },
                Step::Click {
                    locator: Locator::title("Settings"),
                    timeout_ms: None,
                },
                Step::ExpectVisible {
                    locator: Locator::text("Recommendation Settings"),
                    timeout_ms: default_visible_timeout(),
                },
                Step::ExpectVisible {
                    locator: Locator::text("Active Strategies"),
                    timeout_ms: default_visible_timeout(),
                },
                Step::Screenshot {
                    path: PathBuf::from("verification.png"),
                    full_page: false,
                },
            ],
        })
    }
}

/// `scheme://host[:port]` part of a URL, or the whole string if it has no path
pub fn origin_of(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(slash) => &url[..after_scheme + slash],
        None => url,
    }
}
