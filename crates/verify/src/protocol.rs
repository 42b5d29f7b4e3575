//! Driver script event protocol
//!
//! The generated script writes one JSON object per stdout line. Each line is
//! parsed into a [`ScriptEvent`], logged as it arrives and appended to a
//! [`Transcript`] that the runner turns into a report.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::mock::MockTable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Launched {
        browser: String,
    },
    Request {
        method: String,
        url: String,
    },
    Mocked {
        route: usize,
        url: String,
        status: u16,
    },
    Console {
        level: String,
        text: String,
    },
    PageError {
        message: String,
    },
    StepStarted {
        index: usize,
        name: String,
    },
    StepPassed {
        index: usize,
        name: String,
        duration_ms: u64,
        /// Progress line to log once the step is done
        #[serde(default)]
        milestone: Option<String>,
    },
    StepFailed {
        index: usize,
        name: String,
        duration_ms: u64,
        error: String,
    },
    Screenshot {
        path: PathBuf,
        reason: ScreenshotReason,
    },
    Finished {
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
    Fatal {
        error: String,
    },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotReason {
    Step,
    Timeout,
}

impl ScriptEvent {
    /// Parse one stdout line. `None` for lines that are not protocol events.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str(line).ok()
    }

    fn log(&self) {
        match self {
            ScriptEvent::Launched { browser } => info!("Browser launched ({})", browser),
            ScriptEvent::Request { method, url } => debug!("REQ: {} {}", method, url),
            ScriptEvent::Mocked { route, url, status } => {
                debug!("MOCKING: {} -> {} (route {})", url, status, route)
            }
            ScriptEvent::Console { level, text } => debug!("PAGE LOG [{}]: {}", level, text),
            ScriptEvent::PageError { message } => warn!("PAGE ERROR: {}", message),
            ScriptEvent::StepStarted { index, name } => info!("Step {}: {}", index + 1, name),
            ScriptEvent::StepPassed { milestone: Some(milestone), .. } => info!("{}", milestone),
            ScriptEvent::StepPassed { .. } => {}
            ScriptEvent::StepFailed { index, name, error, .. } => {
                error!("Step {} failed: {} - {}", index + 1, name, error)
            }
            ScriptEvent::Screenshot { path, reason: ScreenshotReason::Timeout } => {
                warn!("Timeout. Screenshot taken: {}", path.display())
            }
            ScriptEvent::Screenshot { path, .. } => info!("Screenshot taken: {}", path.display()),
            ScriptEvent::Finished { success: true, .. } => info!("Verification passed"),
            ScriptEvent::Finished { success: false, error: err } => {
                error!("Verification failed: {}", err.as_deref().unwrap_or("unknown error"))
            }
            ScriptEvent::Fatal { error: err } => error!("Driver error: {}", err),
            ScriptEvent::Closed => debug!("Browser closed"),
        }
    }
}

/// A request no mock covered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmockedRequest {
    pub method: String,
    pub url: String,
}

/// Everything one driver run reported, in arrival order
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    events: Vec<ScriptEvent>,
    unmocked: Vec<UnmockedRequest>,
    raw_lines: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one stdout line, classifying requests against the session's mocks
    pub fn ingest(&mut self, line: &str, mocks: &MockTable, watch_prefix: Option<&str>) {
        let Some(event) = ScriptEvent::parse(line) else {
            if !line.trim().is_empty() {
                debug!("driver: {}", line);
                self.raw_lines.push(line.to_string());
            }
            return;
        };

        event.log();

        if let ScriptEvent::Request { method, url } = &event {
            let watched = watch_prefix.map(|p| url.contains(p)).unwrap_or(false);
            if watched && mocks.resolve(url).is_none() {
                warn!("Unmocked request reached the network: {} {}", method, url);
                self.unmocked.push(UnmockedRequest {
                    method: method.clone(),
                    url: url.clone(),
                });
            }
        }

        self.events.push(event);
    }

    pub fn events(&self) -> &[ScriptEvent] {
        &self.events
    }

    pub fn unmocked(&self) -> &[UnmockedRequest] {
        &self.unmocked
    }

    /// Lines that were not protocol events
    pub fn raw_lines(&self) -> &[String] {
        &self.raw_lines
    }

    /// Outcome reported by the script, if it got that far
    pub fn finished(&self) -> Option<(bool, Option<&str>)> {
        self.events.iter().rev().find_map(|e| match e {
            ScriptEvent::Finished { success, error } => Some((*success, error.as_deref())),
            _ => None,
        })
    }

    pub fn fatal(&self) -> Option<&str> {
        self.events.iter().find_map(|e| match e {
            ScriptEvent::Fatal { error } => Some(error.as_str()),
            _ => None,
        })
    }

    /// Number of times the browser reported closing
    pub fn close_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, ScriptEvent::Closed)).count()
    }

    pub fn screenshots(&self) -> impl Iterator<Item = (&PathBuf, ScreenshotReason)> {
        self.events.iter().filter_map(|e| match e {
            ScriptEvent::Screenshot { path, reason } => Some((path, *reason)),
            _ => None,
        })
    }

    pub fn page_errors(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScriptEvent::PageError { message } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRoute;

    #[test]
    fn test_parse_events() {
        assert_eq!(
            ScriptEvent::parse(r#"{"event":"mocked","route":5,"url":"http://h/api/files/a","status":404}"#),
            Some(ScriptEvent::Mocked {
                route: 5,
                url: "http://h/api/files/a".into(),
                status: 404
            })
        );
        assert_eq!(ScriptEvent::parse(r#"{"event":"closed"}"#), Some(ScriptEvent::Closed));
        assert_eq!(
            ScriptEvent::parse(r#"{"event":"step_passed","index":0,"name":"navigate","duration_ms":40,"milestone":"Page loaded"}"#),
            Some(ScriptEvent::StepPassed {
                index: 0,
                name: "navigate".into(),
                duration_ms: 40,
                milestone: Some("Page loaded".into()),
            })
        );
        assert!(matches!(
            ScriptEvent::parse(r#"{"event":"step_passed","index":1,"name":"reload","duration_ms":5}"#),
            Some(ScriptEvent::StepPassed { milestone: None, .. })
        ));
        assert_eq!(
            ScriptEvent::parse(r#"{"event":"finished","success":true}"#),
            Some(ScriptEvent::Finished { success: true, error: None })
        );
    }

    #[test]
    fn test_non_protocol_lines_are_kept_raw() {
        let mut transcript = Transcript::new();
        let mocks = MockTable::default();
        transcript.ingest("(node:123) Warning: something", &mocks, None);
        transcript.ingest(r#"{"event":"no_such_event"}"#, &mocks, None);
        transcript.ingest("", &mocks, None);

        assert!(transcript.events().is_empty());
        assert_eq!(transcript.raw_lines().len(), 2);
    }

    #[test]
    fn test_unmocked_api_requests_are_flagged() {
        let mocks = MockTable::new(vec![MockRoute::empty("**/api/files/**", 404).unwrap()]);
        let mut transcript = Transcript::new();

        for url in [
            "http://localhost:3000/timelines/tl1",
            "http://localhost:3000/api/files/x.png",
            "http://localhost:3000/api/health",
        ] {
            let line = serde_json::to_string(&ScriptEvent::Request {
                method: "GET".into(),
                url: url.into(),
            })
            .unwrap();
            transcript.ingest(&line, &mocks, Some("/api/"));
        }

        assert_eq!(transcript.events().len(), 3);
        assert_eq!(
            transcript.unmocked(),
            &[UnmockedRequest {
                method: "GET".into(),
                url: "http://localhost:3000/api/health".into()
            }]
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let mocks = MockTable::default();
        let mut transcript = Transcript::new();
        for line in [
            r#"{"event":"screenshot","path":"/tmp/v/timeout.png","reason":"timeout"}"#,
            r#"{"event":"finished","success":false,"error":"Timeout 10000ms exceeded"}"#,
            r#"{"event":"closed"}"#,
        ] {
            transcript.ingest(line, &mocks, None);
        }

        assert_eq!(transcript.finished(), Some((false, Some("Timeout 10000ms exceeded"))));
        assert_eq!(transcript.close_count(), 1);
        let shots: Vec<_> = transcript.screenshots().collect();
        assert_eq!(shots, vec![(&PathBuf::from("/tmp/v/timeout.png"), ScreenshotReason::Timeout)]);
    }
}
