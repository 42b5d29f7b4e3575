//! The built-in timeline editor scenario

use std::path::{Path, PathBuf};

use serde_json::json;
use timeline_verify::playwright::{PlaywrightConfig, PlaywrightHandle};
use timeline_verify::{Locator, Scenario, Step};

const ORIGIN: &str = "http://localhost:3000";

fn builtin() -> Scenario {
    Scenario::timeline_editor().unwrap()
}

#[test]
fn mocked_endpoints_answer_with_fixtures() {
    let scenario = builtin();
    let cases = [
        (
            "/api/collections/users/auth-refresh",
            200,
            Some(json!({"record": {"id": "user1", "email": "test@test.com"}, "token": "test-token"})),
        ),
        (
            "/api/collections/Workspaces/records?page=1&perPage=30",
            200,
            Some(json!({"items": [{"id": "ws1", "name": "Test Workspace", "members": ["user1"]}]})),
        ),
        (
            "/api/collections/Timelines/records/tl1?expand=TimelineClips_via_TimelineRef",
            200,
            Some(json!({
                "id": "tl1",
                "name": "Test Timeline",
                "WorkspaceRef": "ws1",
                "clips": [],
                "duration": 100,
                "expand": {"TimelineClips_via_TimelineRef": []}
            })),
        ),
        (
            "/api/collections/MediaClips/records?filter=(WorkspaceRef%3D%27ws1%27)",
            200,
            Some(json!({"items": [], "totalItems": 0})),
        ),
        (
            "/api/collections/TimelineRecommendations/records",
            200,
            Some(json!({"items": [], "totalItems": 0})),
        ),
        ("/api/files/MediaClips/abc/thumb.jpg", 404, None),
    ];

    for (path, status, body) in cases {
        let url = format!("{}{}", ORIGIN, path);
        let (_, route) = scenario
            .mocks
            .resolve(&url)
            .unwrap_or_else(|| panic!("no mock for {}", url));
        assert_eq!(route.status, status, "{}", url);
        assert_eq!(route.body, body, "{}", url);
    }
}

#[test]
fn json_mocks_declare_content_type() {
    for route in builtin().mocks.routes() {
        if route.body.is_some() {
            assert_eq!(route.content_type, "application/json");
        }
    }
}

#[test]
fn unrelated_requests_are_not_mocked() {
    let scenario = builtin();
    for path in [
        "/timelines/tl1",
        "/_next/static/chunks/main.js",
        "/api/collections/Timelines/records/tl2",
        "/api/collections/Timelines/records/tl1/clips",
        "/api/collections/Workspaces/records/ws1",
        "/api/collections/MediaClips/records/clip1",
    ] {
        let url = format!("{}{}", ORIGIN, path);
        assert!(scenario.mocks.resolve(&url).is_none(), "{} should pass through", url);
    }
}

#[test]
fn session_is_restored_before_the_first_wait() {
    let scenario = builtin();
    let kinds: Vec<&Step> = scenario.steps.iter().take(4).collect();

    assert_eq!(kinds[0], &Step::Navigate { url: None });
    assert_eq!(kinds[1], &Step::InjectAuth);
    assert_eq!(kinds[2], &Step::Reload);
    assert_eq!(
        kinds[3],
        &Step::ExpectVisible {
            locator: Locator::text("Test Timeline"),
            timeout_ms: 10_000,
        }
    );

    let auth = scenario.auth.unwrap();
    assert_eq!(auth.storage_key, "pocketbase_auth");
    assert_eq!(auth.cookie_name, "pb_auth");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&auth.stored_value().unwrap()).unwrap(),
        json!({"token": "test-token", "model": {"id": "user1", "email": "test@test.com"}})
    );
}

#[test]
fn ui_checks_follow_the_session_restore() {
    let steps = builtin().steps;

    assert!(steps.contains(&Step::ExpectVisible {
        locator: Locator::role("option", "Creation Time"),
        timeout_ms: 5000,
    }));
    assert!(steps.contains(&Step::Click {
        locator: Locator::title("Settings"),
        timeout_ms: None,
    }));

    let settings_click = steps
        .iter()
        .position(|s| matches!(s, Step::Click { locator, .. } if *locator == Locator::title("Settings")))
        .unwrap();
    for text in ["Recommendation Settings", "Active Strategies"] {
        let check = steps
            .iter()
            .position(|s| {
                matches!(s, Step::ExpectVisible { locator, .. } if *locator == Locator::text(text))
            })
            .unwrap();
        assert!(check > settings_click, "{} checked before opening settings", text);
    }

    assert_eq!(
        steps.last(),
        Some(&Step::Screenshot {
            path: PathBuf::from("verification.png"),
            full_page: false,
        })
    );
}

#[test]
fn shipped_yaml_matches_builtin() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/timeline_editor.yaml");
    let shipped = Scenario::from_file(&path).unwrap();
    let builtin = builtin();

    assert_eq!(shipped.name, builtin.name);
    assert_eq!(shipped.target, builtin.target);
    assert_eq!(shipped.timeout_screenshot, builtin.timeout_screenshot);
    assert_eq!(shipped.watch_prefix, builtin.watch_prefix);
    assert_eq!(shipped.mocks, builtin.mocks);
    assert_eq!(shipped.auth, builtin.auth);
    assert_eq!(shipped.steps, builtin.steps);
}

#[test]
fn driver_script_registers_routes_before_navigating() {
    let handle = PlaywrightHandle::without_preflight(PlaywrightConfig {
        artifact_dir: PathBuf::from("/srv/verification"),
        ..Default::default()
    })
    .unwrap();
    let script = handle.build_script(&builtin()).unwrap();

    let last_route = script.rfind("await page.route(").unwrap();
    let first_goto = script.find("await page.goto(").unwrap();
    assert!(last_route < first_goto);
    assert_eq!(script.matches("await page.route(").count(), 6);

    assert!(script.contains(r#"await page.goto("http://localhost:3000/timelines/tl1", { waitUntil: 'load' });"#));
    assert!(script.contains("await page.reload({ waitUntil: 'load' });"));
    assert!(script.contains(r#"await page.getByText("Test Timeline").waitFor({ state: 'visible', timeout: 10000 });"#));
    assert!(script.contains(r#"await page.locator("text=Recent").click();"#));
    assert!(script.contains(r#"await page.keyboard.press("Escape");"#));
    assert!(script.contains(r#""pocketbase_auth""#));
    assert!(script.contains(r#""pb_auth""#));

    // Only the file route answers without a body
    assert_eq!(script.matches("await route.fulfill({ status: 404 });").count(), 1);

    assert!(script.contains(r#"await screenshot("/srv/verification/timeout.png", 'timeout', false);"#));
    assert!(script.contains(r#"await screenshot("/srv/verification/verification.png", 'step', false);"#));
    assert_eq!(script.matches("}, captureTimeout);").count(), 5);

    assert_eq!(script.matches("await browser.close();").count(), 1);
    let finally = script.find("} finally {").unwrap();
    assert!(script[finally..].contains("await browser.close();"));
}
