//! End-to-end classify → enforce scenarios against recording sinks

mod common;

use appshield_core::classifier::{RestrictedScreenKind, Signal};
use appshield_core::enforcement::{
    HOME_TO_TERMINATE_DELAY, MSG_APP_RESTRICTED, MSG_SEARCH_RESTRICTED, MSG_USAGE_RESTRICTED,
};
use appshield_core::event::{EventKind, TextNode, UiEvent};
use appshield_core::host::RecordedAction;
use common::blocking_shield;
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
#[serial]
async fn test_disallowed_app_sent_home_then_terminated() {
    let test = blocking_shield();
    let start = Instant::now();

    let signals = test
        .handle
        .handle_event(&UiEvent::new("com.some.game", EventKind::WindowStateChanged));
    assert_eq!(
        signals,
        vec![Signal::ForegroundViolation {
            package_id: "com.some.game".to_string()
        }]
    );
    test.handle.flush().await;

    let timeline = test.actions.timeline();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0], (start, RecordedAction::NavigateHome));
    assert_eq!(timeline[1].1, RecordedAction::Terminate("com.some.game".to_string()));
    assert!(timeline[1].0 - timeline[0].0 >= HOME_TO_TERMINATE_DELAY);
    assert_eq!(test.feedback.transient(), vec![MSG_APP_RESTRICTED]);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_app_info_for_self_is_restricted() {
    let test = blocking_shield();

    let event = UiEvent::new("com.android.settings", EventKind::WindowContentChanged)
        .with_source(TextNode::with_children(
            None,
            vec![TextNode::leaf("App info"), TextNode::leaf("AppShield")],
        ));
    assert_eq!(test.handle.handle_event(&event), vec![Signal::BypassAttempt]);
    test.handle.flush().await;

    assert_eq!(
        test.actions.actions(),
        vec![RecordedAction::NavigateBack, RecordedAction::NavigateHome]
    );
    assert_eq!(test.feedback.transient(), vec![MSG_USAGE_RESTRICTED]);
    assert_eq!(test.feedback.persistent(), vec![MSG_USAGE_RESTRICTED]);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_restricted_screens_500ms_apart_act_once() {
    let test = blocking_shield();
    let reset = UiEvent::new("com.android.settings", EventKind::ViewFocused)
        .with_text("Factory data reset");

    assert_eq!(
        test.handle.handle_event(&reset),
        vec![Signal::RestrictedScreen {
            screen: RestrictedScreenKind::ResetOrDiagnostic
        }]
    );
    tokio::time::advance(Duration::from_millis(500)).await;
    // Still classified, but debounced by the controller
    assert_eq!(test.handle.handle_event(&reset).len(), 1);
    test.handle.flush().await;

    assert_eq!(
        test.actions.actions(),
        vec![RecordedAction::NavigateBack, RecordedAction::NavigateHome]
    );
    assert_eq!(test.feedback.transient().len(), 1);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_settings_search_for_permissions() {
    let test = blocking_shield();
    let event = UiEvent::new("com.android.settings", EventKind::TextChanged)
        .with_source(TextNode::leaf("permissions"));

    assert_eq!(test.handle.handle_event(&event), vec![Signal::RestrictedSearch]);
    test.handle.flush().await;
    assert_eq!(test.feedback.transient(), vec![MSG_SEARCH_RESTRICTED]);
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_permission_manager_backed_out_without_feedback() {
    let test = blocking_shield();
    let event = UiEvent::new("com.android.settings", EventKind::WindowStateChanged)
        .with_text("Permission manager");

    assert_eq!(test.handle.handle_event(&event), vec![Signal::DismissScreen]);
    test.handle.flush().await;
    assert_eq!(test.actions.actions(), vec![RecordedAction::NavigateBack]);
    assert!(test.feedback.transient().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_pass_through_when_blocking_disabled() {
    let test = blocking_shield();
    test.handle.set_block_all_enabled(false);

    for event in [
        UiEvent::new("com.some.game", EventKind::WindowStateChanged),
        UiEvent::new("com.android.settings", EventKind::ViewFocused).with_text("Factory reset"),
        UiEvent::new("com.android.settings", EventKind::TextChanged).with_text("perm"),
    ] {
        assert!(test.handle.handle_event(&event).is_empty());
    }
    test.handle.flush().await;
    assert!(test.actions.actions().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_default_allowed_apps_never_violate() {
    let test = blocking_shield();
    let defaults = test.handle.get_default_allowed_apps();
    assert!(!defaults.is_empty());

    for package in &defaults {
        let event = UiEvent::new(package.to_uppercase(), EventKind::WindowStateChanged);
        let violation = test
            .handle
            .handle_event(&event)
            .into_iter()
            .any(|s| matches!(s, Signal::ForegroundViolation { .. }));
        assert!(!violation, "{package} is allowed but was blocked");
    }
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_feedback_disabled_still_enforces() {
    let test = blocking_shield();
    test.handle.set_feedback_enabled(false);

    test.handle
        .handle_event(&UiEvent::new("com.some.game", EventKind::ViewClicked));
    test.handle.flush().await;

    assert_eq!(test.actions.actions().len(), 2);
    assert!(test.feedback.transient().is_empty());
    assert!(test.feedback.persistent().is_empty());
}

#[tokio::test(start_paused = true)]
#[serial]
async fn test_failing_host_actions_do_not_stop_enforcement() {
    let test = blocking_shield();
    test.actions.fail("back");
    test.actions.fail("terminate");

    let event = UiEvent::new("com.some.game", EventKind::WindowStateChanged)
        .with_text("Reset all settings");
    assert_eq!(test.handle.handle_event(&event).len(), 2);
    test.handle.flush().await;

    assert_eq!(
        test.actions.actions(),
        vec![
            RecordedAction::NavigateBack,
            RecordedAction::NavigateHome,
            RecordedAction::NavigateHome,
            RecordedAction::Terminate("com.some.game".to_string()),
        ]
    );
    assert_eq!(
        test.feedback.transient(),
        vec![MSG_USAGE_RESTRICTED, MSG_APP_RESTRICTED]
    );
}
