//! Event Classifier - maps one UI event to zero or more enforcement signals.
//!
//! The decision table, evaluated in order for every event:
//! 1. Blocking disabled: nothing
//! 2. Enforcing app, launcher or system UI: nothing
//! 3. Settings/security screen showing this app's info, force-stop or
//!    permissions: [`Signal::BypassAttempt`]
//! 4. Settings search box holding a restricted term: [`Signal::RestrictedSearch`]
//! 5. Developer/advanced settings screen: [`Signal::RestrictedScreen`]
//! 6. Reset or diagnostic screen: [`Signal::RestrictedScreen`]
//! 7. Permission manager opened outside "Security and privacy":
//!    [`Signal::DismissScreen`]
//! 8. Foreground change to a package outside the allowlist:
//!    [`Signal::ForegroundViolation`]
//!
//! Rules 3-8 are independent; every one that matches contributes a signal,
//! in table order. The classifier never acts on anything itself.

use serde::Serialize;
use std::fmt;
use tracing::{debug, instrument, trace};

use crate::allowlist::AllowSet;
use crate::config::{ShieldConfig, ShieldIdentity};
use crate::event::{contains_ignore_case, contains_text, EventKind, UiEvent, UiNode};
use crate::policy::PolicyState;

pub mod rules;

use rules::{contains_any, PackageRules, PackageVerdict};

/// Which restricted screen was recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestrictedScreenKind {
    DeveloperOptions,
    ResetOrDiagnostic,
}

/// Semantic outcome of classifying one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    /// Navigation toward a screen that can disable or uninstall the
    /// enforcing app
    BypassAttempt,

    /// Settings search for a restricted term
    RestrictedSearch,

    /// A settings screen the user may not stay on
    RestrictedScreen { screen: RestrictedScreenKind },

    /// A screen that only needs to be backed out of
    DismissScreen,

    /// Switch to a package outside the allowlist
    ForegroundViolation { package_id: String },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::BypassAttempt => "BypassAttempt",
            Signal::RestrictedSearch => "RestrictedSearch",
            Signal::RestrictedScreen { .. } => "RestrictedScreen",
            Signal::DismissScreen => "DismissScreen",
            Signal::ForegroundViolation { .. } => "ForegroundViolation",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::ForegroundViolation { package_id } => {
                write!(f, "ForegroundViolation({package_id})")
            }
            Signal::RestrictedScreen { screen } => write!(f, "RestrictedScreen({screen:?})"),
            other => f.write_str(other.name()),
        }
    }
}

/// The text surfaces of one event
struct EventText<'a> {
    visible: &'a str,
    tree: Option<&'a dyn UiNode>,
}

impl EventText<'_> {
    /// Anywhere on screen: attached text or any node of the tree
    fn mentions(&self, needle: &str) -> bool {
        contains_ignore_case(self.visible, needle)
            || self.tree.is_some_and(|tree| contains_text(tree, needle))
    }

    /// Text of the source node itself (the input field). Without a tree
    /// only a text-change event's attached text counts as input.
    fn input(&self, kind: EventKind) -> &str {
        match self.tree {
            Some(tree) => tree.text().unwrap_or(""),
            None if kind == EventKind::TextChanged => self.visible,
            None => "",
        }
    }
}

/// Stateless event classifier
#[derive(Debug, Clone)]
pub struct Classifier {
    identity: ShieldIdentity,
    /// Lowercased
    settings_packages: Vec<String>,
    package_rules: PackageRules,
}

impl Classifier {
    pub fn new(config: &ShieldConfig) -> Self {
        let mut settings_packages: Vec<String> = rules::SETTINGS_PACKAGES
            .iter()
            .map(|p| p.to_string())
            .chain(config.settings_packages.iter().map(|p| p.trim().to_lowercase()))
            .filter(|p| !p.is_empty())
            .collect();
        settings_packages.sort();
        settings_packages.dedup();

        Self {
            identity: config.identity.clone(),
            settings_packages,
            package_rules: PackageRules::with_configured(&config.package_rules),
        }
    }

    pub fn identity(&self) -> &ShieldIdentity {
        &self.identity
    }

    /// Classify an event using the tree snapshot it carries
    pub fn classify(&self, event: &UiEvent, allow: &AllowSet, policy: &PolicyState) -> Vec<Signal> {
        let tree = event.source_node.as_ref().map(|node| node as &dyn UiNode);
        self.classify_with_tree(event, tree, allow, policy)
    }

    /// Classify an event against a host-owned tree borrowed for this call
    #[instrument(
        name = "classify",
        skip_all,
        fields(
            package = event.package_id.as_deref().unwrap_or(""),
            kind = %event.event_kind,
            signal_count = tracing::field::Empty
        )
    )]
    pub fn classify_with_tree(
        &self,
        event: &UiEvent,
        tree: Option<&dyn UiNode>,
        allow: &AllowSet,
        policy: &PolicyState,
    ) -> Vec<Signal> {
        let Some(package) = event.package() else {
            debug!("Discarding event without a package id");
            return Vec::new();
        };

        if !policy.block_all_enabled {
            trace!("Blocking disabled - pass-through");
            return Vec::new();
        }

        if allow.is_protected(package) {
            trace!("Protected package {} - no classification", package);
            return Vec::new();
        }

        let text = EventText {
            visible: &event.visible_text,
            tree,
        };
        let mut signals = Vec::new();

        if self.is_bypass_attempt(package, &text) {
            signals.push(Signal::BypassAttempt);
        }

        if self.is_settings_app(package, allow)
            && event.event_kind.is_search_interaction()
            && is_restricted_search(text.input(event.event_kind))
        {
            signals.push(Signal::RestrictedSearch);
        }

        if contains_any(&event.screen_class, rules::DEVELOPER_SCREEN_CLASSES)
            && contains_any(&event.visible_text, rules::DEVELOPER_PHRASES)
        {
            signals.push(Signal::RestrictedScreen {
                screen: RestrictedScreenKind::DeveloperOptions,
            });
        }

        if contains_any(&event.visible_text, rules::RESET_PHRASES)
            && !contains_any(&event.visible_text, rules::RESET_ALLOW_PHRASES)
        {
            signals.push(Signal::RestrictedScreen {
                screen: RestrictedScreenKind::ResetOrDiagnostic,
            });
        }

        if self.is_settings_app(package, allow)
            && contains_ignore_case(&event.visible_text, rules::PERMISSION_MANAGER_MARKER)
            && !contains_ignore_case(&event.visible_text, rules::SECURITY_AND_PRIVACY_MARKER)
        {
            signals.push(Signal::DismissScreen);
        }

        if event.event_kind.is_foreground_change() && self.is_violation(package, allow) {
            signals.push(Signal::ForegroundViolation {
                package_id: package.to_string(),
            });
        }

        tracing::Span::current().record("signal_count", signals.len());
        if !signals.is_empty() {
            debug!(
                "Event on {} produced signals: {}",
                package,
                signals
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        signals
    }

    /// Whether a foreground switch to `package` breaks the policy.
    ///
    /// Protected packages never do. Otherwise the first matching package
    /// rule decides; without one, allowlist membership does.
    pub fn is_violation(&self, package: &str, allow: &AllowSet) -> bool {
        if allow.is_protected(package) {
            return false;
        }
        match self.package_rules.evaluate(package) {
            Some(PackageVerdict::Allow) => false,
            Some(PackageVerdict::Block) => true,
            None => !allow.contains(package),
        }
    }

    fn is_bypass_attempt(&self, package: &str, text: &EventText<'_>) -> bool {
        let package = package.to_lowercase();
        if !self.settings_packages.iter().any(|p| *p == package) {
            return false;
        }

        let names_self = text.mentions(&self.identity.package_id)
            || text.mentions(&self.identity.display_name);
        let app_info_screen =
            rules::APP_INFO_MARKERS.iter().any(|m| text.mentions(m)) && names_self;
        let permissions_screen = text.mentions(rules::PERMISSIONS_MARKER)
            && text.mentions(&self.identity.display_name);

        app_info_screen || permissions_screen
    }

    fn is_settings_app(&self, package: &str, allow: &AllowSet) -> bool {
        let package = package.to_lowercase();
        allow.settings_package() == Some(package.as_str())
            || package.contains(rules::PLATFORM_SETTINGS_PACKAGE)
    }
}

fn is_restricted_search(input: &str) -> bool {
    !input.is_empty() && contains_any(input, rules::RESTRICTED_SEARCH_TERMS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::AllowlistResolver;
    use crate::event::TextNode;
    use crate::host::StaticDevice;
    use crate::policy::normalize_packages;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn blocking() -> PolicyState {
        PolicyState {
            block_all_enabled: true,
            ..Default::default()
        }
    }

    fn allow_set(custom: &[&str]) -> AllowSet {
        let resolver =
            AllowlistResolver::new(Arc::new(StaticDevice::stock()), ShieldIdentity::default());
        resolver.resolve(&normalize_packages(custom))
    }

    fn classifier() -> Classifier {
        Classifier::new(&ShieldConfig::default())
    }

    #[test]
    fn test_pass_through_when_disabled() {
        let event = UiEvent::new("com.some.game", EventKind::WindowStateChanged)
            .with_text("Factory reset");
        let signals = classifier().classify(&event, &allow_set(&[]), &PolicyState::default());
        assert!(signals.is_empty());
    }

    #[test]
    fn test_foreground_violation() {
        let event = UiEvent::new("com.some.game", EventKind::WindowStateChanged);
        let signals = classifier().classify(&event, &allow_set(&[]), &blocking());
        assert_eq!(
            signals,
            vec![Signal::ForegroundViolation {
                package_id: "com.some.game".to_string()
            }]
        );
    }

    #[test]
    fn test_custom_allowed_is_case_insensitive() {
        let event = UiEvent::new("com.Some.Game", EventKind::WindowContentChanged);
        let signals = classifier().classify(&event, &allow_set(&["COM.SOME.GAME"]), &blocking());
        assert!(signals.is_empty());
    }

    #[test]
    fn test_foreground_only_on_foreground_kinds() {
        let allow = allow_set(&[]);
        for kind in [EventKind::ViewFocused, EventKind::TextChanged, EventKind::NotificationChanged] {
            let event = UiEvent::new("com.some.game", kind);
            assert!(classifier().classify(&event, &allow, &blocking()).is_empty());
        }
    }

    #[test]
    fn test_self_launcher_and_system_ui_protected() {
        let allow = allow_set(&[]);
        for package in [
            "com.appshield",
            "com.google.android.apps.nexuslauncher",
            "com.android.systemui",
        ] {
            let event = UiEvent::new(package, EventKind::WindowStateChanged)
                .with_text("Force stop App info AppShield factory reset");
            assert!(
                classifier().classify(&event, &allow, &blocking()).is_empty(),
                "{package} should be protected"
            );
        }
    }

    #[test]
    fn test_malformed_event_discarded() {
        let mut event = UiEvent::new("", EventKind::WindowStateChanged);
        assert!(classifier().classify(&event, &allow_set(&[]), &blocking()).is_empty());
        event.package_id = None;
        assert!(classifier().classify(&event, &allow_set(&[]), &blocking()).is_empty());
    }

    #[test]
    fn test_bypass_attempt_from_tree() {
        let tree = TextNode::with_children(
            None,
            vec![TextNode::leaf("App info"), TextNode::leaf("AppShield")],
        );
        let event = UiEvent::new("com.miui.securitycenter", EventKind::WindowContentChanged)
            .with_source(tree);
        let signals = classifier().classify(&event, &allow_set(&[]), &blocking());
        assert_eq!(signals, vec![Signal::BypassAttempt]);
    }

    #[test]
    fn test_permissions_screen_needs_display_name() {
        let allow = allow_set(&[]);
        let with_name = UiEvent::new("com.coloros.safecenter", EventKind::ViewFocused)
            .with_source(TextNode::with_children(
                Some("Permissions".to_string()),
                vec![TextNode::leaf("appshield")],
            ));
        assert_eq!(
            classifier().classify(&with_name, &allow, &blocking()),
            vec![Signal::BypassAttempt]
        );

        let other_app = UiEvent::new("com.coloros.safecenter", EventKind::ViewFocused)
            .with_source(TextNode::with_children(
                Some("Permissions".to_string()),
                vec![TextNode::leaf("Camera")],
            ));
        assert!(classifier().classify(&other_app, &allow, &blocking()).is_empty());
    }

    #[test]
    fn test_app_info_for_other_app_is_not_bypass() {
        let event = UiEvent::new("com.miui.securitycenter", EventKind::ViewFocused)
            .with_source(TextNode::leaf("App info - Calculator"));
        assert!(classifier()
            .classify(&event, &allow_set(&[]), &blocking())
            .is_empty());
    }

    #[test]
    fn test_restricted_search_uses_input_text() {
        let event = UiEvent::new("com.android.settings", EventKind::TextChanged)
            .with_source(TextNode::leaf("Perm"));
        assert_eq!(
            classifier().classify(&event, &allow_set(&[]), &blocking()),
            vec![Signal::RestrictedSearch]
        );

        let notification = UiEvent::new("com.android.settings", EventKind::NotificationChanged)
            .with_source(TextNode::leaf("Perm"));
        assert!(classifier()
            .classify(&notification, &allow_set(&[]), &blocking())
            .is_empty());
    }

    #[test]
    fn test_restricted_search_without_tree() {
        let allow = allow_set(&[]);
        let typed = UiEvent::new("com.android.settings", EventKind::TextChanged).with_text("permiss");
        assert_eq!(
            classifier().classify(&typed, &allow, &blocking()),
            vec![Signal::RestrictedSearch]
        );

        // Screen text is not search input
        let focused = UiEvent::new("com.android.settings", EventKind::ViewFocused)
            .with_text("Display, Wallpaper");
        assert!(classifier().classify(&focused, &allow, &blocking()).is_empty());
    }

    #[test]
    fn test_restricted_search_short_prefix_matches() {
        // "per" alone is restricted, even inside unrelated words
        let event = UiEvent::new("com.android.settings", EventKind::TextChanged)
            .with_source(TextNode::leaf("superuser"));
        assert_eq!(
            classifier().classify(&event, &allow_set(&[]), &blocking()),
            vec![Signal::RestrictedSearch]
        );
    }

    #[test]
    fn test_developer_options_screen() {
        let event = UiEvent::new("com.android.settings", EventKind::ViewFocused)
            .with_screen_class("com.android.settings.SubSettings")
            .with_text("Developer options");
        assert_eq!(
            classifier().classify(&event, &allow_set(&[]), &blocking()),
            vec![Signal::RestrictedScreen {
                screen: RestrictedScreenKind::DeveloperOptions
            }]
        );

        let wrong_class = UiEvent::new("com.android.settings", EventKind::ViewFocused)
            .with_screen_class("com.android.settings.DisplaySettings")
            .with_text("Developer options");
        assert!(classifier()
            .classify(&wrong_class, &allow_set(&[]), &blocking())
            .is_empty());
    }

    #[test]
    fn test_reset_screen_and_allow_phrase() {
        let allow = allow_set(&[]);
        let reset = UiEvent::new("com.android.settings", EventKind::ViewFocused)
            .with_text("Factory data reset");
        assert_eq!(
            classifier().classify(&reset, &allow, &blocking()),
            vec![Signal::RestrictedScreen {
                screen: RestrictedScreenKind::ResetOrDiagnostic
            }]
        );

        let charged = UiEvent::new("com.android.settings", EventKind::ViewFocused)
            .with_text("The battery is full");
        assert!(classifier().classify(&charged, &allow, &blocking()).is_empty());
    }

    #[test]
    fn test_permission_manager_dismissed() {
        let allow = allow_set(&[]);
        let event = UiEvent::new("com.android.settings", EventKind::WindowStateChanged)
            .with_text("Permission manager");
        assert_eq!(
            classifier().classify(&event, &allow, &blocking()),
            vec![Signal::DismissScreen]
        );

        let inside_privacy = UiEvent::new("com.android.settings", EventKind::WindowStateChanged)
            .with_text("Security and privacy, Permission manager");
        assert!(classifier().classify(&inside_privacy, &allow, &blocking()).is_empty());
    }

    #[test]
    fn test_multiple_signals_in_table_order() {
        let event = UiEvent::new("com.some.game", EventKind::WindowStateChanged)
            .with_text("Reset your progress?");
        assert_eq!(
            classifier().classify(&event, &allow_set(&[]), &blocking()),
            vec![
                Signal::RestrictedScreen {
                    screen: RestrictedScreenKind::ResetOrDiagnostic
                },
                Signal::ForegroundViolation {
                    package_id: "com.some.game".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_benign_exceptions() {
        let allow = allow_set(&[]);
        for package in [
            "com.vendor.launcher.pro",
            "com.android.wallpaper",
            "com.vendor.help.center",
            "com.vendor.restore",
        ] {
            let event = UiEvent::new(package, EventKind::WindowStateChanged);
            assert!(classifier().classify(&event, &allow, &blocking()).is_empty());
        }
    }

    #[test]
    fn test_configured_block_rule_overrides_allowlist() {
        let config = ShieldConfig {
            package_rules: vec![crate::config::PackageRuleConfig {
                pattern: "chrome".to_string(),
                verdict: PackageVerdict::Block,
            }],
            ..Default::default()
        };
        let classifier = Classifier::new(&config);
        let event = UiEvent::new("com.android.chrome", EventKind::WindowStateChanged);
        assert_eq!(
            classifier.classify(&event, &allow_set(&[]), &blocking()),
            vec![Signal::ForegroundViolation {
                package_id: "com.android.chrome".to_string()
            }]
        );
    }

    #[test]
    fn test_app_info_from_visible_text_only() {
        let event = UiEvent::new("com.android.settings", EventKind::WindowStateChanged)
            .with_text("App info AppShield");
        assert!(event.source_node.is_none());
        assert_eq!(
            classifier().classify(&event, &allow_set(&[]), &blocking()),
            vec![Signal::BypassAttempt]
        );
    }

    #[test]
    fn test_configured_settings_package() {
        let config = ShieldConfig {
            settings_packages: vec!["com.Transsion.PhoneMaster".to_string()],
            ..Default::default()
        };
        let event = UiEvent::new("com.transsion.phonemaster", EventKind::ViewFocused)
            .with_text("Force stop AppShield");
        let signals = Classifier::new(&config).classify(&event, &allow_set(&["com.transsion.phonemaster"]), &blocking());
        assert_eq!(signals[0], Signal::BypassAttempt);
    }
}
