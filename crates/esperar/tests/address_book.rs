//! End-to-end flows over the in-memory driver.
//!
//! The page mimics a storefront address book: cards re-render from the
//! server after every mutation, toasts appear and vanish on their own, and
//! the add-address popup shows validation errors below its fields.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use esperar::prelude::*;
use std::time::{Duration, Instant};

fn fast() -> WaitOptions {
    WaitOptions::new().with_poll_interval(5)
}

fn fast_notifications() -> NotificationConfig {
    NotificationConfig::default()
        .with_stage_budgets(100, 50, 150)
        .with_poll_intervals(10, 25)
}

fn card(name: &str, phone: &str) -> MockNode {
    MockNode::new("div").class("border rounded p-4").child(
        MockNode::new("div")
            .class("address__summary")
            .child(MockNode::new("div").class("full-name").text(name))
            .child(MockNode::new("div").class("telephone").text(phone)),
    )
}

/// Card with a "Make default" link that re-renders the whole list with this
/// card flagged, as the server does
fn promotable(name: &'static str, phone: &'static str) -> MockNode {
    card(name, phone).child(MockNode::new("a").text("Make default").on_click(move |dom| {
        let cards = dom.query(".border.rounded");
        let names = dom.query(".border.rounded .full-name");
        let position = names
            .iter()
            .position(|&n| dom.text(&dom.handle(n)).is_ok_and(|t| t == name));
        if let Some(&target) = position.and_then(|i| cards.get(i)) {
            let _ = dom.replace(target, card(name, phone).class("border-green-700"));
        }
    }))
}

mod convergence_flow_tests {
    use super::*;

    #[test]
    fn test_promote_then_second_call_is_a_no_op() {
        esperar::init_tracing("esperar=debug");
        let driver = MockDriver::new();
        driver.append(promotable("Anna Han", "0901000001"));
        driver.append(promotable("Bob Lee", "0902000002"));

        let controller = ConvergenceController::new(&driver).with_wait_options(fast());
        let report = controller.ensure_default_report(Duration::from_secs(1));
        assert_eq!(report.state, ConvergenceState::Converged);
        assert_eq!(report.attempts, 1);
        let default = report.card.unwrap();
        assert_eq!(default.name, "Anna Han");
        assert!(default.is_default);

        let clicks = driver.click_count();
        let again = controller.ensure_default_report(Duration::from_secs(1));
        assert!(again.was_already_converged());
        assert_eq!(again.card.unwrap().name, "Anna Han");
        assert_eq!(driver.click_count(), clicks);
    }

    #[test]
    fn test_malformed_fragment_does_not_hide_complete_cards() {
        let driver = MockDriver::new();
        driver.append(MockNode::new("div").class("border rounded").text("Loading…"));
        driver.append(card("Bob Lee", "0902000002"));

        let resolver = EntitySetResolver::new(&driver);
        assert_eq!(resolver.raw_count().unwrap(), 2);
        assert_eq!(resolver.count().unwrap(), 1);

        let cards = resolver.list().unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].index, 1);

        // a lone card without an affordance is the inferred default
        let default = resolver.find_default().unwrap().unwrap();
        assert_eq!(default.name, "Bob Lee");
        assert!(default.looks_default());
    }

    #[test]
    fn test_phone_edit_seen_after_rerender() {
        let driver = MockDriver::new();
        let target = driver.append(card("Anna Han", "0901000001"));
        driver.defer(3, move |dom| {
            let _ = dom.replace(target, card("Anna Han", "0909999999"));
        });

        let controller = ConvergenceController::new(&driver).with_wait_options(fast());
        let outcome = controller.wait_for_phone("anna han", " 0909999999 ", Duration::from_secs(1));
        assert!(outcome.success);
        assert_eq!(outcome.value.unwrap().phone, "0909999999");
    }
}

mod add_address_flow_tests {
    use super::*;

    fn popup_with_buttons() -> MockNode {
        MockNode::new("div")
            .class("bg-white p-8")
            .child(MockNode::new("input").attr("name", "full_name"))
            .child(
                MockNode::new("button")
                    .attr("data-testid", "save-empty")
                    .text("Save")
                    .on_click(|dom| {
                        let form = dom.query("div.bg-white.p-8")[0];
                        let _ = dom.append_to(
                            form,
                            MockNode::new("p").class("pl025 text-critical").text("This field can not be empty"),
                        );
                        let _ = dom.append_to(
                            form,
                            MockNode::new("p").class("pl025 text-critical").text("Invalid phone number"),
                        );
                    }),
            )
            .child(
                MockNode::new("button")
                    .attr("data-testid", "save-valid")
                    .text("Save")
                    .on_click(|dom| {
                        for form in dom.query("div.bg-white.p-8") {
                            dom.remove(form);
                        }
                        let _ = dom.append(card("Chi Pham", "0903000003"));
                        let _ = dom.append(
                            MockNode::new("div")
                                .class("Toastify__toast Toastify__toast--success")
                                .child(MockNode::new("div").class("Toastify__toast-body").text("Address saved successfully")),
                        );
                    }),
            )
    }

    fn click(driver: &MockDriver, test_id: &str) -> EsperarResult<()> {
        let button = driver
            .find_all(&Selector::test_id(test_id))?
            .into_iter()
            .next()
            .ok_or_else(|| EsperarError::not_ready(test_id))?;
        driver.click(&button)
    }

    #[test]
    fn test_validation_then_save() {
        let driver = MockDriver::new();
        driver.append(card("Anna Han", "0901000001"));
        driver.append(popup_with_buttons());

        let probe = FieldErrorProbe::new(&driver).with_wait_options(fast());
        assert!(probe.messages().unwrap().is_empty());
        click(&driver, "save-empty").unwrap();
        let errors = probe.wait_for_count(2, Duration::from_millis(200));
        assert!(errors.success);
        assert_eq!(
            errors.value.unwrap(),
            vec!["This field can not be empty", "Invalid phone number"]
        );

        let controller = ConvergenceController::new(&driver).with_wait_options(fast());
        let before = controller.resolver().count().unwrap();
        assert_eq!(before, 1);

        // no page-side observer on the mock: capture falls back to polling
        let bridge = NotificationBridge::with_config(&driver, fast_notifications());
        let capture = bridge
            .capture_around(|| click(&driver, "save-valid"), Duration::from_millis(50))
            .unwrap();
        assert_eq!(capture.source, NotificationSource::PollVisible);
        assert_eq!(capture.text.as_deref(), Some("Address saved successfully"));
        assert!(capture.contains_any(&["saved"]));

        let evidence = controller.wait_for_new_entity("Chi Pham", before, Duration::from_millis(200));
        assert!(evidence.success);
        assert_eq!(
            evidence.value.unwrap(),
            NewEntityEvidence::CountGrew { before: 1, after: 2 }
        );

        let listed = controller.wait_for_entity("CHI  PHAM", Duration::from_millis(200), MatchPolicy::Strict);
        assert!(listed.success);
        assert_eq!(listed.value.unwrap().index, 1);
    }

    #[test]
    fn test_action_error_is_returned() {
        let driver = MockDriver::new();
        let bridge = NotificationBridge::with_config(&driver, fast_notifications());
        let err = bridge
            .capture_around(|| click(&driver, "missing"), Duration::from_millis(20))
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_silent_save_reports_nothing_within_budget() {
        let driver = MockDriver::new();
        driver.append(card("Anna Han", "0901000001"));
        let config = fast_notifications();
        let budget = config.fallback_budget();

        let bridge = NotificationBridge::with_config(&driver, config);
        let start = Instant::now();
        let capture = bridge.capture(Duration::from_millis(20));
        let elapsed = start.elapsed();

        assert_eq!(capture, NotificationCapture::none());
        assert!(capture.text.is_none());
        // async observer budget + three stages, with slack for scheduling
        assert!(elapsed < budget + Duration::from_millis(20) + Duration::from_millis(250));
    }
}
