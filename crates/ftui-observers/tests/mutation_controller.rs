//! Mutation controller behavior against a live tree.

mod common;

use common::Fixture;
use ftui_observers::prelude::*;

fn attributes() -> MutationOptions {
    MutationOptions::default().with_attributes()
}

#[test]
fn can_observe_changes() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()));

    // initial activation reported by default
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    el.set_attribute("hi", "hi");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    // an update alone reports nothing
    el.reset_observer_value();
    el.request_update();
    fx.next_frame();
    assert_eq!(el.observer_value(), None);
    el.set_attribute("bye", "bye");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn can_observe_changes_during_update() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()));
    el.reset_observer_value();
    let before = el.observer.notification_count();
    let passes = el.host.update_count();

    let tree = fx.tree.clone();
    let target = el.element();
    el.set_change_during_update(move || tree.set_attribute(target, "hi", "hi").unwrap());
    el.request_update();
    fx.next_frame();

    assert_eq!(el.observer_value(), Some(true));
    assert_eq!(el.observer.notification_count(), before + 1, "no duplicate");
    assert_eq!(el.host.update_count(), passes + 1, "no feedback loop");
}

#[test]
fn skips_initial_changes_when_skip_initial() {
    let fx = Fixture::new();
    let el = fx.element(|host| {
        MutationControllerConfig::new(attributes())
            .with_target(host.element())
            .with_skip_initial(true)
    });
    assert_eq!(el.observer_value(), None);

    el.reset_observer_value();
    el.set_attribute("hi", "hi");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    el.request_update();
    fx.next_frame();
    assert_eq!(el.observer_value(), None);
    el.set_attribute("bye", "bye");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn observation_managed_via_connection() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()).with_skip_initial(true));
    assert_eq!(el.observer_value(), None);

    // not reported while removed
    el.remove();
    assert!(!el.observer.is_armed());
    el.set_attribute("hi", "hi");

    // reconnecting is not itself a change
    el.append_to(fx.container);
    fx.next_frame();
    assert_eq!(el.observer_value(), None);

    el.set_attribute("hi", "hi");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn can_observe_external_element() {
    let fx = Fixture::new();
    let root = fx.tree.root();
    let el = fx.element(|_| {
        MutationControllerConfig::new(MutationOptions::default().with_child_list())
            .with_target(root)
            .with_skip_initial(true)
    });
    assert_eq!(el.observer_value(), None);

    let d = fx.tree.create_element("div");
    fx.tree.append_child(root, d).unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.remove(d).unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn can_manage_value_via_callback() {
    let fx = Fixture::new();
    let tree = fx.tree.clone();
    let el = fx.element(move |_| {
        MutationControllerConfig::new(MutationOptions::default().with_child_list()).with_callback(
            move |records: &[MutationRecord]| {
                records
                    .iter()
                    .flat_map(|r| r.added_nodes.iter())
                    .filter_map(|n| tree.local_name(*n))
                    .collect::<Vec<_>>()
            },
        )
    });
    assert_eq!(el.observer_value(), Some(Vec::new()));

    el.append_child(fx.tree.create_element("div"));
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(vec!["div".to_string()]));

    el.append_child(fx.tree.create_element("span"));
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(vec!["span".to_string()]));
}

#[test]
fn can_call_observe_to_observe_element() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()));
    el.reset_observer_value();

    // activation reported when observe is called
    let d1 = fx.tree.create_element("div");
    el.observer.observe(d1).unwrap();
    el.append_child(d1);
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d1, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    el.set_attribute("a", "a");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    let d2 = fx.tree.create_element("div");
    el.observer.observe(d2).unwrap();
    el.append_child(d2);
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d2, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    el.set_attribute("a", "a");
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d1, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn disabled_target_with_observe() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()).without_target());
    assert_eq!(el.observer_value(), None);
    assert!(el.observer.observed_targets().is_empty());

    let d1 = fx.tree.create_element("div");
    el.observer.observe(d1).unwrap();
    el.append_child(d1);
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d1, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    let d2 = fx.tree.create_element("div");
    el.observer.observe(d2).unwrap();
    el.append_child(d2);
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d2, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    el.reset_observer_value();
    fx.tree.set_attribute(d1, "a", "a1").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));

    // the host element itself is not observed
    el.reset_observer_value();
    el.set_attribute("x", "y");
    fx.next_frame();
    assert_eq!(el.observer_value(), None);
}

#[test]
fn observed_target_respects_skip_initial() {
    let fx = Fixture::new();
    let el = fx.element(|_| {
        MutationControllerConfig::new(attributes())
            .without_target()
            .with_skip_initial(true)
    });

    let d1 = fx.tree.create_element("div");
    el.observer.observe(d1).unwrap();
    el.append_child(d1);
    fx.next_frame();
    assert_eq!(el.observer_value(), None);

    fx.tree.set_attribute(d1, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn observed_target_not_reobserved_on_connection() {
    let fx = Fixture::new();
    let el = fx.element(|_| MutationControllerConfig::new(attributes()).without_target());

    let d1 = fx.tree.create_element("div");
    el.observer.observe(d1).unwrap();
    el.append_child(d1);
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
    el.reset_observer_value();
    fx.next_frame();
    el.remove();

    // nothing while disconnected
    fx.tree.set_attribute(d1, "a", "a").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), None);

    // nothing after reconnecting either
    el.append_to(fx.container);
    fx.tree.set_attribute(d1, "a", "a1").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), None);
    assert_eq!(el.observer.registered_targets(), vec![d1]);
    assert!(!el.observer.is_observing(d1));

    el.observer.observe(d1).unwrap();
    fx.tree.set_attribute(d1, "a", "a2").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(true));
}

#[test]
fn independent_targets_toggle_value_in_sequence() {
    let fx = Fixture::new();
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = std::rc::Rc::clone(&seen);
    let el = fx.element(move |_| {
        MutationControllerConfig::new(attributes())
            .without_target()
            .with_callback(move |records: &[MutationRecord]| {
                log.borrow_mut()
                    .extend(records.iter().map(|r| r.target));
                !records.is_empty()
            })
    });
    let a = fx.tree.create_element("a");
    let b = fx.tree.create_element("b");
    el.observer.observe(a).unwrap();
    el.observer.observe(b).unwrap();
    fx.next_frame();

    for (target, value) in [(a, "1"), (b, "1"), (a, "2")] {
        el.reset_observer_value();
        fx.tree.set_attribute(target, "v", value).unwrap();
        fx.next_frame();
        assert_eq!(el.observer_value(), Some(true));
    }
    assert_eq!(*seen.borrow(), vec![a, b, a]);
}

#[test]
fn subtree_changes_reach_configured_target() {
    let fx = Fixture::new();
    let el = fx.element(|_| {
        MutationControllerConfig::new(
            MutationOptions::default()
                .with_character_data_old_value()
                .with_subtree(),
        )
        .with_callback(|records: &[MutationRecord]| {
            records.iter().filter_map(|r| r.old_value.clone()).collect::<Vec<_>>()
        })
    });
    let text = fx.tree.create_text("before");
    el.append_child(text);
    fx.tree.set_text(text, "after").unwrap();
    fx.next_frame();
    assert_eq!(el.observer_value(), Some(vec!["before".to_string()]));
}

#[test]
fn unavailable_platform_leaves_value_unset() {
    let scheduler = Scheduler::new();
    let tree = NodeTree::with_support(&scheduler, PlatformSupport::NONE);
    let el = common::TestElement::new(&tree, |_| MutationControllerConfig::new(attributes()));
    el.append_to(tree.root());
    scheduler.next_frame();

    el.set_attribute("a", "b");
    scheduler.next_frame();
    assert!(el.host.is_connected());
    assert!(!el.observer.is_available());
    assert_eq!(el.observer_value(), None);
    assert_eq!(el.observer.last_error(), None);
}

#[test]
fn invalid_options_fail_construction() {
    let scheduler = Scheduler::new();
    let tree = NodeTree::new(&scheduler);
    let host = ReactiveHost::new(&tree, "x-test");
    let err = MutationController::new(&host, MutationControllerConfig::new(MutationOptions::default()))
        .unwrap_err();
    assert!(matches!(err, ObserverError::InvalidOptions { kind: "mutation", .. }));
}
