use std::sync::Arc;
use std::time::Duration;

use lattice_bridge::{Bridge, WaitMode};
use lattice_dispatch::{CapabilityRegistry, DispatchError};
use lattice_layout::{flags, Tier, MAX_MODULES_INLINE};
use lattice_shared::SharedBuffer;

fn bridge() -> Arc<Bridge> {
    let buf = Arc::new(SharedBuffer::for_tier(Tier::Mib32));
    Arc::new(Bridge::initialize(buf.clone(), 0, buf.len(), "registry-tests").expect("init"))
}

#[test]
fn announce_and_lookup() {
    let bridge = bridge();
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");

    assert!(!registry.has_capability("tensor", None));
    registry
        .announce("tensor", &["matmul", "transpose"])
        .expect("announce");

    assert!(registry.has_capability("tensor", None));
    assert!(registry.has_capability("tensor", Some("matmul")));
    assert!(registry.has_capability("tensor", Some("transpose")));
    assert!(!registry.has_capability("tensor", Some("inverse")));
    assert!(!registry.has_capability("mesh", None));
    assert_eq!(registry.libraries(), vec!["tensor".to_string()]);
}

#[test]
fn announce_bumps_the_registry_epoch() {
    let bridge = bridge();
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");
    let before = bridge.atomic_load(flags::REGISTRY_EPOCH);
    registry.announce("mesh", &["tick"]).expect("announce");
    assert_ne!(bridge.atomic_load(flags::REGISTRY_EPOCH), before);
}

#[test]
fn reannouncing_overwrites_the_entry() {
    let bridge = bridge();
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");

    registry.announce("solver", &["lu"]).expect("announce");
    registry.announce("solver", &["qr"]).expect("reannounce");

    assert!(registry.has_capability("solver", Some("qr")));
    assert!(!registry.has_capability("solver", Some("lu")));
    assert_eq!(registry.libraries().len(), 1);
}

#[test]
fn registry_capacity_is_bounded() {
    let bridge = bridge();
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");

    for i in 0..MAX_MODULES_INLINE {
        registry
            .announce(&format!("module-{i}"), &["run"])
            .expect("announce");
    }
    let overflow = registry.announce("one-too-many", &["run"]);
    assert!(matches!(overflow, Err(DispatchError::RegistryFull { .. })));
}

#[test]
fn wait_for_capability_times_out_as_false() {
    let bridge = bridge();
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");
    assert!(!registry.wait_for_capability(
        "absent",
        Some("run"),
        Duration::from_millis(50),
        WaitMode::Blocking
    ));
}

#[test]
fn wait_for_capability_wakes_on_announce() {
    let bridge = bridge();
    let waiter_bridge = bridge.clone();
    let waiter = std::thread::spawn(move || {
        let registry = CapabilityRegistry::new(waiter_bridge).expect("registry");
        registry.wait_for_capability(
            "late-module",
            Some("go"),
            Duration::from_secs(10),
            WaitMode::Blocking,
        )
    });

    std::thread::sleep(Duration::from_millis(30));
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");
    registry.announce("late-module", &["go"]).expect("announce");

    assert!(waiter.join().expect("join"));
}

#[test]
fn polling_mode_also_observes_announcements() {
    let bridge = bridge();
    let waiter_bridge = bridge.clone();
    let waiter = std::thread::spawn(move || {
        let registry = CapabilityRegistry::new(waiter_bridge).expect("registry");
        registry.wait_for_capability(
            "polled",
            None,
            Duration::from_secs(10),
            WaitMode::frame_polling(),
        )
    });

    std::thread::sleep(Duration::from_millis(30));
    let registry = CapabilityRegistry::new(bridge.clone()).expect("registry");
    registry.announce("polled", &[]).expect("announce");

    assert!(waiter.join().expect("join"));
}
