//! End-to-end lifecycle of the worker topology: fail-fast startup,
//! cross-worker signaling, and full teardown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rtcsync::test_utils::init_test_logging;
use rtcsync::{assert_with_log, call_site, test_complete, test_phase, test_section};
use rtcsync::{
    EngineError, EngineProbe, ManagerConfig, ManagerError, MultiEvent, MultiEventFactory,
    ThreadManager, WaitTimeout,
};

fn init_test(name: &str) {
    init_test_logging();
    test_phase!(name);
}

struct DeadEngine;

impl EngineProbe for DeadEngine {
    fn probe(&self, timeout: Duration) -> Result<(), EngineError> {
        Err(EngineError::ProbeTimeout(timeout))
    }
}

#[test]
fn dead_engine_fails_before_any_worker_exists() {
    init_test("dead_engine_fails_before_any_worker_exists");
    let config = ManagerConfig {
        probe: Arc::new(DeadEngine),
        probe_timeout: Duration::from_millis(100),
        ..ManagerConfig::default()
    };
    let result = ThreadManager::new(config);
    let refused = matches!(result, Err(ManagerError::EngineUnavailable(_)));
    assert_with_log!(refused, "construction refused", true, refused);
    test_complete!("dead_engine_fails_before_any_worker_exists");
}

#[test]
fn work_flows_across_the_fixed_workers() {
    init_test("work_flows_across_the_fixed_workers");
    let manager = ThreadManager::new(ManagerConfig::default()).expect("manager");
    let factory = Arc::new(MultiEventFactory::new());
    let event = Arc::new(MultiEvent::open(&factory).expect("event slot"));

    test_section!("major computes, callback signals, test thread waits");
    let result = Arc::new(AtomicUsize::new(0));
    let major = manager.major_worker().expect("major");
    let callback = manager.callback_worker().expect("callback");
    {
        let event = Arc::clone(&event);
        let result = Arc::clone(&result);
        major.async_call(call_site!(), move || {
            result.store(42, Ordering::SeqCst);
            // Hand completion off the way the SDK surfaces callbacks.
            callback.async_call(call_site!(), move || {
                event.set();
            });
        });
    }

    let signaled = event.wait(WaitTimeout::from_millis(2000));
    assert!(signaled.is_ok(), "handoff signaled: {signaled:?}");
    let value = result.load(Ordering::SeqCst);
    assert_with_log!(value == 42, "work ran before the signal", 42usize, value);

    drop(event);
    manager.clear();
    test_complete!("work_flows_across_the_fixed_workers");
}

#[test]
fn clear_drains_and_stops_in_one_call() {
    init_test("clear_drains_and_stops_in_one_call");
    let manager = ThreadManager::new(ManagerConfig::default()).expect("manager");
    let ran = Arc::new(AtomicUsize::new(0));

    test_section!("queue work on every fixed worker and one minor");
    let workers = vec![
        manager.ui_worker().expect("ui"),
        manager.major_worker().expect("major"),
        manager.callback_worker().expect("callback"),
        manager.event_listener_worker().expect("event listener"),
        manager.minor_worker("stats").expect("minor"),
    ];
    for worker in &workers {
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            worker.async_call(call_site!(), move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    manager.clear();

    let total = ran.load(Ordering::SeqCst);
    assert_with_log!(total == 25, "every queued task drained", 25usize, total);
    for worker in &workers {
        assert!(worker.is_stopped(), "{} still running", worker.name());
    }
    assert!(matches!(manager.ui_worker(), Err(ManagerError::Cleared)));
    test_complete!("clear_drains_and_stops_in_one_call");
}

#[test]
fn drop_tears_the_topology_down() {
    init_test("drop_tears_the_topology_down");
    let stopped_minors = Arc::new(Mutex::new(Vec::new()));
    let config = ManagerConfig {
        minor_stop_observer: Some({
            let stopped_minors = Arc::clone(&stopped_minors);
            Arc::new(move |name: &str| {
                stopped_minors.lock().expect("names").push(name.to_owned());
            })
        }),
        ..ManagerConfig::default()
    };

    let ui = {
        let manager = ThreadManager::new(config).expect("manager");
        let _ = manager.minor_worker("capture").expect("minor");
        manager.ui_worker().expect("ui")
        // manager dropped here
    };

    assert!(ui.is_stopped(), "drop did not stop the topology");
    let names = stopped_minors.lock().expect("names").clone();
    assert_with_log!(
        names == vec!["capture".to_owned()],
        "minors stopped on drop",
        vec!["capture".to_owned()],
        names
    );
    test_complete!("drop_tears_the_topology_down");
}
