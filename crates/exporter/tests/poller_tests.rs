//! Poller integration tests
//!
//! Runs the poller thread against the simulated USB bus and checks what the
//! metrics endpoint would serve.
//!
//! Run with: `cargo test -p exporter --test poller_tests`

use driver::DeviceContext;
use driver::test_utils::{SimulatedBus, SimulatedDevice};
use exporter::poller::{self, PollerEnd};
use exporter::{FailurePolicy, PollEvent, PollSettings, PollerBridge, Readings, SharedReadings};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn settings(on_failure: FailurePolicy) -> PollSettings {
    PollSettings {
        interval_ms: 20,
        on_failure,
        ..PollSettings::default()
    }
}

fn spawn_simulated(
    devices: Vec<SimulatedDevice>,
    settings: PollSettings,
    readings: SharedReadings,
    end: PollerEnd,
) -> JoinHandle<anyhow::Result<()>> {
    thread::spawn(move || {
        let context = DeviceContext::with_bus(SimulatedBus::new(devices));
        poller::run(context, &settings, &readings, &end)
    })
}

async fn next_event(bridge: &PollerBridge) -> PollEvent {
    timeout(EVENT_TIMEOUT, bridge.next_event())
        .await
        .expect("timed out waiting for poller event")
        .expect("poller exited without an event")
}

/// Poll `readings` until `check` passes or the timeout expires
async fn wait_for(readings: &SharedReadings, check: impl Fn(&Readings) -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check(&readings.read()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_two_sticks_are_exported() {
    let first = SimulatedDevice::microdia().with_temperature_counts(3200);
    let second = SimulatedDevice::pcsensor().with_temperature_counts(5120);
    let readings = Readings::shared();
    let (bridge, end) = exporter::create_poller_bridge();

    let handle = spawn_simulated(
        vec![first.clone(), second.clone()],
        settings(FailurePolicy::Abort),
        readings.clone(),
        end,
    );

    assert_eq!(
        next_event(&bridge).await,
        PollEvent::Ready { found: 2, live: 2 }
    );
    assert_eq!(
        readings.read().render(),
        "# HELP temper_temp The temperature measured by a TEMPer USB stick\n\
         # TYPE temper_temp gauge\n\
         temper_temp{stick=\"0\"} 12.500000\n\
         temper_temp{stick=\"1\"} 20.000000\n"
    );

    // New readings show up on a later polling round
    first.set_temperature_counts(5760);
    assert!(wait_for(&readings, |r| r.get(0).map(|s| s.celsius) == Some(22.5)).await);

    bridge.shutdown().await.unwrap();
    handle.join().unwrap().unwrap();

    for device in [&first, &second] {
        let state = device.state();
        assert_eq!(state.claimed, [false, false]);
        assert_eq!(state.kernel_driver, [true, true]);
        assert_eq!(state.open_handles, 0);
    }
}

#[tokio::test]
async fn test_calibration_offsets_are_applied() {
    let first = SimulatedDevice::microdia().with_temperature_counts(3200);
    let second = SimulatedDevice::microdia().with_temperature_counts(3200);
    let readings = Readings::shared();
    let (bridge, end) = exporter::create_poller_bridge();

    let polling = PollSettings {
        calibration_offset: -256,
        calibration_offsets: vec![512],
        ..settings(FailurePolicy::Abort)
    };
    let handle = spawn_simulated(vec![first, second], polling, readings.clone(), end);

    assert!(matches!(next_event(&bridge).await, PollEvent::Ready { .. }));
    {
        let table = readings.read();
        assert_eq!(table.get(0).map(|s| s.celsius), Some(14.5));
        assert_eq!(table.get(1).map(|s| s.celsius), Some(11.5));
        assert_eq!(table.get(1).map(|s| s.calibration_offset), Some(-256));
    }

    bridge.shutdown().await.unwrap();
    handle.join().unwrap().unwrap();
}

#[tokio::test]
async fn test_unplugged_stick_is_retired() {
    let first = SimulatedDevice::microdia().with_temperature_counts(3200);
    let second = SimulatedDevice::pcsensor().with_temperature_counts(5120);
    let readings = Readings::shared();
    let (bridge, end) = exporter::create_poller_bridge();

    let handle = spawn_simulated(
        vec![first.clone(), second.clone()],
        settings(FailurePolicy::Retire),
        readings.clone(),
        end,
    );

    assert!(matches!(next_event(&bridge).await, PollEvent::Ready { live: 2, .. }));

    first.disconnect();
    assert!(matches!(
        next_event(&bridge).await,
        PollEvent::StickRetired { index: 0, .. }
    ));

    let text = readings.read().render();
    assert!(!text.contains("stick=\"0\""));
    assert!(text.contains("temper_temp{stick=\"1\"} 20.000000\n"));
    assert_eq!(first.state().open_handles, 0);

    bridge.shutdown().await.unwrap();
    handle.join().unwrap().unwrap();
    assert_eq!(second.state().open_handles, 0);
}

#[tokio::test]
async fn test_read_failure_aborts_under_abort_policy() {
    let first = SimulatedDevice::microdia();
    let second = SimulatedDevice::pcsensor();
    let readings = Readings::shared();
    let (bridge, end) = exporter::create_poller_bridge();

    let handle = spawn_simulated(
        vec![first.clone(), second.clone()],
        settings(FailurePolicy::Abort),
        readings,
        end,
    );

    assert!(matches!(next_event(&bridge).await, PollEvent::Ready { .. }));

    second.disconnect();
    match next_event(&bridge).await {
        PollEvent::Failed { reason } => assert!(reason.contains("Stick 1"), "{}", reason),
        other => panic!("expected failure, got {:?}", other),
    }

    assert!(handle.join().unwrap().is_err());
    // Every stick is released when the poller gives up
    assert_eq!(first.state().open_handles, 0);
    assert_eq!(first.state().claimed, [false, false]);
    assert_eq!(second.state().open_handles, 0);
}

#[tokio::test]
async fn test_last_stick_retired_is_fatal() {
    let only = SimulatedDevice::microdia();
    let readings = Readings::shared();
    let (bridge, end) = exporter::create_poller_bridge();

    let handle = spawn_simulated(
        vec![only.clone()],
        settings(FailurePolicy::Retire),
        readings,
        end,
    );

    assert!(matches!(next_event(&bridge).await, PollEvent::Ready { .. }));
    only.disconnect();

    assert!(matches!(
        next_event(&bridge).await,
        PollEvent::StickRetired { index: 0, .. }
    ));
    assert!(matches!(next_event(&bridge).await, PollEvent::Failed { .. }));
    assert!(handle.join().unwrap().is_err());
}
