//! Nudge-and-revert check of a device's write path

mod helpers;

use flaas_master::registry::descriptors_from_table;
use flaas_master::write_check::verify_write_path;
use flaas_master::{Error, MASTER_TRACK_ID};
use flaas_osc::{DeviceRef, LiveControl};
use helpers::{FakeDevice, FakeLive};

fn chorus(initial: f64) -> FakeDevice {
    FakeDevice::new("Chorus")
        .param("Rate", 0.0, 20.0, 1.0)
        .param("Dry/Wet", 0.0, 1.0, initial)
}

async fn check(live: &FakeLive) -> flaas_master::Result<flaas_master::write_check::WriteCheck> {
    let device = DeviceRef::new(MASTER_TRACK_ID, 0);
    let table = live.parameter_table(device).await.unwrap();
    verify_write_path(live, device, &descriptors_from_table(&table)).await
}

#[tokio::test]
async fn test_write_path_nudges_and_reverts_mix() {
    let live = FakeLive::new(MASTER_TRACK_ID, vec![chorus(0.5)]);

    let result = check(&live).await.unwrap();

    assert_eq!(result.parameter.display_name, "Dry/Wet");
    assert!((result.before - 0.5).abs() < 1e-9);
    assert!((result.after - 0.52).abs() < 1e-9);
    assert!((result.reverted - 0.5).abs() < 1e-9);

    let writes = live.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|(_, index, _)| *index == 2));
    assert!((writes[0].2 - 0.52).abs() < 1e-9);
    assert!((writes[1].2 - 0.5).abs() < 1e-9);
    assert!((live.value("Chorus", "Dry/Wet") - 0.5).abs() < 1e-9);
}

#[tokio::test]
async fn test_write_path_nudges_down_near_the_top() {
    let live = FakeLive::new(MASTER_TRACK_ID, vec![chorus(0.99)]);

    let result = check(&live).await.unwrap();

    assert!(result.after < result.before);
    assert!(live.writes().iter().all(|(_, _, v)| (0.0..=1.0).contains(v)));
}

#[tokio::test]
async fn test_ignored_writes_fail_precondition() {
    let live = FakeLive::new(MASTER_TRACK_ID, vec![chorus(0.5)]).with_read_only("Chorus");

    let err = check(&live).await.unwrap_err();

    assert!(matches!(err, Error::PreconditionFailed { .. }), "got {:?}", err);
    // Nothing to revert after a failed nudge
    assert_eq!(live.writes().len(), 1);
}

#[tokio::test]
async fn test_device_without_safe_parameter_is_not_touched() {
    let live = FakeLive::new(MASTER_TRACK_ID, vec![FakeDevice::new("Chorus")]);

    let err = check(&live).await.unwrap_err();

    assert!(matches!(err, Error::ParameterNotFound { .. }), "got {:?}", err);
    assert!(live.writes().is_empty());
}
