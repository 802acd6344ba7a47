mod common;

use common::{sim_config, Plant, Rig};
use foc_engine::config::anticogging::{OVERLAP, TABLE_LEN};
use foc_engine::config::RecordGroup;
use foc_engine::foc::CoggingTable;
use foc_engine::{CalibrationError, ControlMode, FocConfig};

fn quick_config() -> FocConfig {
    FocConfig {
        anticogging_settle_timeout_ms: 3,
        ..sim_config(7)
    }
}

fn cogging_plant() -> Plant {
    let mut plant = Plant::new(7);
    plant.cogging_amplitude = 0.05;
    plant
}

#[test]
fn test_anticogging_requires_base_calibration() {
    let rig = Rig::powered(quick_config(), cogging_plant());
    assert_eq!(
        rig.cell.anticogging_calibrate(&mut rig.delay()),
        Err(CalibrationError::NotCalibrated)
    );
}

#[test]
fn test_anticogging_refused_while_started() {
    let rig = Rig::precalibrated(quick_config(), cogging_plant());
    rig.cell.lock(|foc| foc.start());
    assert_eq!(
        rig.cell.anticogging_calibrate(&mut rig.delay()),
        Err(CalibrationError::AlreadyStarted)
    );
    assert!(!rig.cell.lock(|foc| foc.status().anticogging_calibrating));
}

#[test]
fn test_anticogging_sweep_builds_zero_mean_table() {
    let rig = Rig::precalibrated(quick_config(), cogging_plant());
    let unsettled = rig.cell.anticogging_calibrate(&mut rig.delay()).unwrap();
    assert!(unsettled <= TABLE_LEN + OVERLAP);

    let (status, mode, target, table) = rig.cell.lock(|foc| {
        (
            foc.status(),
            foc.mode(),
            foc.target_current(),
            foc.cogging_table().clone(),
        )
    });
    assert!(status.anticogging_calibrated);
    assert!(!status.anticogging_calibrating);
    assert!(!status.started);
    assert_eq!(mode, ControlMode::Current);
    assert_eq!(target, 0.0);
    assert!(table.mean().abs() < 1e-4);
    assert!(table.values().iter().all(|v| v.is_finite()));
    // リップルが記録されている
    assert!(table.values().iter().any(|v| v.abs() > 1e-3));

    // 保存され、再起動後に読み込まれる
    assert!(rig
        .record()
        .status()
        .unwrap()
        .contains(RecordGroup::Anticogging));
    let restarted = rig.restart(quick_config(), cogging_plant());
    restarted.cell.init();
    let (restored, calibrated) = restarted
        .cell
        .lock(|foc| (foc.cogging_table().clone(), foc.status().anticogging_calibrated));
    assert!(calibrated);
    assert_eq!(restored.values(), table.values());
}

#[test]
fn test_sweep_table_matches_cogging_ripple() {
    let rig = Rig::precalibrated(sim_config(7), cogging_plant());
    let unsettled = rig.cell.anticogging_calibrate(&mut rig.delay()).unwrap();
    assert_eq!(unsettled, 0);

    let table = rig.cell.lock(|foc| foc.cogging_table().clone());
    let plant = rig.plant.borrow().clone();
    // 機械角はロータ角から電気角オフセット/極対数だけ進んでいる
    let lead = plant.electrical_offset / plant.pole_pairs as f64;
    let expected: Vec<f64> = (0..TABLE_LEN)
        .map(|i| {
            let theta = CoggingTable::target_angle(i) as f64 - lead;
            plant.cogging_amplitude * (plant.cogging_periods * theta).sin()
        })
        .collect();
    let measured: Vec<f64> = table.values().iter().map(|&v| v as f64).collect();

    let dot: f64 = measured.iter().zip(&expected).map(|(m, e)| m * e).sum();
    let norm_m = measured.iter().map(|m| m * m).sum::<f64>().sqrt();
    let norm_e = expected.iter().map(|e| e * e).sum::<f64>().sqrt();
    let correlation = dot / (norm_m * norm_e);
    assert!(correlation > 0.9, "correlation {}", correlation);

    let rms = |v: &[f64]| (v.iter().map(|x| x * x).sum::<f64>() / v.len() as f64).sqrt();
    let (rms_m, rms_e) = (rms(&measured), rms(&expected));
    assert!((rms_m - rms_e).abs() < 0.2 * rms_e, "rms {} vs {}", rms_m, rms_e);
}

#[test]
fn test_compensation_is_added_to_current_target() {
    let rig = Rig::new(sim_config(7), Plant::new(7));
    let mut record = rig.record();
    record
        .store_base(&common::expected_calibration(&rig.plant.borrow()))
        .unwrap();
    record.store_cogging_table(&[0.2; TABLE_LEN]).unwrap();
    rig.cell.init();
    rig.cell.lock(|foc| {
        foc.enable();
        foc.start();
        foc.ctrl(ControlMode::Current, 0.1);
    });
    assert!(rig.cell.lock(|foc| foc.status().anticogging_calibrated));

    // 無効のときは補正なし
    rig.run_ms(1);
    assert!((rig.cell.lock(|foc| foc.current_setpoint()) - 0.1).abs() < 1e-6);

    rig.cell.lock(|foc| foc.set_anticogging_enabled(true));
    rig.run_ms(1);
    let setpoint = rig.cell.lock(|foc| foc.current_setpoint());
    assert!((setpoint - 0.3).abs() < 1e-6);
}
