mod common;

use core::f32::consts::TAU;

use common::{sim_config, Plant, Rig};
use foc_engine::config::{GainsUpdate, Limits, PidGains, RecordGroup};
use foc_engine::ControlMode;

fn started_rig() -> Rig {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| foc.start());
    assert!(rig.cell.lock(|foc| foc.status().started));
    rig
}

#[test]
fn test_start_requires_calibration() {
    let rig = Rig::powered(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| foc.start());
    assert!(!rig.cell.lock(|foc| foc.status().started));
}

#[test]
fn test_start_requires_enable() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| {
        foc.disable();
        foc.start();
    });
    let status = rig.cell.lock(|foc| foc.status());
    assert!(status.calibrated);
    assert!(!status.started);
}

#[test]
fn test_disable_clears_started() {
    let rig = started_rig();
    rig.cell.lock(|foc| foc.disable());
    let status = rig.cell.lock(|foc| foc.status());
    assert!(!status.enabled);
    assert!(!status.started);
}

#[test]
fn test_speed_loop_tracks_target() {
    let rig = started_rig();
    let start = rig.plant.borrow().theta;
    rig.cell.lock(|foc| foc.ctrl(ControlMode::Speed, 150.0));
    rig.run_ms(1500);

    let speed = rig.cell.lock(|foc| foc.speed());
    assert!((speed - 150.0).abs() < 3.0, "speed {}", speed);
    assert!(rig.plant.borrow().theta > start);
}

#[test]
fn test_angle_loop_reaches_target() {
    let rig = started_rig();
    rig.cell.lock(|foc| foc.ctrl(ControlMode::Angle, 2.0));
    rig.run_ms(1500);

    let angle = rig.cell.lock(|foc| foc.angle());
    assert!((angle - 2.0).abs() < 0.01, "angle {}", angle);
}

#[test]
fn test_angle_target_takes_short_way_across_seam() {
    let rig = started_rig();
    rig.run_ms(5);
    let start_angle = rig.cell.lock(|foc| foc.angle());
    let start_theta = rig.plant.borrow().theta;

    // 目標は +6 rad 先 = 約 0.28 rad 手前
    let target = (start_angle + 6.0) % TAU;
    rig.cell.lock(|foc| foc.ctrl(ControlMode::Angle, target));
    rig.run_ms(1500);

    let moved = rig.plant.borrow().theta - start_theta;
    assert!((moved - (6.0 - TAU as f64)).abs() < 0.02, "moved {}", moved);
}

#[test]
fn test_step_angle_accumulates_on_target() {
    let rig = started_rig();
    rig.cell.lock(|foc| {
        foc.ctrl(ControlMode::Angle, 1.0);
        foc.ctrl(ControlMode::StepAngle, 0.25);
        foc.ctrl(ControlMode::StepAngle, 0.25);
    });
    assert!((rig.cell.lock(|foc| foc.angle_target()) - 1.5).abs() < 1e-6);

    rig.run_ms(1500);
    let angle = rig.cell.lock(|foc| foc.angle());
    assert!((angle - 1.5).abs() < 0.01, "angle {}", angle);
}

#[test]
fn test_low_speed_follows_virtual_angle() {
    let rig = started_rig();
    // 仮想角度は現在の測定角から始まる
    rig.run_ms(5);
    let start = rig.plant.borrow().theta;
    rig.cell.lock(|foc| foc.ctrl(ControlMode::LowSpeed, 30.0));
    rig.run_ms(1000);

    // 30 RPM = π rad/s
    let moved = rig.plant.borrow().theta - start;
    assert!((moved - core::f64::consts::PI).abs() < 0.1, "moved {}", moved);
    let speed = rig.cell.lock(|foc| foc.speed());
    assert!((speed - 30.0).abs() < 3.0, "speed {}", speed);
}

#[test]
fn test_targets_are_clamped_by_limits() {
    let rig = started_rig();
    rig.cell.lock(|foc| {
        foc.set_limits(Some(100.0), Some(0.5));
        foc.ctrl(ControlMode::Speed, 500.0);
        assert_eq!(foc.speed_target(), 100.0);
        foc.ctrl(ControlMode::Speed, -500.0);
        assert_eq!(foc.speed_target(), -100.0);
        foc.ctrl(ControlMode::Current, 2.0);
        assert_eq!(foc.target_current(), 0.5);
        assert_eq!(
            foc.limits(),
            Limits {
                speed: 100.0,
                current: 0.5
            }
        );
    });

    // 速度ループ出力も電流制限で飽和する
    rig.cell.lock(|foc| foc.ctrl(ControlMode::Speed, 100.0));
    rig.run_ms(3);
    assert!(rig.cell.lock(|foc| foc.target_current()) <= 0.5);
}

#[test]
fn test_speed_target_unbounded_by_default() {
    let rig = started_rig();
    rig.cell.lock(|foc| {
        assert!(foc.limits().speed.is_nan());
        foc.ctrl(ControlMode::Speed, 4000.0);
        assert_eq!(foc.speed_target(), 4000.0);
    });
}

#[test]
fn test_cascade_idle_until_started() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| foc.ctrl(ControlMode::Speed, 150.0));
    rig.run_ms(50);
    let (target, duty) = rig.cell.lock(|foc| (foc.target_current(), foc.phase_voltages()));
    assert_eq!(target, 0.0);
    // 未起動中は零電圧
    assert_eq!(duty, (0.5, 0.5, 0.5));
}

#[test]
fn test_bus_voltage_rescales_current_gains() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| {
        let before = foc.current_gains();
        foc.update_bus_voltage(12.0);
        let after = foc.current_gains();
        assert_eq!(foc.bus_voltage(), 12.0);
        assert!((after.kp - before.kp * 2.0).abs() < 1e-5);
        assert!((after.ki - before.ki * 2.0).abs() < 1e-6);

        foc.update_bus_voltage(0.0);
        foc.update_bus_voltage(f32::NAN);
        assert_eq!(foc.bus_voltage(), 12.0);
        assert_eq!(foc.current_gains(), after);
    });
}

#[test]
fn test_pid_and_limits_persist() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| {
        foc.set_pid(
            GainsUpdate {
                kp: Some(5.0e-3),
                ..GainsUpdate::UNCHANGED
            },
            GainsUpdate::from_nan_skipping(f32::NAN, 0.5, f32::NAN),
        );
        foc.set_limits(Some(600.0), None);
    });
    rig.cell.store_pid().unwrap();
    rig.cell.store_limits().unwrap();
    let tuning = rig.cell.lock(|foc| foc.tuning());
    assert_eq!(tuning.speed, PidGains::new(5.0e-3, 3.9e-4, 0.0));
    assert_eq!(tuning.angle, PidGains::new(1200.0, 0.5, 0.0));

    let status = rig.record().status().unwrap();
    assert!(status.contains(RecordGroup::Pid));
    assert!(status.contains(RecordGroup::Limits));
    assert!(status.contains(RecordGroup::Base));

    let restarted = rig.restart(sim_config(7), Plant::new(7));
    restarted.cell.init();
    let (restored, limits) = restarted.cell.lock(|foc| (foc.tuning(), foc.limits()));
    assert_eq!(restored, tuning);
    assert_eq!(limits.speed, 600.0);
    assert_eq!(limits.current, 1.65);
}

#[test]
fn test_restore_rereads_record() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| foc.set_limits(Some(300.0), Some(1.0)));
    rig.cell.store_limits().unwrap();
    rig.cell.lock(|foc| foc.set_limits(Some(50.0), Some(0.2)));
    rig.cell.restore().unwrap();
    assert_eq!(
        rig.cell.lock(|foc| foc.limits()),
        Limits {
            speed: 300.0,
            current: 1.0
        }
    );
}

#[test]
fn test_record_writes_leave_interrupts_running() {
    let rig = Rig::precalibrated(sim_config(7), Plant::new(7));
    rig.cell.lock(|foc| foc.start());
    let taken = rig.interrupt_during_writes();

    rig.cell.store_pid().unwrap();
    rig.cell.store_limits().unwrap();
    let after_store = taken.get();
    assert!(after_store > 0);

    // 校正結果の保存中も割り込みが入れる
    rig.cell.lock(|foc| foc.stop());
    rig.cell.calibrate(&mut rig.delay()).unwrap();
    assert!(taken.get() > after_store);
    assert!(rig.cell.lock(|foc| foc.status().calibrated));
}
