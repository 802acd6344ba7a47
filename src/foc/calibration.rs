//! モーター自動キャリブレーションモジュール
//!
//! 電流オフセット → 相抵抗 → センサ方向 → 電気角ゼロ点 の順に測定します。
//! 各ステップは短いロックで出力を設定し、ロック外で待つため、
//! 測定中も割り込みは動作し続けます。

use core::f32::consts::{PI, TAU};

use embedded_hal::delay::DelayNs;

use super::transforms::{shortest_delta, wrap_angle};
use super::Foc;
use crate::config::calibration::*;
use crate::config::BaseCalibration;
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter, Storage, StorageError};
use crate::state::ControllerCell;

/// キャリブレーションのエラー型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationError {
    /// 出力段が有効化されていない
    NotEnabled,
    /// 閉ループ制御の実行中
    AlreadyStarted,
    /// 基本校正が済んでいない
    NotCalibrated,
    /// 測定は完了したが保存に失敗した
    Storage(StorageError),
}

impl From<StorageError> for CalibrationError {
    fn from(e: StorageError) -> Self {
        CalibrationError::Storage(e)
    }
}

impl<D, E, C, F> Foc<D, E, C, F>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    F: Filter,
{
    /// 前提条件を確認し、校正済みフラグを落とす
    fn begin_calibration(&mut self) -> Result<(), CalibrationError> {
        if !self.status.enabled {
            warn!("Calibration refused: not enabled");
            return Err(CalibrationError::NotEnabled);
        }
        if self.status.started {
            warn!("Calibration refused: already started");
            return Err(CalibrationError::AlreadyStarted);
        }
        self.status.calibrated = false;
        Ok(())
    }

    /// オフセット補正済みのU相電流
    fn offset_current_u(&mut self) -> f32 {
        self.sensor.phase_currents().0 - self.calibration.iu_offset
    }

    /// 測定結果を反映し、角度の前回値を取り直す
    fn finish_calibration(&mut self, result: BaseCalibration) {
        self.apply_base(result);
        let raw = self.encoder.angle();
        self.prev_angle = self.mechanical_angle(raw);
    }
}

impl<D, E, C, F, S> ControllerCell<Foc<D, E, C, F>, S>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    F: Filter,
    S: Storage,
{
    /// 基本キャリブレーションを実行する（ブロッキング）
    ///
    /// 有効化済みかつ未起動のときのみ実行し、開始時に `calibrated` を落とす。
    /// 割り込みコンテキストから呼んではならない。
    ///
    /// # Returns
    /// * `Ok(())` - 測定・保存とも成功
    /// * `Err(CalibrationError::Storage)` - 測定値は反映済み、保存のみ失敗
    /// * その他の `Err` - 前提条件の不成立（状態は変化しない）
    pub fn calibrate<Dl: DelayNs>(&self, delay: &mut Dl) -> Result<(), CalibrationError> {
        self.lock(|foc| foc.begin_calibration())?;
        let (pole_pairs, max_current, bus_voltage) = self.lock(|foc| {
            (
                foc.config.pole_pairs,
                foc.config.max_current,
                foc.bus_voltage,
            )
        });
        info!("Calibration started");
        let mut result = BaseCalibration::new();

        // 1. 電流オフセット
        self.lock(|foc| foc.set_phase_voltage(0.0, 0.0, 0.0));
        delay.delay_ms(OFFSET_SETTLE_MS);
        let (mut sum_u, mut sum_v) = (0.0f32, 0.0f32);
        for _ in 0..OFFSET_SAMPLES {
            let (iu, iv, _) = self.lock(|foc| foc.sensor.phase_currents());
            sum_u += iu;
            sum_v += iv;
            delay.delay_ms(1);
        }
        result.iu_offset = sum_u / OFFSET_SAMPLES as f32;
        result.iv_offset = sum_v / OFFSET_SAMPLES as f32;
        self.lock(|foc| {
            foc.calibration.iu_offset = result.iu_offset;
            foc.calibration.iv_offset = result.iv_offset;
        });
        info!(
            "Current offsets: iu={} A, iv={} A",
            result.iu_offset,
            result.iv_offset
        );

        // 2. 相抵抗（U相のデューティを電流しきい値か上限まで上げる）
        self.lock(|foc| foc.driver.set_duty(0.0, 0.0, 0.0));
        let max_steps = (RAMP_DUTY_LIMIT / RAMP_STEP + 0.5) as u32;
        let threshold = max_current * RAMP_CURRENT_RATIO;
        let mut steps = 0;
        while steps < max_steps && self.lock(|foc| foc.offset_current_u()) < threshold {
            steps += 1;
            let duty = steps as f32 * RAMP_STEP;
            self.lock(|foc| foc.driver.set_duty(duty, 0.0, 0.0));
            delay.delay_ms(1);
        }
        let duty = steps as f32 * RAMP_STEP;
        if steps >= max_steps {
            warn!("Resistance ramp hit duty ceiling {} below {} A", duty, threshold);
        }

        let mut sum_r = 0.0f32;
        for _ in 0..RESISTANCE_SAMPLES {
            let current = self.lock(|foc| foc.offset_current_u());
            sum_r += duty * bus_voltage / current * 4.0 / 3.0;
            delay.delay_ms(1);
        }
        let resistance = sum_r / RESISTANCE_SAMPLES as f32;
        result.phase_resistance = if resistance.is_finite() {
            resistance
        } else {
            warn!("Phase resistance not measurable");
            f32::NAN
        };
        self.lock(|foc| foc.set_phase_voltage(0.0, 0.0, 0.0));
        let voltage_align = (duty * 4.0 / 3.0).clamp(-1.0, 1.0);
        info!(
            "Phase resistance: {} ohm, align voltage: {}",
            result.phase_resistance,
            voltage_align
        );

        // 3. センサ方向（q軸正方向に電気角2πだけ強制転流）
        let sweep_voltage = voltage_align * SWEEP_VOLTAGE_RATIO;
        self.lock(|foc| foc.set_phase_voltage(sweep_voltage, 0.0, 0.0));
        delay.delay_ms(DIRECTION_HOLD_MS);
        let begin_angle = self.mean_encoder_angle(delay, ANGLE_SAMPLES, 0);
        for i in 0..DIRECTION_SWEEP_STEPS {
            let theta = TAU * i as f32 / DIRECTION_SWEEP_STEPS as f32;
            self.lock(|foc| foc.set_phase_voltage(sweep_voltage, 0.0, theta));
            delay.delay_ms(1);
        }
        let end_angle = self.mean_encoder_angle(delay, ANGLE_SAMPLES, 0);
        self.lock(|foc| foc.set_phase_voltage(0.0, 0.0, 0.0));

        let moved = shortest_delta(end_angle, begin_angle);
        result.encoder_direction = moved > 0.0 && moved < PI;
        info!(
            "Encoder direction: {} ({} -> {})",
            result.encoder_direction,
            begin_angle,
            end_angle
        );

        // 4. 電気角ゼロ点（各極対で電気角0に引き込んだ角度を平均）
        let mut sum_offset = 0.0f32;
        for _ in 0..pole_pairs {
            for j in 0..ZERO_SWEEP_STEPS {
                let theta = TAU * j as f32 / ZERO_SWEEP_STEPS as f32;
                self.lock(|foc| foc.set_phase_voltage(sweep_voltage, 0.0, theta));
                delay.delay_ms(1);
            }
            self.lock(|foc| foc.set_phase_voltage(voltage_align, 0.0, 0.0));
            delay.delay_ms(ZERO_HOLD_MS);
            let angle = self.mean_encoder_angle(delay, ANGLE_SAMPLES, 1);
            sum_offset += if result.encoder_direction {
                TAU - angle
            } else {
                angle
            };
        }
        self.lock(|foc| foc.set_phase_voltage(0.0, 0.0, 0.0));
        let pp = pole_pairs as f32;
        result.zero_electrical_angle = (sum_offset - PI * (pp - 1.0)) / pp;
        info!("Zero electrical angle: {}", result.zero_electrical_angle);

        // 5. 完了
        self.lock(|foc| foc.finish_calibration(result));
        self.with_record(|record| record.store_base(&result))
            .map_err(|e| {
                error!("Failed to store calibration: {:?}", e);
                CalibrationError::Storage(e)
            })?;
        info!("Calibration completed");
        Ok(())
    }

    /// センサ生値の平均 [rad]
    ///
    /// 0/2π境界をまたいでも崩れないよう、最初のサンプルからの差分で平均する。
    fn mean_encoder_angle<Dl: DelayNs>(&self, delay: &mut Dl, samples: u32, period_ms: u32) -> f32 {
        let first = self.lock(|foc| foc.encoder.angle());
        let mut sum = 0.0f32;
        for i in 0..samples {
            let angle = if i == 0 {
                first
            } else {
                self.lock(|foc| foc.encoder.angle())
            };
            sum += shortest_delta(angle, first);
            if period_ms > 0 {
                delay.delay_ms(period_ms);
            }
        }
        wrap_angle(first + sum / samples.max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::storage::REGION_SIZE;
    use crate::config::FocConfig;
    use crate::foc::{Filters, Hardware, Passthrough};
    use crate::hardware::Device;

    /// 一定値を返すセンサ・エンコーダ兼ドライバ
    #[derive(Default)]
    struct Bench {
        initialized: bool,
        enabled: bool,
        currents: (f32, f32),
    }

    impl Device for Bench {
        fn init(&mut self) {
            self.initialized = true;
        }
        fn enable(&mut self) {
            self.enabled = true;
        }
        fn disable(&mut self) {
            self.enabled = false;
        }
        fn is_initialized(&self) -> bool {
            self.initialized
        }
        fn is_enabled(&self) -> bool {
            self.enabled
        }
    }

    impl Driver for Bench {
        fn set_duty(&mut self, _u: f32, _v: f32, _w: f32) {}
    }

    impl Encoder for Bench {
        fn angle(&mut self) -> f32 {
            1.0
        }
    }

    impl CurrentSensor for Bench {
        fn phase_currents(&mut self) -> (f32, f32, f32) {
            let (iu, iv) = self.currents;
            (iu, iv, -iu - iv)
        }
    }

    struct Ram(Vec<u8>);

    impl Storage for Ram {
        fn init(&mut self) -> Result<(), StorageError> {
            Ok(())
        }
        fn is_initialized(&self) -> bool {
            true
        }
        fn read(&mut self, address: usize, buf: &mut [u8]) -> Result<(), StorageError> {
            buf.copy_from_slice(&self.0[address..address + buf.len()]);
            Ok(())
        }
        fn write(&mut self, address: usize, data: &[u8]) -> Result<(), StorageError> {
            self.0[address..address + data.len()].copy_from_slice(data);
            Ok(())
        }
    }

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    type BenchFoc = Foc<Bench, Bench, Bench, Passthrough>;

    fn bench_cell(iu: f32, iv: f32) -> ControllerCell<BenchFoc, Ram> {
        let config = FocConfig::default();
        let hardware = Hardware {
            driver: Bench::default(),
            encoder: Bench::default(),
            current_sensor: Bench {
                currents: (iu, iv),
                ..Bench::default()
            },
        };
        let filters = Filters {
            current_q: Passthrough,
            current_d: Passthrough,
            speed: Passthrough,
        };
        ControllerCell::new(
            Foc::new(config, hardware, filters),
            Ram(vec![0xFF; REGION_SIZE]),
        )
    }

    #[test]
    fn test_current_offsets_are_plain_averages() {
        let cell = bench_cell(100.0, -40.0);
        cell.init();
        cell.lock(|foc| foc.enable());
        cell.calibrate(&mut NoDelay).unwrap();

        let (status, cal) = cell.lock(|foc| (foc.status(), *foc.calibration()));
        assert!(status.calibrated);
        assert_eq!(cal.iu_offset, 100.0);
        assert_eq!(cal.iv_offset, -40.0);
        // 電流が流れないので抵抗は測れない
        assert!(cal.phase_resistance.is_nan());
        // 転流してもセンサが動かない
        assert!(!cal.encoder_direction);
    }

    #[test]
    fn test_result_is_written_to_record() {
        let cell = bench_cell(0.5, 0.25);
        cell.init();
        cell.lock(|foc| foc.enable());
        cell.calibrate(&mut NoDelay).unwrap();

        let cal = cell.lock(|foc| *foc.calibration());
        let (_, mut record) = cell.into_parts();
        let stored = record.load_base().unwrap().unwrap();
        assert_eq!(stored.iu_offset, cal.iu_offset);
        assert_eq!(stored.zero_electrical_angle, cal.zero_electrical_angle);
    }

    #[test]
    fn test_refusal_leaves_state_untouched() {
        let cell = bench_cell(0.0, 0.0);
        cell.init();
        assert_eq!(cell.calibrate(&mut NoDelay), Err(CalibrationError::NotEnabled));

        let (status, cal) = cell.lock(|foc| (foc.status(), *foc.calibration()));
        assert!(!status.calibrated);
        assert_eq!(cal, BaseCalibration::new());
    }
}
