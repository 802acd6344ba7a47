//! アンチコギング（コギングトルク補正）
//!
//! 機械角一回転をN点に分割し、各点で角度ループを静定させたときのq軸電流を
//! 記録します。記録後に平均値を差し引き、リップル成分だけを残します。

use core::f32::consts::TAU;

use embedded_hal::delay::DelayNs;

use super::calibration::CalibrationError;
use super::filters::LowPass;
use super::{ControlMode, Foc};
use crate::config::anticogging::{OVERLAP, TABLE_LEN};
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter, Storage};
use crate::state::ControllerCell;

/// 0/2π境界の補正に使う角度幅 [rad]
const SEAM_LOW: f32 = 0.1;
const SEAM_HIGH: f32 = 6.2;

/// 補正テーブル（機械角一回転分のq軸電流 [A]）
#[derive(Debug, Clone)]
pub struct CoggingTable {
    values: [f32; TABLE_LEN],
}

impl CoggingTable {
    pub const LEN: usize = TABLE_LEN;

    pub const fn new() -> Self {
        Self {
            values: [0.0; TABLE_LEN],
        }
    }

    /// 角度を含む区間のインデックス（切り捨て）
    pub fn index_of(angle: f32) -> usize {
        let index = (super::transforms::wrap_angle(angle) / TAU * TABLE_LEN as f32) as usize;
        index % TABLE_LEN
    }

    /// インデックスの目標角 [rad]
    pub fn target_angle(index: usize) -> f32 {
        TAU * index as f32 / TABLE_LEN as f32
    }

    /// 最も近い点の補正値（四捨五入）
    pub fn nearest(&self, angle: f32) -> f32 {
        let position = super::transforms::wrap_angle(angle) * TABLE_LEN as f32 / TAU + 0.5;
        self.values[position as usize % TABLE_LEN]
    }

    pub fn get(&self, index: usize) -> f32 {
        self.values[index % TABLE_LEN]
    }

    pub fn set(&mut self, index: usize, value: f32) {
        self.values[index % TABLE_LEN] = value;
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn mean(&self) -> f32 {
        let sum: f64 = self.values.iter().map(|&v| v as f64).sum();
        (sum / TABLE_LEN as f64) as f32
    }

    /// 平均値を差し引いてゼロ平均にする
    pub fn zero_center(&mut self) {
        let mean = self.mean();
        for value in self.values.iter_mut() {
            *value -= mean;
        }
    }
}

impl Default for CoggingTable {
    fn default() -> Self {
        Self::new()
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
    /// アンチコギング補正テーブルを測定する（ブロッキング）
    ///
    /// 有効化済み・校正済み・未起動のときのみ実行する。割り込みコンテキストから
    /// 呼んではならない。
    ///
    /// # Returns
    /// * `Ok(n)` - 完了。`n` は静定待ちがタイムアウトした点の数
    /// * `Err(CalibrationError)` - 前提条件の不成立、または保存失敗
    pub fn anticogging_calibrate<Dl: DelayNs>(
        &self,
        delay: &mut Dl,
    ) -> Result<usize, CalibrationError> {
        let (settle_speed, timeout_ms) = self.lock(|foc| {
            let status = foc.status;
            if !status.enabled {
                return Err(CalibrationError::NotEnabled);
            }
            if !status.calibrated {
                return Err(CalibrationError::NotCalibrated);
            }
            if status.started {
                return Err(CalibrationError::AlreadyStarted);
            }
            foc.status.anticogging_calibrated = false;
            foc.ctrl(ControlMode::Current, 0.0);
            // 前回運転の積分値と電流目標を持ち込まない
            foc.reset_pids();
            foc.pid_q.set_target(0.0);
            foc.status.anticogging_calibrating = true;
            Ok((
                foc.config.anticogging_settle_speed,
                foc.config.anticogging_settle_timeout_ms.max(1),
            ))
        })?;
        info!("Anti-cogging calibration started");
        delay.delay_ms(5);

        // 現在角の1つ手前の点に位置決め
        let mut index = self.lock(|foc| CoggingTable::index_of(foc.angle));
        self.lock(|foc| foc.ctrl(ControlMode::Angle, CoggingTable::target_angle(index)));
        delay.delay_ms(20);

        let tolerance = TAU / TABLE_LEN as f32 / 10.0;
        let mut angle_filter = LowPass::from_alpha(0.2);
        let mut speed_filter = LowPass::from_alpha(0.03);
        let mut iq_filter = LowPass::from_alpha(0.2);
        let mut unsettled = 0;

        // 最初の数点はフィルタが落ち着いていないので、一周後に上書きする
        for step in 0..TABLE_LEN + OVERLAP {
            index = (index + 1) % TABLE_LEN;
            let target = CoggingTable::target_angle(index);
            self.lock(|foc| foc.ctrl(ControlMode::Angle, target));

            speed_filter.reset(0.3);
            let mut waited_ms = 0;
            loop {
                let (angle, speed, iq) = self.lock(|foc| (foc.angle, foc.speed, foc.iq));
                angle_filter.sample(unwrap_near(angle, target));
                speed_filter.sample(speed);
                iq_filter.sample(iq);
                delay.delay_ms(1);
                waited_ms += 1;

                let settled = (angle_filter.value() - target).abs() <= tolerance
                    && speed_filter.value().abs() <= settle_speed;
                if settled {
                    break;
                }
                if waited_ms >= timeout_ms {
                    warn!("Anti-cogging index {} did not settle", index);
                    unsettled += 1;
                    break;
                }
            }
            let value = iq_filter.value();
            self.lock(|foc| foc.cogging.set(index, value));

            if step % 200 == 0 {
                debug!("Anti-cogging progress: {}/{}", step, TABLE_LEN + OVERLAP);
            }
        }

        self.lock(|foc| {
            foc.ctrl(ControlMode::Current, 0.0);
            foc.status.anticogging_calibrating = false;
            foc.cogging.zero_center();
            foc.status.anticogging_calibrated = true;
        });
        info!(
            "Anti-cogging calibration finished, {} unsettled indices",
            unsettled
        );
        self.store_cogging_table().map_err(|e| {
            error!("Failed to store anti-cogging table: {:?}", e);
            CalibrationError::Storage(e)
        })?;
        Ok(unsettled)
    }
}

/// 目標が0/2π境界付近のとき、測定角を目標側へ1周ずらす
fn unwrap_near(angle: f32, target: f32) -> f32 {
    if target > SEAM_HIGH && angle < SEAM_LOW {
        angle + TAU
    } else if target < SEAM_LOW && angle > SEAM_HIGH {
        angle - TAU
    } else {
        angle
    }
}
