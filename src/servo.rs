//! サーボ（機体ID・出力軸ゼロ位置つき制御エンジン）
//!
//! 制御エンジンのセルを参照し、CANで使う機体IDと出力軸のゼロ位置を
//! 校正レコードに保持します。角度の読み出し・角度指令はゼロ位置だけずらして
//! 扱います。

use embedded_hal::delay::DelayNs;

use crate::can_protocol::{self, Command, FEEDBACK_LEN};
use crate::foc::filters::LowPass;
use crate::foc::transforms::wrap_angle;
use crate::foc::{CalibrationError, ControlMode, Foc};
use crate::hardware::{CurrentSensor, Driver, Encoder, Filter, Storage, StorageError};
use crate::state::ControllerCell;

/// 機体IDの既定値
pub const DEFAULT_DEVICE_ID: u8 = 0;

/// サーボ
pub struct Servo<'a, D, E, C, S, F = LowPass> {
    cell: &'a ControllerCell<Foc<D, E, C, F>, S>,
    device_id: u8,
    /// 出力軸ゼロ位置 [rad]
    zero_position: f32,
}

impl<'a, D, E, C, S, F> Servo<'a, D, E, C, S, F>
where
    D: Driver,
    E: Encoder,
    C: CurrentSensor,
    S: Storage,
    F: Filter,
{
    pub const fn new(cell: &'a ControllerCell<Foc<D, E, C, F>, S>) -> Self {
        Self {
            cell,
            device_id: DEFAULT_DEVICE_ID,
            zero_position: 0.0,
        }
    }

    /// 制御エンジンを初期化し、機体IDとゼロ位置を読み込む
    pub fn init(&mut self) {
        self.cell.init();
        if let Err(e) = self.load_record() {
            error!("Failed to load servo record: {:?}", e);
        }
        info!(
            "Servo initialized: id={}, zero position={}",
            self.device_id,
            self.zero_position
        );
    }

    /// 制御エンジンのレコードを再読込し、機体IDとゼロ位置も読み直す
    pub fn restore(&mut self) -> Result<(), StorageError> {
        self.cell.restore()?;
        self.load_record()
    }

    fn load_record(&mut self) -> Result<(), StorageError> {
        let (id, zero) = self
            .cell
            .with_record(|record| Ok((record.load_device_id()?, record.load_zero_position()?)))?;
        if let Some(id) = id {
            self.device_id = id;
        }
        if let Some(zero) = zero {
            self.zero_position = zero;
        }
        Ok(())
    }

    pub fn cell(&self) -> &'a ControllerCell<Foc<D, E, C, F>, S> {
        self.cell
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    /// 出力軸ゼロ位置 [rad]
    pub fn zero_position(&self) -> f32 {
        self.zero_position
    }

    /// 出力軸角度 [rad]、範囲 [0, 2π)
    pub fn angle(&self) -> f32 {
        let angle = self.cell.lock(|foc| foc.angle());
        wrap_angle(angle - self.zero_position)
    }

    /// 制御モードと目標値を設定（角度指令はゼロ位置基準）
    pub fn ctrl(&self, mode: ControlMode, value: f32) {
        let value = match mode {
            ControlMode::Angle => wrap_angle(value + self.zero_position),
            _ => value,
        };
        self.cell.lock(|foc| foc.ctrl(mode, value));
    }

    /// 機体IDを変更して保存する
    pub fn set_device_id(&mut self, id: u8) -> Result<(), StorageError> {
        self.device_id = id;
        info!("Device id set to {}", id);
        self.cell
            .with_record(|record| record.store_device_id(id))
            .inspect_err(|e| error!("Failed to store device id: {:?}", e))
    }

    /// ゼロ位置を `delta` だけずらして保存する
    pub fn set_zero_position(&mut self, delta: f32) -> Result<(), StorageError> {
        self.zero_position = wrap_angle(self.zero_position + delta);
        info!("Zero position set to {}", self.zero_position);
        let zero = self.zero_position;
        self.cell
            .with_record(|record| record.store_zero_position(zero))
            .inspect_err(|e| error!("Failed to store zero position: {:?}", e))
    }

    /// 受信コマンドを実行する
    ///
    /// 校正コマンドはブロッキングで、割り込みコンテキストから呼んではならない。
    /// 実行可否は状態フラグで確認する（起動の拒否などはエラーにならない）。
    pub fn execute<Dl: DelayNs>(
        &mut self,
        command: Command,
        delay: &mut Dl,
    ) -> Result<(), CalibrationError> {
        match command {
            Command::Nop => {}
            Command::Start => self.cell.lock(|foc| foc.start()),
            Command::Stop => self.cell.lock(|foc| foc.stop()),
            Command::Current(a) => self.ctrl(ControlMode::Current, a),
            Command::Speed(rpm) => self.ctrl(ControlMode::Speed, rpm),
            Command::Angle(rad) => self.ctrl(ControlMode::Angle, rad),
            Command::LowSpeed(rpm) => self.ctrl(ControlMode::LowSpeed, rpm),
            Command::Calibrate => self.cell.calibrate(delay)?,
            Command::AnticoggingCalibrate => {
                self.cell.anticogging_calibrate(delay)?;
            }
            Command::SetAnticogging(enabled) => {
                self.cell.lock(|foc| foc.set_anticogging_enabled(enabled))
            }
            Command::SetDeviceId(id) => self.set_device_id(id)?,
            Command::StorePid => self.cell.store_pid()?,
            Command::StoreLimits => self.cell.store_limits()?,
            Command::Restore => self.restore()?,
        }
        Ok(())
    }

    /// フィードバックフレームのペイロード
    pub fn feedback(&self) -> [u8; FEEDBACK_LEN] {
        let (status, current, speed) =
            self.cell.lock(|foc| (foc.status(), foc.current(), foc.speed()));
        can_protocol::encode_feedback(&status, current, speed, self.angle())
    }
}
