// FOC (Field Oriented Control) module
// Sensor-based FOC with current/speed/angle cascade, self-calibration and
// anti-cogging compensation

pub mod anticogging;
pub mod calibration;
pub mod controller;
pub mod filters;
pub mod pid;
mod record;
pub mod transforms;

// Re-export main types for easier access
pub use anticogging::CoggingTable;
pub use calibration::CalibrationError;
pub use controller::{Filters, Foc, Hardware, Status};
pub use filters::{LowPass, Passthrough};
pub use pid::{Pid, PidLaw};

/// 制御モード
///
/// 低速割り込みで角度→速度→電流の順にカスケードする。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlMode {
    /// 目標q軸電流 [A]
    Current,
    /// 目標回転数 [RPM]
    Speed,
    /// 目標機械角 [rad]
    Angle,
    /// 指令回転数で仮想角度を積分し、角度ループで追従する [RPM]
    LowSpeed,
    /// 現在の角度目標に相対角を加算する [rad]
    StepAngle,
}

impl ControlMode {
    /// 角度ループを使うモードか
    pub const fn uses_angle_loop(self) -> bool {
        matches!(
            self,
            ControlMode::Angle | ControlMode::LowSpeed | ControlMode::StepAngle
        )
    }

    /// 速度ループを使うモードか
    pub const fn uses_speed_loop(self) -> bool {
        !matches!(self, ControlMode::Current)
    }
}
