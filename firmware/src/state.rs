//! グローバル共有状態管理
//!
//! 制御エンジンは割り込みとタスクの両方から触るため、
//! 起動時に一度だけ初期化される静的セルに置きます。
//! 校正レコード（フラッシュ）はセル内の別ミューテックスで保護されます。

use embassy_sync::once_lock::OnceLock;
use foc_engine::{ControllerCell, Foc};

use crate::current_sensor::AdcCurrentSensor;
use crate::encoder::Mt6825Encoder;
use crate::flash_storage::FlashStorage;
use crate::motor_driver::PwmDriver;

/// このボードの制御エンジン
pub type BoardFoc = Foc<PwmDriver, Mt6825Encoder, AdcCurrentSensor>;

/// 制御エンジンと校正レコード（main で初期化）
pub static MOTOR: OnceLock<ControllerCell<BoardFoc, FlashStorage>> = OnceLock::new();
