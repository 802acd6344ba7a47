//! Configuration module
//!
//! このモジュールは制御エンジンの構成パラメータ、チューニング値、
//! および校正レコードの永続化レイアウトを提供します。

pub mod params;
pub mod storage;

pub use params::*;
pub use storage::{BaseCalibration, RecordGroup, RecordStore, StorageStatus};

/// 制御エンジンの構築パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FocConfig {
    /// モーターの極対数
    pub pole_pairs: u8,
    /// 速度・角度ループの周波数 [Hz]
    pub ctrl_frequency: f32,
    /// 電流ループの周波数 [Hz]
    pub current_ctrl_frequency: f32,
    /// 抵抗測定で許容する最大電流 [A]
    pub max_current: f32,
    /// 起動時のバス電圧 [V]
    pub bus_voltage: f32,
    /// アンチコギング静定判定の速度しきい値 [RPM]
    pub anticogging_settle_speed: f32,
    /// アンチコギング1点あたりの静定待ち上限 [ms]
    pub anticogging_settle_timeout_ms: u32,
}

impl FocConfig {
    pub const fn new() -> Self {
        Self {
            pole_pairs: DEFAULT_POLE_PAIRS,
            ctrl_frequency: DEFAULT_CTRL_FREQUENCY,
            current_ctrl_frequency: DEFAULT_CURRENT_CTRL_FREQUENCY,
            max_current: DEFAULT_MAX_CURRENT,
            bus_voltage: DEFAULT_BUS_VOLTAGE,
            anticogging_settle_speed: anticogging::SETTLE_SPEED,
            anticogging_settle_timeout_ms: anticogging::SETTLE_TIMEOUT_MS,
        }
    }
}

impl Default for FocConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// 1ループ分のPIDゲイン
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

impl PidGains {
    pub const fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self { kp, ki, kd }
    }
}

/// PIDゲインの部分更新（`None` の項目は変更しない）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GainsUpdate {
    pub kp: Option<f32>,
    pub ki: Option<f32>,
    pub kd: Option<f32>,
}

impl GainsUpdate {
    /// すべて据え置き
    pub const UNCHANGED: Self = Self {
        kp: None,
        ki: None,
        kd: None,
    };

    /// NaN を「据え置き」とみなして変換
    pub fn from_nan_skipping(kp: f32, ki: f32, kd: f32) -> Self {
        let keep = |x: f32| if x.is_nan() { None } else { Some(x) };
        Self {
            kp: keep(kp),
            ki: keep(ki),
            kd: keep(kd),
        }
    }
}

impl From<PidGains> for GainsUpdate {
    fn from(g: PidGains) -> Self {
        Self {
            kp: Some(g.kp),
            ki: Some(g.ki),
            kd: Some(g.kd),
        }
    }
}

/// 速度・角度ループのチューニング（永続化PIDグループ）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Tuning {
    pub speed: PidGains,
    pub angle: PidGains,
}

/// 対称出力制限（永続化リミットグループ）
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Limits {
    /// 角度ループの出力上限 = 最大回転数 [RPM]
    pub speed: f32,
    /// 速度ループの出力上限 = 最大電流 [A]
    pub current: f32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            speed: angle::OUTPUT_LIMIT,
            current: speed::OUTPUT_LIMIT,
        }
    }
}
