//! モーター制御パラメータ（デフォルト値）
//!
//! 基準モーター（14極対、24V系）に合わせた初期値。実行時の値は
//! [`FocConfig`](super::FocConfig) と永続化レコードで上書きされる。

/// モーターの極対数（デフォルト値）
pub const DEFAULT_POLE_PAIRS: u8 = 14;

/// DCバス電圧 [V]（デフォルト値）
pub const DEFAULT_BUS_VOLTAGE: f32 = 24.0;

/// キャリブレーション時の最大電流 [A]
pub const DEFAULT_MAX_CURRENT: f32 = 1.65;

/// 速度・角度ループ（低速割り込み）の周波数 [Hz]
pub const DEFAULT_CTRL_FREQUENCY: f32 = 1_000.0;

/// 電流ループ（高速割り込み）の周波数 [Hz]
pub const DEFAULT_CURRENT_CTRL_FREQUENCY: f32 = 20_000.0;

/// 電流ループPID（増分形）
pub mod current {
    pub const KP: f32 = 10.0;
    pub const KI: f32 = 1.0;
    pub const KD: f32 = 0.0;
    /// 出力（正規化電圧）の上下限
    pub const OUTPUT_LIMIT: f32 = 1.0;
    /// Iq/Id 一次LPFのカットオフ [Hz]
    pub const FILTER_CUTOFF: f32 = 1_500.0;
}

/// 速度ループPID（位置形）
pub mod speed {
    pub const KP: f32 = 3.0e-3;
    pub const KI: f32 = 3.9e-4;
    pub const KD: f32 = 0.0;
    pub const INTEGRAL_LIMIT: f32 = 2.0e3;
    /// 出力 = 目標電流 [A]
    pub const OUTPUT_LIMIT: f32 = super::DEFAULT_MAX_CURRENT;
    /// 速度推定の一次LPFカットオフ [Hz]
    pub const FILTER_CUTOFF: f32 = 300.0;
}

/// 角度ループPID（増分形）
pub mod angle {
    pub const KP: f32 = 1200.0;
    pub const KI: f32 = 0.0;
    pub const KD: f32 = 0.0;
    /// 出力 = 目標回転数 [RPM]。NaN は制限なし
    pub const OUTPUT_LIMIT: f32 = f32::NAN;
}

/// アンチコギング補正
pub mod anticogging {
    /// 一回転あたりのテーブル点数
    pub const TABLE_LEN: usize = 2000;
    /// 一周後に先頭付近をもう一度測り直す点数
    pub const OVERLAP: usize = 30;
    /// 静定判定の速度しきい値 [RPM]
    pub const SETTLE_SPEED: f32 = 0.08;
    /// 1点あたりの静定待ちの上限 [ms]
    pub const SETTLE_TIMEOUT_MS: u32 = 500;
}

/// キャリブレーション手順
pub mod calibration {
    /// 電流オフセット測定前の待ち [ms]
    pub const OFFSET_SETTLE_MS: u32 = 30;
    /// 電流オフセットの平均サンプル数
    pub const OFFSET_SAMPLES: u32 = 200;
    /// 抵抗測定のデューティ刻み
    pub const RAMP_STEP: f32 = 0.001;
    /// 抵抗測定のデューティ上限
    pub const RAMP_DUTY_LIMIT: f32 = 0.8;
    /// 抵抗測定で目指す電流（最大電流比）
    pub const RAMP_CURRENT_RATIO: f32 = 0.9;
    /// 抵抗の平均サンプル数
    pub const RESISTANCE_SAMPLES: u32 = 100;
    /// 向き判定・ゼロ角の電圧係数
    pub const SWEEP_VOLTAGE_RATIO: f32 = 0.6;
    /// 向き判定の保持時間 [ms]
    pub const DIRECTION_HOLD_MS: u32 = 100;
    /// 向き判定の掃引ステップ数（1ms/ステップ）
    pub const DIRECTION_SWEEP_STEPS: u32 = 500;
    /// ゼロ角測定の掃引ステップ数
    pub const ZERO_SWEEP_STEPS: u32 = 250;
    /// ゼロ角測定の保持時間 [ms]
    pub const ZERO_HOLD_MS: u32 = 300;
    /// 角度の平均サンプル数
    pub const ANGLE_SAMPLES: u32 = 100;
}
