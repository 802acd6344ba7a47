//! ADC注入変換による相電流センサ
//!
//! TIM1 CH4をトリガにADC1/ADC2の注入チャネルを同時変換し、
//! 変換完了割り込み（ADC1_2）から電流ループを駆動します。
//!
//! ## ハードウェア構成
//! - U相: PA1 (ADC2_IN2) → ADC2 注入ランク1
//! - V相: PA0 (ADC1_IN1) → ADC1 注入ランク1
//! - シャント抵抗 0.05Ω、外付け差動アンプゲイン 20
//! - 入力ピンはリセット時のアナログモードのまま使う

use embassy_stm32::pac;
use foc_engine::hardware::Device;
use foc_engine::CurrentSensor;

/// ADC基準電圧 [V]
const V_REF: f32 = 3.3;
/// ADCフルスケール
const ADC_MAX: f32 = 4095.0;
/// 差動アンプゲイン [V/V]
const AMP_GAIN: f32 = 20.0;
/// シャント抵抗 [Ω]
const R_SENSE: f32 = 0.05;

/// 無電流時のADC値
const IU_MIDPOINT: f32 = 2046.0;
const IV_MIDPOINT: f32 = 2044.5;
/// V相のゲイン補正
const IV_GAIN_TRIM: f32 = 1.03;

/// 注入チャネル番号
const ADC1_CHANNEL_IV: u32 = 1;
const ADC2_CHANNEL_IU: u32 = 2;

/// 注入トリガ: TIM1_CH4 立ち上がり
const JEXTSEL_TIM1_CH4: u32 = 1;
const JEXTEN_RISING: u32 = 1;

pub struct AdcCurrentSensor {
    initialized: bool,
    enabled: bool,
}

impl AdcCurrentSensor {
    pub const fn new() -> Self {
        Self {
            initialized: false,
            enabled: false,
        }
    }

    #[inline(always)]
    fn to_amps(raw: f32) -> f32 {
        raw / ADC_MAX * V_REF / AMP_GAIN / R_SENSE
    }
}

/// 注入シーケンスレジスタ値（1ランク）
const fn jsqr(channel: u32) -> u32 {
    (channel << 9) | (JEXTEN_RISING << 7) | (JEXTSEL_TIM1_CH4 << 2)
}

impl Device for AdcCurrentSensor {
    fn init(&mut self) {
        // ADC本体の有効化・校正はembassyのAdc::newで済んでいる
        pac::ADC1.jsqr().write(|w| w.0 = jsqr(ADC1_CHANNEL_IV));
        pac::ADC2.jsqr().write(|w| w.0 = jsqr(ADC2_CHANNEL_IU));
        self.initialized = true;
    }

    fn enable(&mut self) {
        // 変換完了割り込みはADC1側のみ（ADC2と同時に終わる）
        pac::ADC1.isr().write(|w| w.set_jeos(true));
        pac::ADC1.ier().modify(|w| w.set_jeosie(true));
        pac::ADC1.cr().modify(|w| w.set_jadstart(true));
        pac::ADC2.cr().modify(|w| w.set_jadstart(true));
        self.enabled = true;
    }

    fn disable(&mut self) {
        pac::ADC1.cr().modify(|w| w.set_jadstp(true));
        pac::ADC2.cr().modify(|w| w.set_jadstp(true));
        pac::ADC1.ier().modify(|w| w.set_jeosie(false));
        self.enabled = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl CurrentSensor for AdcCurrentSensor {
    #[inline]
    fn phase_currents(&mut self) -> (f32, f32, f32) {
        let raw_u = pac::ADC2.jdr(0).read().jdata() as f32;
        let raw_v = pac::ADC1.jdr(0).read().jdata() as f32;

        let iu = Self::to_amps(raw_u - IU_MIDPOINT);
        let iv = Self::to_amps((raw_v - IV_MIDPOINT) * IV_GAIN_TRIM);
        (iu, iv, -(iu + iv))
    }
}

/// 注入変換完了フラグを確認してクリアする
///
/// # Returns
/// 新しいサンプルがあれば `true`
#[inline(always)]
pub fn take_injected_complete() -> bool {
    let adc1 = pac::ADC1;
    if adc1.isr().read().jeos() {
        adc1.isr().write(|w| w.set_jeos(true));
        true
    } else {
        false
    }
}
