//! ハードウェア初期化モジュール
//!
//! クロック設定と制御割り込みの設定を集約します。
//!
//! ## 制御割り込み
//! - ADC1_2（20kHz）: 注入変換完了 → 電流ループ
//! - TIM6_DAC（1kHz）: 更新割り込み → 速度・角度ループ

use embassy_stm32::{bind_interrupts, can, pac, peripherals, Config};

use crate::current_sensor;
use crate::state::MOTOR;

// CANの割り込みをバインド
bind_interrupts!(pub struct Irqs {
    FDCAN1_IT0 => can::IT0InterruptHandler<peripherals::FDCAN1>;
    FDCAN1_IT1 => can::IT1InterruptHandler<peripherals::FDCAN1>;
});

/// 電流ループ割り込みの優先度（最優先）
const CURRENT_LOOP_PRIORITY: u8 = 0x10;
/// カスケード割り込みの優先度
const CASCADE_PRIORITY: u8 = 0x20;

/// TIM6: 170MHz / 170 / 1000 = 1kHz
const TIM6_PRESCALER: u16 = 170 - 1;
const TIM6_RELOAD: u16 = 1000 - 1;

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux, Fdcansel};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV2), // FDCANクロック用
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R;

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        clock_mux.fdcansel = Fdcansel::PLL1_Q;
        config.rcc.mux = clock_mux;
    }
    config
}

/// 制御割り込み（ADC注入変換完了・TIM6）を有効化
///
/// # Safety
/// PACを使用した直接レジスタ操作とNVIC設定を含む。
/// `MOTOR` の初期化後に呼ぶこと
pub unsafe fn init_control_interrupts() {
    let rcc = pac::RCC;
    let tim6 = pac::TIM6;

    rcc.apb1enr1().modify(|w| w.set_tim6en(true));
    tim6.cr1().modify(|w| w.set_cen(false));
    tim6.psc().write_value(TIM6_PRESCALER);
    tim6.arr().write(|w| w.set_arr(TIM6_RELOAD));
    tim6.egr().write(|w| w.set_ug(true)); // プリスケーラ反映
    tim6.sr().write(|w| w.set_uif(false));
    tim6.dier().modify(|w| w.set_uie(true));

    unsafe {
        let mut cp = cortex_m::Peripherals::steal();
        cp.NVIC
            .set_priority(pac::Interrupt::ADC1_2, CURRENT_LOOP_PRIORITY);
        cp.NVIC.set_priority(pac::Interrupt::TIM6_DAC, CASCADE_PRIORITY);
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::ADC1_2);
        cortex_m::peripheral::NVIC::unmask(pac::Interrupt::TIM6_DAC);
    }

    tim6.cr1().modify(|w| w.set_cen(true));
}

/// ADC1_2割り込みのRust側エントリーポイント（電流ループ）
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn ADC1_2() {
    if current_sensor::take_injected_complete() {
        if let Some(motor) = MOTOR.try_get() {
            motor.current_loop_isr();
        }
    }
}

/// TIM6_DAC割り込みのRust側エントリーポイント（速度・角度ループ）
#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn TIM6_DAC() {
    let tim6 = pac::TIM6;
    if tim6.sr().read().uif() {
        tim6.sr().write(|w| w.set_uif(false));
        if let Some(motor) = MOTOR.try_get() {
            motor.cascade_isr();
        }
    }
}
