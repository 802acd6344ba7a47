//! 電圧監視タスク
//!
//! DCバス電圧を周期的に測定し、電流ループのゲインスケーリングに反映します。

use embassy_stm32::{adc::Adc, peripherals};
use embassy_time::{Duration, Ticker};

use crate::fmt::*;
use crate::state::MOTOR;

/// 分圧抵抗（上側 33.3kΩ / 下側 3.3kΩ）
const DIVIDER_RATIO: f32 = (33_300.0 + 3_300.0) / 3_300.0;
const V_REF: f32 = 3.3;
const ADC_MAX: f32 = 4095.0;

fn to_bus_voltage(raw: u16) -> f32 {
    raw as f32 / ADC_MAX * V_REF * DIVIDER_RATIO
}

/// 電圧監視タスク（1ms周期）
#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: embassy_stm32::adc::AnyAdcChannel<peripherals::ADC2>,
) {
    let motor = MOTOR.get().await;
    info!("Voltage monitor task started");

    let mut ticker = Ticker::every(Duration::from_millis(1));

    // デバッグログ用カウンタ（1秒ごとにログ）
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        let raw = adc.blocking_read(&mut voltage_pin);
        let voltage = to_bus_voltage(raw);
        motor.lock(|foc| foc.update_bus_voltage(voltage));

        log_counter += 1;
        if log_counter >= 1000 {
            log_counter = 0;
            debug!("[Voltage] ADC_raw={}, V_bus={}V", raw, voltage);
        }
    }
}
