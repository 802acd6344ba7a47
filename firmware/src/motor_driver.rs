//! 3相インバータドライバー
//!
//! TIM1の相補PWM（センターアライン）で3相を駆動します。
//! CH4は電流サンプリング用のADCトリガとして谷で出力します。

use embassy_stm32::{
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};
use foc_engine::hardware::Device;
use foc_engine::Driver;

/// 3相モータードライバー
pub struct PwmDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    initialized: bool,
    enabled: bool,
}

impl PwmDriver {
    /// # 引数
    /// * `pwm` - PWMペリフェラル（TIM1）
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty();
        Self {
            pwm,
            max_duty,
            initialized: false,
            enabled: false,
        }
    }

    fn set_channels(&mut self, enable: bool) {
        for channel in [Channel::Ch1, Channel::Ch2, Channel::Ch3] {
            if enable {
                self.pwm.enable(channel);
            } else {
                self.pwm.disable(channel);
            }
        }
    }

    fn to_compare(&self, duty: f32) -> u16 {
        (duty.clamp(0.0, 1.0) * self.max_duty as f32) as u16
    }
}

impl Device for PwmDriver {
    fn init(&mut self) {
        self.set_duty(0.5, 0.5, 0.5);
        // ADCトリガ（PWM周期の谷付近）
        self.pwm.set_duty(Channel::Ch4, self.max_duty - 1);
        self.pwm.enable(Channel::Ch4);
        self.initialized = true;
    }

    fn enable(&mut self) {
        self.set_channels(true);
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.set_duty(0.5, 0.5, 0.5);
        self.set_channels(false);
        self.enabled = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Driver for PwmDriver {
    #[inline]
    fn set_duty(&mut self, u: f32, v: f32, w: f32) {
        let (u, v, w) = (self.to_compare(u), self.to_compare(v), self.to_compare(w));
        self.pwm.set_duty(Channel::Ch1, u);
        self.pwm.set_duty(Channel::Ch2, v);
        self.pwm.set_duty(Channel::Ch3, w);
    }
}
